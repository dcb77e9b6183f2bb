// sizebuf.rs — message buffer and little-endian primitive read/write

use crate::error::{WireError, WireResult};

// ============================================================
// SizeBuf: growable byte buffer with a read cursor
// ============================================================

/// Writes always append at the end; reads advance `readcount`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeBuf {
    pub data: Vec<u8>,
    pub readcount: usize,
}

impl SizeBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            readcount: 0,
        }
    }

    /// Wrap already received bytes for reading.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            readcount: 0,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.readcount = 0;
    }

    pub fn cursize(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.readcount)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes not yet consumed by the read cursor.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.readcount.min(self.data.len())..]
    }

    /// Append another buffer's contents.
    pub fn append(&mut self, other: &SizeBuf) {
        self.data.extend_from_slice(&other.data);
    }

    fn take(&mut self, count: usize) -> WireResult<&[u8]> {
        let start = self.readcount;
        let remaining = self.remaining();
        if count > remaining {
            return Err(WireError::UnexpectedEndOfBuffer {
                offset: start,
                needed: count,
                remaining,
            });
        }
        self.readcount += count;
        Ok(&self.data[start..start + count])
    }

    fn take_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

// ============================================================
// MSG write functions
// ============================================================

pub fn msg_write_char(sb: &mut SizeBuf, c: i8) {
    sb.data.push(c as u8);
}

pub fn msg_write_byte(sb: &mut SizeBuf, c: u8) {
    sb.data.push(c);
}

pub fn msg_write_short(sb: &mut SizeBuf, c: i16) {
    sb.data.extend_from_slice(&c.to_le_bytes());
}

pub fn msg_write_word(sb: &mut SizeBuf, c: u16) {
    sb.data.extend_from_slice(&c.to_le_bytes());
}

pub fn msg_write_long(sb: &mut SizeBuf, c: i32) {
    sb.data.extend_from_slice(&c.to_le_bytes());
}

pub fn msg_write_ulong(sb: &mut SizeBuf, c: u32) {
    sb.data.extend_from_slice(&c.to_le_bytes());
}

/// LEB128: seven bits per byte, high bit set on every byte but the last.
pub fn msg_write_varint64(sb: &mut SizeBuf, mut v: u64) {
    while v >= 0x80 {
        sb.data.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    sb.data.push(v as u8);
}

/// Strings travel as one byte per character plus a zero terminator.
/// Characters outside Latin-1 cannot be represented and become '?'.
pub fn msg_write_string(sb: &mut SizeBuf, s: &str) {
    sb.data.extend(
        s.chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .filter(|&b| b != 0),
    );
    sb.data.push(0);
}

pub fn msg_write_data(sb: &mut SizeBuf, data: &[u8]) {
    sb.data.extend_from_slice(data);
}

pub fn msg_write_pos(sb: &mut SizeBuf, pos: &[i16; 3]) {
    for &c in pos {
        msg_write_short(sb, c);
    }
}

// ============================================================
// MSG read functions
// ============================================================

pub fn msg_begin_reading(msg: &mut SizeBuf) {
    msg.readcount = 0;
}

pub fn msg_read_char(msg: &mut SizeBuf) -> WireResult<i8> {
    Ok(msg.take(1)?[0] as i8)
}

pub fn msg_read_byte(msg: &mut SizeBuf) -> WireResult<u8> {
    Ok(msg.take(1)?[0])
}

pub fn msg_read_short(msg: &mut SizeBuf) -> WireResult<i16> {
    Ok(i16::from_le_bytes(msg.take_array()?))
}

pub fn msg_read_word(msg: &mut SizeBuf) -> WireResult<u16> {
    Ok(u16::from_le_bytes(msg.take_array()?))
}

pub fn msg_read_long(msg: &mut SizeBuf) -> WireResult<i32> {
    Ok(i32::from_le_bytes(msg.take_array()?))
}

pub fn msg_read_ulong(msg: &mut SizeBuf) -> WireResult<u32> {
    Ok(u32::from_le_bytes(msg.take_array()?))
}

pub fn msg_read_varint64(msg: &mut SizeBuf) -> WireResult<u64> {
    let start = msg.readcount;
    let mut v: u64 = 0;
    let mut shift = 0u32;
    loop {
        let b = msg_read_byte(msg)?;
        if shift == 63 && b > 1 {
            return Err(WireError::violation(start, "varint overflows 64 bits"));
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift > 63 {
            return Err(WireError::violation(start, "varint longer than 10 bytes"));
        }
    }
}

/// Reads up to the zero terminator. A buffer that ends before the
/// terminator is a truncated message.
pub fn msg_read_string(msg: &mut SizeBuf) -> WireResult<String> {
    let unread = msg.unread();
    match unread.iter().position(|&b| b == 0) {
        Some(len) => {
            let s = unread[..len].iter().map(|&b| b as char).collect();
            msg.readcount += len + 1;
            Ok(s)
        }
        None => Err(WireError::UnexpectedEndOfBuffer {
            offset: msg.readcount,
            needed: unread.len() + 1,
            remaining: unread.len(),
        }),
    }
}

pub fn msg_read_data(msg: &mut SizeBuf, len: usize) -> WireResult<Vec<u8>> {
    Ok(msg.take(len)?.to_vec())
}

pub fn msg_skip(msg: &mut SizeBuf, len: usize) -> WireResult<()> {
    msg.take(len).map(|_| ())
}

pub fn msg_read_pos(msg: &mut SizeBuf) -> WireResult<[i16; 3]> {
    Ok([
        msg_read_short(msg)?,
        msg_read_short(msg)?,
        msg_read_short(msg)?,
    ])
}
