// delta_entity.rs — entity state delta compression
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use crate::error::{WireError, WireResult};
use crate::protocol::ProtocolProfile;
use crate::q_shared::{EntityState, RF_BEAM, RF_FRAMELERP};
use crate::qcommon::*;
use crate::sizebuf::*;

// ============================================================
// Decoding
// ============================================================

/// Reads the variable-length bit mask and entity number that open every
/// entity delta. Number 0 with an empty mask terminates a list.
pub fn read_entity_bits(msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<(u16, u64)> {
    let start = msg.readcount;
    let mut bits = u64::from(msg_read_byte(msg)?);
    if bits & U_MOREBITS1 != 0 {
        bits |= u64::from(msg_read_byte(msg)?) << 8;
    }
    if bits & U_MOREBITS2 != 0 {
        bits |= u64::from(msg_read_byte(msg)?) << 16;
    }
    if bits & U_MOREBITS3 != 0 {
        bits |= u64::from(msg_read_byte(msg)?) << 24;
    }
    if profile.extensions() && bits & U_MOREBITS4 != 0 {
        bits |= u64::from(msg_read_byte(msg)?) << 32;
    }

    let number = if bits & U_NUMBER16 != 0 {
        msg_read_word(msg)?
    } else {
        u16::from(msg_read_byte(msg)?)
    };

    if usize::from(number) >= profile.max_edicts() {
        return Err(WireError::violation(
            start,
            format!("bad entity number {}", number),
        ));
    }

    Ok((number, bits))
}

/// Pure merge: fields named in `bits` come from the message, everything
/// else is copied from `from`.
pub fn read_delta_entity(
    from: &EntityState,
    number: u16,
    bits: u64,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
) -> WireResult<EntityState> {
    let mut to = *from;
    to.number = number;
    to.removed = bits & U_REMOVE != 0;

    let ext = profile.extensions();

    if ext && bits & U_MODEL16 != 0 {
        if bits & U_MODEL != 0 { to.modelindex = msg_read_word(msg)?; }
        if bits & U_MODEL2 != 0 { to.modelindex2 = msg_read_word(msg)?; }
        if bits & U_MODEL3 != 0 { to.modelindex3 = msg_read_word(msg)?; }
        if bits & U_MODEL4 != 0 { to.modelindex4 = msg_read_word(msg)?; }
    } else {
        if bits & U_MODEL != 0 { to.modelindex = u16::from(msg_read_byte(msg)?); }
        if bits & U_MODEL2 != 0 { to.modelindex2 = u16::from(msg_read_byte(msg)?); }
        if bits & U_MODEL3 != 0 { to.modelindex3 = u16::from(msg_read_byte(msg)?); }
        if bits & U_MODEL4 != 0 { to.modelindex4 = u16::from(msg_read_byte(msg)?); }
    }

    if bits & U_FRAME8 != 0 { to.frame = u16::from(msg_read_byte(msg)?); }
    if bits & U_FRAME16 != 0 { to.frame = msg_read_word(msg)?; }

    to.skinnum = read_variable(msg, bits, U_SKIN8, U_SKIN16, from.skinnum)?;
    to.effects = read_variable(msg, bits, U_EFFECTS8, U_EFFECTS16, from.effects)?;
    to.renderfx = read_variable(msg, bits, U_RENDERFX8, U_RENDERFX16, from.renderfx)?;

    if bits & U_ORIGIN1 != 0 { to.origin[0] = msg_read_short(msg)?; }
    if bits & U_ORIGIN2 != 0 { to.origin[1] = msg_read_short(msg)?; }
    if bits & U_ORIGIN3 != 0 { to.origin[2] = msg_read_short(msg)?; }

    if profile.short_angles() && bits & U_ANGLE16 != 0 {
        if bits & U_ANGLE1 != 0 { to.angles[0] = msg_read_short(msg)?; }
        if bits & U_ANGLE2 != 0 { to.angles[1] = msg_read_short(msg)?; }
        if bits & U_ANGLE3 != 0 { to.angles[2] = msg_read_short(msg)?; }
    } else {
        if bits & U_ANGLE1 != 0 { to.angles[0] = byte2angle(msg_read_byte(msg)?); }
        if bits & U_ANGLE2 != 0 { to.angles[1] = byte2angle(msg_read_byte(msg)?); }
        if bits & U_ANGLE3 != 0 { to.angles[2] = byte2angle(msg_read_byte(msg)?); }
    }

    if bits & U_OLDORIGIN != 0 {
        to.old_origin = msg_read_pos(msg)?;
    }

    if bits & U_SOUND != 0 {
        to.sound = if ext {
            msg_read_word(msg)?
        } else {
            u16::from(msg_read_byte(msg)?)
        };
    }

    if bits & U_EVENT != 0 { to.event = msg_read_byte(msg)?; }

    if bits & U_SOLID != 0 {
        to.solid = if profile.long_solid() {
            msg_read_ulong(msg)?
        } else {
            u32::from(msg_read_word(msg)?)
        };
    }

    if ext {
        to.morefx = read_variable(msg, bits, U_MOREFX8, U_MOREFX16, from.morefx)?;
        if bits & U_ALPHA != 0 { to.alpha = msg_read_byte(msg)?; }
        if bits & U_SCALE != 0 { to.scale = msg_read_byte(msg)?; }
    }

    Ok(to)
}

// Both width bits set means a full 32-bit value.
fn read_variable(msg: &mut SizeBuf, bits: u64, bit8: u64, bit16: u64, old: u32) -> WireResult<u32> {
    let value = match (bits & bit8 != 0, bits & bit16 != 0) {
        (true, true) => msg_read_ulong(msg)?,
        (true, false) => u32::from(msg_read_byte(msg)?),
        (false, true) => u32::from(msg_read_word(msg)?),
        (false, false) => old,
    };
    Ok(value)
}

/// 8-bit wire angles are the high byte of the 16-bit form; the low byte
/// must be zero for the value to survive.
pub fn byte2angle(b: u8) -> i16 {
    (u16::from(b) << 8) as i16
}

pub fn angle2byte(a: i16) -> u8 {
    ((a as u16) >> 8) as u8
}

// ============================================================
// Encoding
// ============================================================

/// Narrowest of the 8, 16 and 32-bit forms that holds `value`.
fn variable_bits(value: u32, bit8: u64, bit16: u64) -> u64 {
    if value < 0x100 {
        bit8
    } else if value < 0x10000 {
        bit16
    } else {
        bit8 | bit16
    }
}

/// Presence bits needed to turn `from` into `to`, excluding the
/// continuation bits. Fails if `to` carries values the profile cannot
/// express.
pub fn entity_delta_bits(from: &EntityState, to: &EntityState, profile: &ProtocolProfile) -> WireResult<u64> {
    let ext = profile.extensions();
    let mut bits: u64 = 0;

    if to.number == 0 || usize::from(to.number) >= profile.max_edicts() {
        return Err(WireError::violation(0, format!("cannot encode entity number {}", to.number)));
    }
    if to.number >= 256 { bits |= U_NUMBER16; }

    if to.origin[0] != from.origin[0] { bits |= U_ORIGIN1; }
    if to.origin[1] != from.origin[1] { bits |= U_ORIGIN2; }
    if to.origin[2] != from.origin[2] { bits |= U_ORIGIN3; }

    if to.angles[0] != from.angles[0] { bits |= U_ANGLE1; }
    if to.angles[1] != from.angles[1] { bits |= U_ANGLE2; }
    if to.angles[2] != from.angles[2] { bits |= U_ANGLE3; }
    if profile.short_angles() {
        if bits & (U_ANGLE1 | U_ANGLE2 | U_ANGLE3) != 0 {
            bits |= U_ANGLE16;
        }
    } else {
        for (i, bit) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
            if bits & bit != 0 && to.angles[i] & 0xff != 0 {
                return Err(WireError::violation(
                    0,
                    format!("angle {} of entity {} needs short angles", to.angles[i], to.number),
                ));
            }
        }
    }

    if to.skinnum != from.skinnum {
        bits |= variable_bits(to.skinnum, U_SKIN8, U_SKIN16);
    }

    if to.frame != from.frame {
        bits |= if to.frame < 256 { U_FRAME8 } else { U_FRAME16 };
    }

    if to.effects != from.effects {
        bits |= variable_bits(to.effects, U_EFFECTS8, U_EFFECTS16);
    }

    if to.renderfx != from.renderfx {
        bits |= variable_bits(to.renderfx, U_RENDERFX8, U_RENDERFX16);
    }

    if to.solid != from.solid {
        if !profile.long_solid() && to.solid > 0xffff {
            return Err(WireError::violation(0, format!("solid {:#x} needs long solid", to.solid)));
        }
        bits |= U_SOLID;
    }
    if to.event != from.event { bits |= U_EVENT; }
    if to.modelindex != from.modelindex { bits |= U_MODEL; }
    if to.modelindex2 != from.modelindex2 { bits |= U_MODEL2; }
    if to.modelindex3 != from.modelindex3 { bits |= U_MODEL3; }
    if to.modelindex4 != from.modelindex4 { bits |= U_MODEL4; }
    if to.sound != from.sound {
        if !ext && to.sound > 255 {
            return Err(WireError::violation(0, format!("sound index {} needs extensions", to.sound)));
        }
        bits |= U_SOUND;
    }

    let models = [to.modelindex, to.modelindex2, to.modelindex3, to.modelindex4];
    if models.iter().any(|&m| m > 255) {
        if !ext {
            return Err(WireError::violation(0, format!("model index above 255 on entity {} needs extensions", to.number)));
        }
        if bits & (U_MODEL | U_MODEL2 | U_MODEL3 | U_MODEL4) != 0 {
            bits |= U_MODEL16;
        }
    }

    if to.renderfx & (RF_FRAMELERP | RF_BEAM) != 0 || to.old_origin != from.old_origin {
        bits |= U_OLDORIGIN;
    }

    if to.morefx != from.morefx || to.alpha != from.alpha || to.scale != from.scale {
        if !ext {
            return Err(WireError::violation(0, format!("entity {} uses extension fields", to.number)));
        }
        if to.morefx != from.morefx {
            bits |= variable_bits(to.morefx, U_MOREFX8, U_MOREFX16);
        }
        if to.alpha != from.alpha { bits |= U_ALPHA; }
        if to.scale != from.scale { bits |= U_SCALE; }
    }

    if to.removed { bits |= U_REMOVE; }

    Ok(bits)
}

/// Writes the entity delta from `from` to `to`. Nothing is written when
/// the states match unless `force` is set, in which case a bare header
/// goes out. Returns whether anything was written.
pub fn write_delta_entity(
    from: &EntityState,
    to: &EntityState,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
    force: bool,
) -> WireResult<bool> {
    let bits = entity_delta_bits(from, to, profile)?;
    if bits & !U_NUMBER16 == 0 && !force {
        return Ok(false);
    }
    write_entity_fields(to, bits, msg, profile);
    Ok(true)
}

/// Writes the header and the fields named in `bits` from `to`.
pub fn write_entity_fields(to: &EntityState, mut bits: u64, msg: &mut SizeBuf, profile: &ProtocolProfile) {
    let ext = profile.extensions();
    if !ext {
        bits &= !U_EXTENSION_BITS;
    }
    bits &= !(U_MOREBITS1 | U_MOREBITS2 | U_MOREBITS3 | U_MOREBITS4);
    if to.number >= 256 {
        bits |= U_NUMBER16;
    }

    if bits & 0xff_0000_0000 != 0 {
        bits |= U_MOREBITS4 | U_MOREBITS3 | U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0xff00_0000 != 0 {
        bits |= U_MOREBITS3 | U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0x00ff_0000 != 0 {
        bits |= U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0x0000_ff00 != 0 {
        bits |= U_MOREBITS1;
    }

    msg_write_byte(msg, bits as u8);
    if bits & U_MOREBITS1 != 0 { msg_write_byte(msg, (bits >> 8) as u8); }
    if bits & U_MOREBITS2 != 0 { msg_write_byte(msg, (bits >> 16) as u8); }
    if bits & U_MOREBITS3 != 0 { msg_write_byte(msg, (bits >> 24) as u8); }
    if bits & U_MOREBITS4 != 0 { msg_write_byte(msg, (bits >> 32) as u8); }

    if bits & U_NUMBER16 != 0 {
        msg_write_word(msg, to.number);
    } else {
        msg_write_byte(msg, to.number as u8);
    }

    if bits & U_MODEL16 != 0 {
        if bits & U_MODEL != 0 { msg_write_word(msg, to.modelindex); }
        if bits & U_MODEL2 != 0 { msg_write_word(msg, to.modelindex2); }
        if bits & U_MODEL3 != 0 { msg_write_word(msg, to.modelindex3); }
        if bits & U_MODEL4 != 0 { msg_write_word(msg, to.modelindex4); }
    } else {
        if bits & U_MODEL != 0 { msg_write_byte(msg, to.modelindex as u8); }
        if bits & U_MODEL2 != 0 { msg_write_byte(msg, to.modelindex2 as u8); }
        if bits & U_MODEL3 != 0 { msg_write_byte(msg, to.modelindex3 as u8); }
        if bits & U_MODEL4 != 0 { msg_write_byte(msg, to.modelindex4 as u8); }
    }

    if bits & U_FRAME8 != 0 { msg_write_byte(msg, to.frame as u8); }
    if bits & U_FRAME16 != 0 { msg_write_word(msg, to.frame); }

    write_variable(msg, bits, U_SKIN8, U_SKIN16, to.skinnum);
    write_variable(msg, bits, U_EFFECTS8, U_EFFECTS16, to.effects);
    write_variable(msg, bits, U_RENDERFX8, U_RENDERFX16, to.renderfx);

    if bits & U_ORIGIN1 != 0 { msg_write_short(msg, to.origin[0]); }
    if bits & U_ORIGIN2 != 0 { msg_write_short(msg, to.origin[1]); }
    if bits & U_ORIGIN3 != 0 { msg_write_short(msg, to.origin[2]); }

    if bits & U_ANGLE16 != 0 && profile.short_angles() {
        if bits & U_ANGLE1 != 0 { msg_write_short(msg, to.angles[0]); }
        if bits & U_ANGLE2 != 0 { msg_write_short(msg, to.angles[1]); }
        if bits & U_ANGLE3 != 0 { msg_write_short(msg, to.angles[2]); }
    } else {
        if bits & U_ANGLE1 != 0 { msg_write_byte(msg, angle2byte(to.angles[0])); }
        if bits & U_ANGLE2 != 0 { msg_write_byte(msg, angle2byte(to.angles[1])); }
        if bits & U_ANGLE3 != 0 { msg_write_byte(msg, angle2byte(to.angles[2])); }
    }

    if bits & U_OLDORIGIN != 0 {
        msg_write_pos(msg, &to.old_origin);
    }

    if bits & U_SOUND != 0 {
        if ext {
            msg_write_word(msg, to.sound);
        } else {
            msg_write_byte(msg, to.sound as u8);
        }
    }
    if bits & U_EVENT != 0 { msg_write_byte(msg, to.event); }
    if bits & U_SOLID != 0 {
        if profile.long_solid() {
            msg_write_ulong(msg, to.solid);
        } else {
            msg_write_word(msg, to.solid as u16);
        }
    }

    if ext {
        write_variable(msg, bits, U_MOREFX8, U_MOREFX16, to.morefx);
        if bits & U_ALPHA != 0 { msg_write_byte(msg, to.alpha); }
        if bits & U_SCALE != 0 { msg_write_byte(msg, to.scale); }
    }
}

fn write_variable(msg: &mut SizeBuf, bits: u64, bit8: u64, bit16: u64, value: u32) {
    match (bits & bit8 != 0, bits & bit16 != 0) {
        (true, true) => msg_write_ulong(msg, value),
        (true, false) => msg_write_byte(msg, value as u8),
        (false, true) => msg_write_word(msg, value as u16),
        (false, false) => {}
    }
}

/// End-of-list marker: empty mask and entity number 0.
pub fn write_entity_terminator(msg: &mut SizeBuf) {
    msg_write_short(msg, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolFlags;

    fn extended() -> ProtocolProfile {
        ProtocolProfile::from_mvd(2012, MVF_EXTLIMITS, 0).unwrap()
    }

    #[test]
    fn test_read_entity_bits_two_bytes() {
        let mut sb = SizeBuf::from_bytes(vec![0x8a, 0x3e, 0x01, 0x00]);
        let (number, bits) = read_entity_bits(&mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(bits, 16010);
        assert_eq!(number, 1);
        assert_eq!(sb.readcount, 3);
    }

    #[test]
    fn test_read_entity_bits_one_byte() {
        let mut sb = SizeBuf::from_bytes(vec![0x0c, 0x02]);
        let (number, bits) = read_entity_bits(&mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(bits, U_ANGLE2 | U_ANGLE3);
        assert_eq!(number, 2);
    }

    #[test]
    fn test_read_entity_bits_rejects_large_number() {
        // NUMBER16 with 1024 under the standard limit
        let mut sb = SizeBuf::from_bytes(vec![0x80, 0x01, 0x00, 0x04]);
        assert!(matches!(
            read_entity_bits(&mut sb, &ProtocolProfile::standard()),
            Err(WireError::ProtocolViolation { offset: 0, .. })
        ));
        let mut sb = SizeBuf::from_bytes(vec![0x80, 0x01, 0x00, 0x04]);
        assert_eq!(read_entity_bits(&mut sb, &extended()).unwrap().0, 1024);
    }

    #[test]
    fn test_morebits4_ignored_without_extensions() {
        let mut sb = SizeBuf::from_bytes(vec![0x80, 0x80, 0x80, 0x80, 0x07]);
        let (number, bits) = read_entity_bits(&mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(number, 7);
        assert_eq!(bits >> 32, 0);
    }

    #[test]
    fn test_write_delta_entity_full_roundtrip() {
        let from = EntityState::with_number(5);
        let to = EntityState {
            number: 5,
            origin: [80, -160, 240],
            angles: [byte2angle(64), byte2angle(128), 0],
            old_origin: [8, 8, 8],
            modelindex: 3,
            modelindex2: 255,
            frame: 300,
            skinnum: 0x12345,
            effects: 0x9000,
            renderfx: RF_FRAMELERP,
            solid: 0x1f1f,
            sound: 9,
            event: 2,
            ..EntityState::default()
        };
        let profile = ProtocolProfile::standard();
        let mut sb = SizeBuf::new();
        assert!(write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap());
        let (number, bits) = read_entity_bits(&mut sb, &profile).unwrap();
        assert_eq!(number, 5);
        assert_eq!(bits & (U_SKIN8 | U_SKIN16), U_SKIN8 | U_SKIN16);
        assert_eq!(bits & (U_EFFECTS8 | U_EFFECTS16), U_EFFECTS16);
        let decoded = read_delta_entity(&from, number, bits, &mut sb, &profile).unwrap();
        assert_eq!(decoded, to);
        assert_eq!(sb.remaining(), 0);
    }

    #[test]
    fn test_byte_angle_with_low_bits_refused() {
        let profile = ProtocolProfile::standard();
        let from = EntityState::with_number(4);
        let to = EntityState { angles: [1, 300, -5], ..from };
        let mut sb = SizeBuf::new();
        assert!(matches!(
            write_delta_entity(&from, &to, &mut sb, &profile, false),
            Err(WireError::ProtocolViolation { .. })
        ));
        assert!(sb.is_empty());

        // an unchanged angle is never written, so its low bits do not matter
        let from = EntityState { angles: [0, 0, 7], ..from };
        let to = EntityState { angles: [byte2angle(1), byte2angle(200), 7], ..from };
        write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap();
        let (n, decoded) = read_delta_header_and_body(&mut sb, &from, &profile);
        assert_eq!(n, 4);
        assert_eq!(decoded, to);

        let short = ProtocolProfile { flags: ProtocolFlags::SHORT_ANGLES, ..profile };
        let to = EntityState { angles: [1, 300, -5], ..from };
        let mut sb = SizeBuf::new();
        write_delta_entity(&from, &to, &mut sb, &short, false).unwrap();
        assert_eq!(read_delta_header_and_body(&mut sb, &from, &short).1, to);
    }

    #[test]
    fn test_width_selection_bytes() {
        let from = EntityState::with_number(9);
        let to = EntityState { skinnum: 0x1234, effects: 0x80, renderfx: 0x1200, ..from };
        let profile = ProtocolProfile::standard();
        assert_eq!(
            entity_delta_bits(&from, &to, &profile).unwrap(),
            U_SKIN16 | U_EFFECTS8 | U_RENDERFX16
        );
        let mut sb = SizeBuf::new();
        write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap();
        assert_eq!(
            sb.data,
            vec![0x80, 0xc0, 0x84, 0x02, 0x09, 0x34, 0x12, 0x80, 0x00, 0x12]
        );

        let to = EntityState { effects: 0xffff, renderfx: 0x10000, ..from };
        let bits = entity_delta_bits(&from, &to, &profile).unwrap();
        assert_eq!(bits & (U_EFFECTS8 | U_EFFECTS16), U_EFFECTS16);
        assert_eq!(bits & (U_RENDERFX8 | U_RENDERFX16), U_RENDERFX8 | U_RENDERFX16);
    }

    #[test]
    fn test_roundtrip_across_width_boundaries() {
        let values = [0u32, 1, 0xff, 0x100, 0x7fff, 0x8000, 0xffff, 0x10000, u32::MAX];
        let byte_angles = [0i16, 256, -256, i16::MIN, 0x7f00];
        let short_angles = [0i16, 1, 255, 256, -5, i16::MAX, i16::MIN];
        let standard = ProtocolProfile::standard();
        let short = ProtocolProfile { flags: ProtocolFlags::SHORT_ANGLES, ..standard };

        let mut states = Vec::new();
        for (i, &v) in values.iter().enumerate() {
            let rev = values[values.len() - 1 - i];
            states.push((
                standard,
                EntityState {
                    number: 12,
                    skinnum: v,
                    effects: rev,
                    renderfx: v ^ 0x55,
                    angles: [byte_angles[i % 5], byte_angles[(i + 2) % 5], byte_angles[(i + 4) % 5]],
                    ..EntityState::default()
                },
            ));
        }
        for (i, &a) in short_angles.iter().enumerate() {
            states.push((
                short,
                EntityState {
                    number: 300,
                    skinnum: values[i],
                    angles: [a, short_angles[(i + 3) % 7], a.wrapping_neg()],
                    ..EntityState::default()
                },
            ));
        }

        for (profile, to) in &states {
            for (_, from) in states.iter().filter(|(p, _)| p == profile) {
                let from = EntityState { number: to.number, ..*from };
                let mut sb = SizeBuf::new();
                write_delta_entity(&from, to, &mut sb, profile, true).unwrap();
                let (n, decoded) = read_delta_header_and_body(&mut sb, &from, profile);
                assert_eq!(n, to.number);
                assert_eq!(decoded, *to, "from {:?}", from);
                assert_eq!(sb.remaining(), 0);
            }
        }
    }

    #[test]
    fn test_extension_fields_roundtrip() {
        let profile = extended();
        let from = EntityState::with_number(2000);
        let to = EntityState {
            number: 2000,
            angles: [1, -2, 3],
            modelindex: 700,
            sound: 1000,
            solid: 0x1234_5678,
            morefx: 0x20000,
            alpha: 128,
            scale: 64,
            ..from
        };
        let mut sb = SizeBuf::new();
        write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap();
        let (number, bits) = read_entity_bits(&mut sb, &profile).unwrap();
        assert_ne!(bits & U_MOREBITS4, 0);
        assert_ne!(bits & U_ANGLE16, 0);
        let decoded = read_delta_entity(&from, number, bits, &mut sb, &profile).unwrap();
        assert_eq!(decoded, to);
        assert_eq!(sb.remaining(), 0);
    }

    #[test]
    fn test_extension_fields_refused_without_tier() {
        let from = EntityState::with_number(1);
        let to = EntityState { alpha: 10, ..from };
        let mut sb = SizeBuf::new();
        assert!(write_delta_entity(&from, &to, &mut sb, &ProtocolProfile::standard(), false).is_err());

        let to = EntityState { modelindex: 256, ..from };
        assert!(write_delta_entity(&from, &to, &mut sb, &ProtocolProfile::standard(), false).is_err());
        assert!(sb.is_empty());
    }

    #[test]
    fn test_long_solid_needs_flag() {
        let from = EntityState::with_number(1);
        let to = EntityState { solid: 0x10000, ..from };
        let mut sb = SizeBuf::new();
        let profile = ProtocolProfile {
            flags: ProtocolFlags::LONG_SOLID,
            ..ProtocolProfile::standard()
        };
        write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap();
        let (n, bits) = read_entity_bits(&mut sb, &profile).unwrap();
        assert_eq!(read_delta_entity(&from, n, bits, &mut sb, &profile).unwrap().solid, 0x10000);
        assert!(write_delta_entity(&from, &to, &mut sb, &ProtocolProfile::standard(), false).is_err());
    }

    #[test]
    fn test_msg_write_delta_entity_no_change_no_force() {
        let state = EntityState { number: 7, origin: [1, 2, 3], ..EntityState::default() };
        let mut sb = SizeBuf::new();
        assert!(!write_delta_entity(&state, &state, &mut sb, &ProtocolProfile::standard(), false).unwrap());
        assert!(sb.is_empty());
        assert!(write_delta_entity(&state, &state, &mut sb, &ProtocolProfile::standard(), true).unwrap());
        assert_eq!(sb.data, vec![0x00, 0x07]);
    }

    #[test]
    fn test_beam_always_sends_old_origin() {
        let state = EntityState {
            number: 3,
            renderfx: RF_BEAM,
            old_origin: [5, 6, 7],
            ..EntityState::default()
        };
        let bits = entity_delta_bits(&state, &state, &ProtocolProfile::standard()).unwrap();
        assert_eq!(bits, U_OLDORIGIN);
    }

    #[test]
    fn test_remove_marker_roundtrip() {
        let from = EntityState::with_number(300);
        let to = EntityState { removed: true, ..from };
        let profile = ProtocolProfile::standard();
        let mut sb = SizeBuf::new();
        write_delta_entity(&from, &to, &mut sb, &profile, false).unwrap();
        assert_eq!(sb.data, vec![0xc0, 0x01, 0x2c, 0x01]);
        let (n, decoded) = read_delta_header_and_body(&mut sb, &from, &profile);
        assert_eq!(n, 300);
        assert!(decoded.removed);
    }

    fn read_delta_header_and_body(sb: &mut SizeBuf, from: &EntityState, profile: &ProtocolProfile) -> (u16, EntityState) {
        let (n, bits) = read_entity_bits(sb, profile).unwrap();
        (n, read_delta_entity(from, n, bits, sb, profile).unwrap())
    }

    #[test]
    fn test_truncated_delta() {
        // ORIGIN1 set but no coordinate follows
        let mut sb = SizeBuf::from_bytes(vec![0x01, 0x04]);
        let profile = ProtocolProfile::standard();
        let (n, bits) = read_entity_bits(&mut sb, &profile).unwrap();
        assert!(matches!(
            read_delta_entity(&EntityState::default(), n, bits, &mut sb, &profile),
            Err(WireError::UnexpectedEndOfBuffer { offset: 2, .. })
        ));
    }

    #[test]
    fn test_terminator() {
        let mut sb = SizeBuf::new();
        write_entity_terminator(&mut sb);
        assert_eq!(sb.data, vec![0, 0]);
        assert_eq!(read_entity_bits(&mut sb, &ProtocolProfile::standard()).unwrap(), (0, 0));
    }
}
