// mvd.rs — multi-view demo files: "MVD2" magic, u16 packets, optional gzip

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use myq2_wire::delta_entity::{entity_delta_bits, write_entity_fields, write_entity_terminator};
use myq2_wire::delta_player::{packed_delta_flags, write_delta_playerstate_packed};
use myq2_wire::messages::{ConfigString, Multicast, MulticastTo, Print, Sound, Unicast};
use myq2_wire::q_shared::CLIENTNUM_NONE;
use myq2_wire::qcommon::*;
use myq2_wire::sizebuf::*;
use myq2_wire::{Frame, ProtocolProfile, ServerData, ServerMessage, WireError, WireResult};

use crate::assembler::{delta_reference, MvdAssembler, MvdEncoderState};
use crate::config::ParseOptions;
use crate::demo::Demo;
use crate::dispatch::Dispatcher;
use crate::dm2::read_full;
use crate::error::{DemoError, DemoResult};

/// "MVD2" read as a little-endian u32.
pub const MVD_MAGIC: u32 = 0x3244_564D;
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const MAX_PACKET_LEN: usize = 0xffff;

/// Payload lengths and sound indices borrow the command's top bits.
const MAX_EXTRA_LEN: usize = 1 << (8 + 3);

pub fn mvd_name(op: u8) -> &'static str {
    match op {
        MVD_BAD => "bad",
        MVD_NOP => "nop",
        MVD_DISCONNECT => "disconnect",
        MVD_RECONNECT => "reconnect",
        MVD_SERVERDATA => "serverdata",
        MVD_CONFIGSTRING => "configstring",
        MVD_FRAME => "frame",
        MVD_FRAME_NODELTA => "frame_nodelta",
        MVD_UNICAST => "unicast",
        MVD_UNICAST_R => "unicast_r",
        MVD_MULTICAST_ALL => "multicast_all",
        MVD_MULTICAST_PHS => "multicast_phs",
        MVD_MULTICAST_PVS => "multicast_pvs",
        MVD_MULTICAST_ALL_R => "multicast_all_r",
        MVD_MULTICAST_PHS_R => "multicast_phs_r",
        MVD_MULTICAST_PVS_R => "multicast_pvs_r",
        MVD_SOUND => "sound",
        MVD_PRINT => "print",
        MVD_STUFFTEXT => "stufftext",
        _ => "unknown",
    }
}

/// Decodes a multi-view sub-message other than server data and frames.
/// Returns `Ok(None)` for unknown commands.
fn read_mvd_message(op: u8, extra: u8, msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<Option<ServerMessage>> {
    let start = msg.readcount;
    let extra = usize::from(extra);
    let message = match op {
        MVD_NOP => ServerMessage::Nop,
        MVD_DISCONNECT => ServerMessage::Disconnect,
        MVD_RECONNECT => ServerMessage::Reconnect,
        MVD_CONFIGSTRING => {
            let index = msg_read_word(msg)?;
            profile.remap.check_index(index, start)?;
            ServerMessage::ConfigString(ConfigString { index, value: msg_read_string(msg)? })
        }
        MVD_UNICAST | MVD_UNICAST_R => {
            let len = usize::from(msg_read_byte(msg)?) | extra << 8;
            let client = msg_read_byte(msg)?;
            ServerMessage::Unicast(Unicast {
                client,
                reliable: op == MVD_UNICAST_R,
                data: msg_read_data(msg, len)?,
            })
        }
        MVD_MULTICAST_ALL..=MVD_MULTICAST_PVS_R => {
            let (to, reliable) = match op {
                MVD_MULTICAST_ALL => (MulticastTo::All, false),
                MVD_MULTICAST_PHS => (MulticastTo::Phs, false),
                MVD_MULTICAST_PVS => (MulticastTo::Pvs, false),
                MVD_MULTICAST_ALL_R => (MulticastTo::All, true),
                MVD_MULTICAST_PHS_R => (MulticastTo::Phs, true),
                _ => (MulticastTo::Pvs, true),
            };
            let len = usize::from(msg_read_byte(msg)?) | extra << 8;
            let leaf = match to {
                MulticastTo::All => None,
                _ => Some(msg_read_word(msg)?),
            };
            ServerMessage::Multicast(Multicast { to, reliable, leaf, data: msg_read_data(msg, len)? })
        }
        MVD_SOUND => {
            let flags = msg_read_byte(msg)?;
            let mut snd = Sound {
                index: u16::from(msg_read_byte(msg)?) | (extra as u16) << 8,
                ..Sound::default()
            };
            if flags & SND_VOLUME != 0 { snd.volume = Some(msg_read_byte(msg)?); }
            if flags & SND_ATTENUATION != 0 { snd.attenuation = Some(msg_read_byte(msg)?); }
            if flags & SND_OFFSET != 0 { snd.offset = Some(msg_read_byte(msg)?); }
            let sendchan = msg_read_word(msg)?;
            snd.entity = Some(sendchan >> 3);
            snd.channel = (sendchan & 7) as u8;
            ServerMessage::Sound(snd)
        }
        MVD_PRINT => ServerMessage::Print(Print {
            level: msg_read_byte(msg)?,
            text: msg_read_string(msg)?,
        }),
        MVD_STUFFTEXT => ServerMessage::StuffText(msg_read_string(msg)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

fn oversized(offset: u64, limit: u64) -> DemoError {
    DemoError::decode(
        offset,
        "gzip",
        WireError::InvalidFormat(format!("decompressed stream exceeds {} bytes", limit)),
    )
}

/// Incremental multi-view parser. Every server data message opens a new
/// segment; [`finish`](Self::finish) returns them all, including frames
/// decoded before an error.
pub struct MvdReader<'d> {
    reader: Box<dyn Read + 'd>,
    options: ParseOptions,
    dispatcher: Dispatcher<'d>,
    compressed: bool,
    /// Bytes taken from the (decompressed) stream so far.
    consumed: u64,
    assembler: Option<MvdAssembler>,
    current: Option<Demo>,
    segments: Vec<Demo>,
    pending: Vec<ServerMessage>,
    offset: u64,
    done: bool,
}

impl<'d> MvdReader<'d> {
    pub fn new(reader: impl Read + 'd) -> DemoResult<Self> {
        Self::with_options(reader, ParseOptions::default())
    }

    /// Sniffs gzip, then checks the magic.
    pub fn with_options(reader: impl Read + 'd, options: ParseOptions) -> DemoResult<Self> {
        let mut buffered = BufReader::new(reader);
        let compressed = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
        let mut reader: Box<dyn Read + 'd> = if compressed {
            debug!("gzip compressed stream");
            // one byte past the bound, so overrunning it is distinguishable from the end
            let bound = options.max_decompressed_size.saturating_add(1);
            Box::new(MultiGzDecoder::new(buffered).take(bound))
        } else {
            Box::new(buffered)
        };

        let mut magic = [0u8; 4];
        let got = read_full(&mut reader, &mut magic)?;
        if compressed && got as u64 > options.max_decompressed_size {
            return Err(oversized(0, options.max_decompressed_size));
        }
        if got < 4 || u32::from_le_bytes(magic) != MVD_MAGIC {
            return Err(DemoError::decode(
                0,
                "magic",
                WireError::InvalidFormat("not a multi-view demo".into()),
            ));
        }

        Ok(Self {
            reader,
            options,
            dispatcher: Dispatcher::new(),
            compressed,
            consumed: got as u64,
            assembler: None,
            current: None,
            segments: Vec::new(),
            pending: Vec::new(),
            offset: 4,
            done: false,
        })
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<'d> {
        &mut self.dispatcher
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Offset of the next packet in the decompressed stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads and decodes one packet. Returns `Ok(false)` at the end marker
    /// or a clean end of stream.
    pub fn read_packet(&mut self) -> DemoResult<bool> {
        if self.done {
            return Ok(false);
        }
        let packet_offset = self.offset;

        let mut len_bytes = [0u8; 2];
        match self.read_bounded(&mut len_bytes, packet_offset)? {
            0 => {
                self.done = true;
                return Ok(false);
            }
            2 => {}
            n => {
                self.done = true;
                return Err(DemoError::decode(
                    packet_offset,
                    "packet",
                    WireError::UnexpectedEndOfBuffer { offset: n, needed: 2, remaining: n },
                ));
            }
        }
        let len = usize::from(u16::from_le_bytes(len_bytes));
        if len == 0 {
            self.done = true;
            return Ok(false);
        }

        let mut data = vec![0u8; len];
        let got = self.read_bounded(&mut data, packet_offset)?;
        if got < len {
            self.done = true;
            return Err(DemoError::decode(
                packet_offset,
                "packet",
                WireError::UnexpectedEndOfBuffer { offset: got, needed: len - got, remaining: 0 },
            ));
        }
        self.offset += 2 + len as u64;

        if let Err(e) = self.parse_packet(packet_offset, data) {
            self.done = true;
            return Err(e);
        }
        Ok(true)
    }

    /// Reads up to `buf.len()` bytes, failing once a compressed stream
    /// inflates past `max_decompressed_size`.
    fn read_bounded(&mut self, buf: &mut [u8], packet_offset: u64) -> DemoResult<usize> {
        let got = read_full(&mut self.reader, buf)?;
        self.consumed += got as u64;
        if self.compressed && self.consumed > self.options.max_decompressed_size {
            self.done = true;
            return Err(oversized(packet_offset, self.options.max_decompressed_size));
        }
        Ok(got)
    }

    fn parse_packet(&mut self, offset: u64, data: Vec<u8>) -> DemoResult<()> {
        let mut msg = SizeBuf::from_bytes(data);

        while msg.remaining() > 0 {
            let start = msg.readcount;
            let cmd = msg_read_byte(&mut msg).map_err(|e| DemoError::decode(offset, "packet", e))?;
            let op = cmd & SVCMD_MASK;
            let extra = cmd >> SVCMD_BITS;
            let tag = mvd_name(op);
            let ctx = |e| DemoError::decode(offset, tag, e);

            match op {
                MVD_SERVERDATA => self.parse_serverdata(&mut msg, extra).map_err(ctx)?,
                MVD_FRAME | MVD_FRAME_NODELTA => {
                    self.parse_frame(&mut msg, op == MVD_FRAME_NODELTA).map_err(ctx)?
                }
                _ => {
                    let profile = self
                        .current
                        .as_ref()
                        .map(|d| d.profile)
                        .unwrap_or_default();
                    match read_mvd_message(op, extra, &mut msg, &profile).map_err(ctx)? {
                        Some(message) => self.absorb(message, start).map_err(ctx)?,
                        None => {
                            if self.options.strict_tags {
                                return Err(ctx(WireError::violation(start, format!("unknown command {}", op))));
                            }
                            warn!(
                                "packet at {}: unknown command {} at {}, skipping {} bytes",
                                offset,
                                op,
                                start,
                                msg.remaining()
                            );
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Server data, the configstring dump and the initial frame.
    fn parse_serverdata(&mut self, msg: &mut SizeBuf, extra: u8) -> WireResult<()> {
        let start = msg.readcount;
        let protocol = msg_read_long(msg)?;
        if protocol != PROTOCOL_VERSION_MVD {
            return Err(WireError::UnsupportedProtocolVersion {
                found: protocol,
                expected: PROTOCOL_VERSION_MVD,
            });
        }
        let minor = msg_read_word(msg)?;
        let flags = if minor >= PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2 {
            msg_read_word(msg)?
        } else {
            u16::from(extra)
        };
        let profile = ProtocolProfile::from_mvd(minor, flags, start)?;

        let serverdata = ServerData {
            protocol,
            minor_version: minor,
            flags,
            server_count: msg_read_long(msg)?,
            demo: false,
            game_dir: msg_read_string(msg)?,
            client_number: msg_read_short(msg)?,
            map_name: String::new(),
        };
        debug!(
            "serverdata: minor {} flags {:#x} count {} game {:?}",
            minor, flags, serverdata.server_count, serverdata.game_dir
        );

        self.close_segment();
        let mut demo = Demo::new(serverdata.clone(), profile);
        self.dispatcher.dispatch(&ServerMessage::ServerData(serverdata));

        loop {
            let index_offset = msg.readcount;
            let index = msg_read_word(msg)?;
            if index == profile.remap.end {
                break;
            }
            let value = msg_read_string(msg)?;
            demo.configstrings.set(index, value.clone(), index_offset)?;
            self.dispatcher
                .dispatch(&ServerMessage::ConfigString(ConfigString { index, value }));
        }

        let mut assembler = MvdAssembler::new(profile, self.options.unknown_player_policy);
        if let Some(n) = demo.configstrings.max_clients() {
            assembler.set_max_clients(n);
        }
        let frame = assembler.parse_frame(msg)?;

        self.assembler = Some(assembler);
        self.current = Some(demo);
        self.record_frame(frame);
        Ok(())
    }

    fn parse_frame(&mut self, msg: &mut SizeBuf, nodelta: bool) -> WireResult<()> {
        let start = msg.readcount;
        let Some(assembler) = self.assembler.as_mut() else {
            return Err(WireError::violation(start, "frame before server data"));
        };
        if nodelta {
            assembler.clear();
        }
        let frame = assembler.parse_frame(msg)?;
        self.record_frame(frame);
        Ok(())
    }

    fn record_frame(&mut self, mut frame: Frame) {
        let Some(demo) = self.current.as_mut() else {
            return;
        };
        frame.messages = std::mem::take(&mut self.pending);
        let message = ServerMessage::Frame(Box::new(frame));
        self.dispatcher.dispatch(&message);
        demo.frame_count += 1;
        if self.options.retain_frames {
            if let ServerMessage::Frame(frame) = message {
                demo.frames.push(*frame);
            }
        }
    }

    fn absorb(&mut self, message: ServerMessage, start: usize) -> WireResult<()> {
        if self.current.is_none() {
            return Err(WireError::violation(
                start,
                format!("{} before server data", message.kind().name()),
            ));
        }
        self.dispatcher.dispatch(&message);
        match message {
            ServerMessage::Nop => {}
            ServerMessage::ConfigString(cs) => {
                if let Some(assembler) = self.assembler.as_mut() {
                    if cs.index == assembler.profile().remap.maxclients {
                        if let Ok(n) = cs.value.trim().parse() {
                            assembler.set_max_clients(n);
                        }
                    }
                }
                self.pending.push(ServerMessage::ConfigString(cs));
            }
            other => self.pending.push(other),
        }
        Ok(())
    }

    fn close_segment(&mut self) {
        if let Some(mut demo) = self.current.take() {
            demo.trailing = std::mem::take(&mut self.pending);
            self.segments.push(demo);
        }
        self.assembler = None;
    }

    /// Ends the parse, returning every segment decoded so far.
    pub fn finish(mut self) -> Vec<Demo> {
        self.close_segment();
        self.segments
    }

    pub fn read_all(mut self) -> DemoResult<Vec<Demo>> {
        while self.read_packet()? {}
        let segments = self.finish();
        if segments.is_empty() {
            return Err(DemoError::decode(
                4,
                "serverdata",
                WireError::InvalidFormat("no server data in stream".into()),
            ));
        }
        Ok(segments)
    }
}

pub fn parse<R: Read>(reader: R) -> DemoResult<Vec<Demo>> {
    MvdReader::new(reader)?.read_all()
}

pub fn parse_with_options<R: Read>(reader: R, options: ParseOptions) -> DemoResult<Vec<Demo>> {
    MvdReader::with_options(reader, options)?.read_all()
}

pub fn parse_file(path: impl AsRef<Path>, options: ParseOptions) -> DemoResult<Vec<Demo>> {
    let file = File::open(path)?;
    parse_with_options(file, options)
}

// ============================================================
// Writing
// ============================================================

/// Accumulates sub-messages into u16-length packets.
struct PacketWriter<'w> {
    out: &'w mut Vec<u8>,
    packet: SizeBuf,
}

impl<'w> PacketWriter<'w> {
    fn push(&mut self, part: &SizeBuf) -> DemoResult<()> {
        if part.cursize() > MAX_PACKET_LEN {
            return Err(DemoError::Encode(WireError::violation(
                0,
                format!("{} byte message exceeds packet limit", part.cursize()),
            )));
        }
        if self.packet.cursize() + part.cursize() > MAX_PACKET_LEN {
            self.flush();
        }
        self.packet.append(part);
        Ok(())
    }

    fn flush(&mut self) {
        if self.packet.is_empty() {
            return;
        }
        self.out.extend_from_slice(&(self.packet.cursize() as u16).to_le_bytes());
        self.out.extend_from_slice(self.packet.as_bytes());
        self.packet.clear();
    }
}

fn command(op: u8, extra: usize) -> u8 {
    op | ((extra as u8) << SVCMD_BITS)
}

fn check_extra_len(len: usize, what: &str) -> WireResult<()> {
    if len >= MAX_EXTRA_LEN {
        return Err(WireError::violation(0, format!("{} of {} does not fit a multi-view command", what, len)));
    }
    Ok(())
}

/// Writes one sub-message in the multi-view encoding. Messages with no
/// multi-view form travel as a reliable broadcast of their single-view
/// encoding.
pub fn write_mvd_message(m: &ServerMessage, msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<()> {
    match m {
        ServerMessage::Nop => msg_write_byte(msg, MVD_NOP),
        ServerMessage::Disconnect => msg_write_byte(msg, MVD_DISCONNECT),
        ServerMessage::Reconnect => msg_write_byte(msg, MVD_RECONNECT),
        ServerMessage::ConfigString(cs) => {
            profile.remap.check_index(cs.index, 0)?;
            msg_write_byte(msg, MVD_CONFIGSTRING);
            msg_write_word(msg, cs.index);
            msg_write_string(msg, &cs.value);
        }
        ServerMessage::Unicast(u) => {
            let len = u.data.len();
            check_extra_len(len, "unicast length")?;
            let op = if u.reliable { MVD_UNICAST_R } else { MVD_UNICAST };
            msg_write_byte(msg, command(op, len >> 8));
            msg_write_byte(msg, (len & 0xff) as u8);
            msg_write_byte(msg, u.client);
            msg_write_data(msg, &u.data);
        }
        ServerMessage::Multicast(mc) => {
            let len = mc.data.len();
            check_extra_len(len, "multicast length")?;
            let op = match (mc.to, mc.reliable) {
                (MulticastTo::All, false) => MVD_MULTICAST_ALL,
                (MulticastTo::Phs, false) => MVD_MULTICAST_PHS,
                (MulticastTo::Pvs, false) => MVD_MULTICAST_PVS,
                (MulticastTo::All, true) => MVD_MULTICAST_ALL_R,
                (MulticastTo::Phs, true) => MVD_MULTICAST_PHS_R,
                (MulticastTo::Pvs, true) => MVD_MULTICAST_PVS_R,
            };
            msg_write_byte(msg, command(op, len >> 8));
            msg_write_byte(msg, (len & 0xff) as u8);
            if mc.to != MulticastTo::All {
                msg_write_word(msg, mc.leaf.unwrap_or(0));
            }
            msg_write_data(msg, &mc.data);
        }
        ServerMessage::Sound(snd) => {
            let index = usize::from(snd.index);
            check_extra_len(index, "sound index")?;
            msg_write_byte(msg, command(MVD_SOUND, index >> 8));
            msg_write_byte(msg, snd.flags() & (SND_VOLUME | SND_ATTENUATION | SND_OFFSET));
            msg_write_byte(msg, (index & 0xff) as u8);
            if let Some(v) = snd.volume { msg_write_byte(msg, v); }
            if let Some(a) = snd.attenuation { msg_write_byte(msg, a); }
            if let Some(o) = snd.offset { msg_write_byte(msg, o); }
            let entity = snd.entity.unwrap_or(0);
            msg_write_word(msg, (entity << 3) | u16::from(snd.channel & 7));
        }
        ServerMessage::Print(p) => {
            msg_write_byte(msg, MVD_PRINT);
            msg_write_byte(msg, p.level);
            msg_write_string(msg, &p.text);
        }
        ServerMessage::StuffText(s) => {
            msg_write_byte(msg, MVD_STUFFTEXT);
            msg_write_string(msg, s);
        }
        ServerMessage::ServerData(_) | ServerMessage::Frame(_) => {
            return Err(WireError::violation(
                0,
                format!("{} is written with its segment", m.kind().name()),
            ));
        }
        other => {
            let mut payload = SizeBuf::new();
            other.write_svc(&mut payload, &ProtocolProfile::standard())?;
            let wrapped = ServerMessage::Multicast(Multicast {
                to: MulticastTo::All,
                reliable: true,
                leaf: None,
                data: payload.into_bytes(),
            });
            write_mvd_message(&wrapped, msg, profile)?;
        }
    }
    Ok(())
}

/// Writes a frame body (no command byte) against the encoder's tables.
pub fn write_mvd_frame(
    msg: &mut SizeBuf,
    frame: &Frame,
    state: &mut MvdEncoderState,
    profile: &ProtocolProfile,
) -> WireResult<()> {
    let portalbytes = u8::try_from(frame.areabits.len())
        .map_err(|_| WireError::violation(0, format!("{} portal bytes do not fit a frame", frame.areabits.len())))?;
    msg_write_byte(msg, portalbytes);
    msg_write_data(msg, &frame.areabits);

    for (&number, ps) in &frame.players {
        if number == CLIENTNUM_NONE {
            return Err(WireError::violation(0, "player number 255 is the list terminator"));
        }
        let (prev, inuse) = state.player(number);
        if packed_delta_flags(&prev, ps, profile) != 0 || !inuse {
            msg_write_byte(msg, number);
            write_delta_playerstate_packed(&prev, ps, 0, msg, profile)?;
        }
        state.set_player(number, ps.clone(), true);
    }
    for number in state.active_players() {
        if !frame.players.contains_key(&number) {
            let (prev, _) = state.player(number);
            msg_write_byte(msg, number);
            write_delta_playerstate_packed(&prev, &prev, P_REMOVE, msg, profile)?;
            state.set_player(number, prev, false);
        }
    }
    msg_write_byte(msg, CLIENTNUM_NONE);

    for (&number, to) in &frame.entities {
        let (prev, inuse) = state.entity(number);
        let reference = delta_reference(&prev, to);
        let bits = entity_delta_bits(&reference, to, profile)?;
        if bits & !U_NUMBER16 != 0 || !inuse {
            write_entity_fields(to, bits, msg, profile);
        }
        state.set_entity(*to, true);
    }
    for number in state.active_entities() {
        if !frame.entities.contains_key(&number) {
            let (prev, _) = state.entity(number);
            write_entity_fields(&prev, U_REMOVE, msg, profile);
            state.set_entity(prev, false);
        }
    }
    write_entity_terminator(msg);
    Ok(())
}

fn write_serverdata(msg: &mut SizeBuf, demo: &Demo) -> WireResult<()> {
    let profile = &demo.profile;
    let sd = &demo.serverdata;

    let mut flags = sd.flags & !(MVF_EXTLIMITS | MVF_EXTLIMITS_2);
    let mut minor = sd.minor_version.clamp(PROTOCOL_VERSION_MVD_MINIMUM, PROTOCOL_VERSION_MVD_CURRENT);
    if profile.extensions() {
        flags |= MVF_EXTLIMITS;
        minor = minor.max(PROTOCOL_VERSION_MVD_EXTENDED_LIMITS);
    }
    if profile.extensions2() {
        flags |= MVF_EXTLIMITS_2;
        minor = minor.max(PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2);
    }

    if minor >= PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2 {
        msg_write_byte(msg, MVD_SERVERDATA);
    } else {
        if flags >= 1 << (8 - SVCMD_BITS) {
            return Err(WireError::violation(0, format!("flags {:#x} need minor version 2012", flags)));
        }
        msg_write_byte(msg, command(MVD_SERVERDATA, usize::from(flags)));
    }
    msg_write_long(msg, PROTOCOL_VERSION_MVD);
    msg_write_word(msg, minor);
    if minor >= PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2 {
        msg_write_word(msg, flags);
    }
    msg_write_long(msg, sd.server_count);
    msg_write_string(msg, &sd.game_dir);
    msg_write_short(msg, sd.client_number);

    for (index, value) in demo.configstrings.iter() {
        profile.remap.check_index(index, 0)?;
        msg_write_word(msg, index);
        msg_write_string(msg, value);
    }
    msg_write_word(msg, profile.remap.end);
    Ok(())
}

fn write_segment(packets: &mut PacketWriter<'_>, demo: &Demo) -> DemoResult<()> {
    let profile = demo.profile;
    let mut state = MvdEncoderState::default();

    let mut first = SizeBuf::new();
    write_serverdata(&mut first, demo)?;
    let initial = demo.frames.first().cloned().unwrap_or_default();
    write_mvd_frame(&mut first, &initial, &mut state, &profile)?;
    packets.flush();
    packets.push(&first)?;
    packets.flush();

    for (i, frame) in demo.frames.iter().enumerate() {
        for m in &frame.messages {
            if matches!(m, ServerMessage::Frame(_) | ServerMessage::ServerData(_)) {
                continue;
            }
            let mut part = SizeBuf::new();
            write_mvd_message(m, &mut part, &profile)?;
            packets.push(&part)?;
        }
        if i == 0 {
            continue;
        }
        let mut part = SizeBuf::new();
        msg_write_byte(&mut part, MVD_FRAME);
        write_mvd_frame(&mut part, frame, &mut state, &profile)?;
        packets.push(&part)?;
        packets.flush();
    }

    for m in &demo.trailing {
        let mut part = SizeBuf::new();
        write_mvd_message(m, &mut part, &profile)?;
        packets.push(&part)?;
    }
    packets.flush();
    Ok(())
}

/// Writes `segments` as one multi-view stream, gzip wrapped when asked.
/// Each segment starts with its server data packet, which also carries
/// the first frame.
pub fn write_demo<W: Write>(segments: &[Demo], writer: &mut W, gzip: bool) -> DemoResult<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&MVD_MAGIC.to_le_bytes());
    {
        let mut packets = PacketWriter { out: &mut body, packet: SizeBuf::new() };
        for demo in segments {
            write_segment(&mut packets, demo)?;
        }
        packets.flush();
    }
    body.extend_from_slice(&0u16.to_le_bytes());

    if gzip {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(&body)?;
        encoder.finish()?.flush()?;
    } else {
        writer.write_all(&body)?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use myq2_wire::q_shared::CS_NAME;
    use myq2_wire::{EntityState, PlayerState};

    fn segment(minor: u16, flags: u16, frames: usize) -> Demo {
        let profile = ProtocolProfile::from_mvd(minor, flags, 0).unwrap();
        let sd = ServerData {
            protocol: PROTOCOL_VERSION_MVD,
            minor_version: minor,
            flags,
            server_count: 99,
            game_dir: "baseq2".into(),
            client_number: -1,
            ..ServerData::default()
        };
        let mut demo = Demo::new(sd, profile);
        demo.configstrings.set(CS_NAME, "q2dm1", 0).unwrap();
        demo.configstrings.set(profile.remap.maxclients, "8", 0).unwrap();
        demo.configstrings.set(profile.remap.playerskins, "alice\\male/grunt", 0).unwrap();
        demo.configstrings.set(profile.remap.playerskins + 1, "bob\\female/athena", 0).unwrap();

        for n in 0..frames {
            let i = n as i16;
            let mut players = BTreeMap::new();
            players.insert(0, PlayerState { fov: 90, viewangles: [i, 2 * i, 0], ..PlayerState::default() });
            if n % 3 != 2 {
                players.insert(1, PlayerState { fov: 100, gunframe: n as u8, ..PlayerState::default() });
            }
            let mut entities = BTreeMap::new();
            entities.insert(1, EntityState { number: 1, modelindex: 255, origin: [i * 8, 0, 0], old_origin: [(i - 1).max(0) * 8, 0, 0], ..EntityState::default() });
            if n % 2 == 0 {
                entities.insert(2, EntityState { number: 2, modelindex: 4, event: 1, origin: [16, 16, 16], old_origin: [16, 16, 16], ..EntityState::default() });
            }
            let messages = match n {
                1 => vec![
                    ServerMessage::Print(Print { level: 2, text: "bob entered the game\n".into() }),
                    ServerMessage::Sound(Sound { index: 300, volume: Some(128), entity: Some(1), channel: 2, ..Sound::default() }),
                ],
                2 => vec![
                    ServerMessage::Unicast(Unicast { client: 1, reliable: true, data: vec![SVC_CENTERPRINT, b'h', b'i', 0] }),
                    ServerMessage::Multicast(Multicast { to: MulticastTo::Phs, reliable: false, leaf: Some(12), data: vec![0; 300] }),
                    ServerMessage::ConfigString(ConfigString { index: profile.remap.playerskins + 2, value: "carol\\female/jezebel".into() }),
                ],
                _ => Vec::new(),
            };
            demo.frames.push(Frame {
                number: n as i32,
                valid: true,
                areabits: vec![0xff; 2],
                players,
                entities,
                messages,
                ..Frame::default()
            });
        }
        demo.frame_count = frames;
        demo.trailing = vec![ServerMessage::StuffText("disconnect\n".into())];
        demo
    }

    #[test]
    fn test_write_then_parse_segments() {
        let segments = vec![segment(2010, MVF_NOMSGS, 6), segment(2012, MVF_EXTLIMITS | MVF_EXTLIMITS_2, 4)];
        let mut bytes = Vec::new();
        write_demo(&segments, &mut bytes, false).unwrap();
        assert_eq!(&bytes[..4], b"MVD2");
        // pre-2012 streams carry the flags in the command's top bits
        assert_eq!(bytes[6], MVD_SERVERDATA | (MVF_NOMSGS as u8) << 5);

        let parsed = parse(&bytes[..]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed, segments);
        assert!(parsed[1].profile.extensions2());
        assert_eq!(parsed[0].players().len(), 3);
    }

    #[test]
    fn test_gzip_matches_plain() {
        let segments = vec![segment(2010, 0, 5)];
        let mut plain = Vec::new();
        write_demo(&segments, &mut plain, false).unwrap();
        let mut gz = Vec::new();
        write_demo(&segments, &mut gz, true).unwrap();
        assert_eq!(&gz[..2], &GZIP_MAGIC);

        let reader = MvdReader::new(&gz[..]).unwrap();
        assert!(reader.is_compressed());
        assert_eq!(reader.read_all().unwrap(), parse(&plain[..]).unwrap());
    }

    #[test]
    fn test_decompressed_bound_is_an_error() {
        let segments = vec![segment(2010, 0, 10)];
        let mut plain = Vec::new();
        write_demo(&segments, &mut plain, false).unwrap();
        let mut gz = Vec::new();
        write_demo(&segments, &mut gz, true).unwrap();

        // room for the magic and the first packet only
        let first = u64::from(u16::from_le_bytes([plain[4], plain[5]]));
        let options = ParseOptions { max_decompressed_size: 4 + 2 + first, ..ParseOptions::default() };
        let mut reader = MvdReader::with_options(&gz[..], options.clone()).unwrap();
        assert!(reader.read_packet().unwrap());
        let err = reader.read_packet().err().unwrap();
        assert!(matches!(err, DemoError::Decode { tag: "gzip", source: WireError::InvalidFormat(_), .. }));
        assert!(!reader.read_packet().unwrap());
        assert_eq!(reader.finish()[0].frames.len(), 1);
        assert!(parse_with_options(&gz[..], options).is_err());

        // exactly the stream's size is fine
        let options = ParseOptions { max_decompressed_size: plain.len() as u64, ..ParseOptions::default() };
        assert_eq!(parse_with_options(&gz[..], options).unwrap(), segments);

        // the bound only applies to compressed input
        let options = ParseOptions { max_decompressed_size: 8, ..ParseOptions::default() };
        assert_eq!(parse_with_options(&plain[..], options).unwrap(), segments);
    }

    #[test]
    fn test_bad_magic() {
        let err = parse(&b"MVD1\x00\x00"[..]).err().unwrap();
        assert!(matches!(err, DemoError::Decode { tag: "magic", source: WireError::InvalidFormat(_), .. }));
    }

    #[test]
    fn test_truncated_keeps_segments() {
        let segments = vec![segment(2010, 0, 6)];
        let mut bytes = Vec::new();
        write_demo(&segments, &mut bytes, false).unwrap();
        // end marker and trailing packet, then into the last frame
        bytes.truncate(bytes.len() - 20);

        let mut reader = MvdReader::new(&bytes[..]).unwrap();
        let err = loop {
            match reader.read_packet() {
                Ok(true) => continue,
                Ok(false) => panic!("truncation not detected"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err.wire(), Some(WireError::UnexpectedEndOfBuffer { .. })));
        let partial = reader.finish();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].frames.len(), 5);
    }

    #[test]
    fn test_rejects_other_protocol() {
        let mut bytes = MVD_MAGIC.to_le_bytes().to_vec();
        let body = [MVD_SERVERDATA, 34, 0, 0, 0];
        bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&body);
        assert!(matches!(
            parse(&bytes[..]),
            Err(DemoError::Decode {
                offset: 4,
                tag: "serverdata",
                source: WireError::UnsupportedProtocolVersion { found: 34, expected: 37 },
            })
        ));
    }

    #[test]
    fn test_frame_before_serverdata() {
        let mut bytes = MVD_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[4, 0, MVD_FRAME, 0, CLIENTNUM_NONE, 0]);
        assert!(matches!(
            parse(&bytes[..]),
            Err(DemoError::Decode { tag: "frame", source: WireError::ProtocolViolation { .. }, .. })
        ));
    }

    #[test]
    fn test_wraps_single_view_messages() {
        let mut sb = SizeBuf::new();
        let profile = ProtocolProfile::standard();
        write_mvd_message(&ServerMessage::Layout("xv 0".into()), &mut sb, &profile).unwrap();
        assert_eq!(sb.data[0], MVD_MULTICAST_ALL_R);
        msg_read_byte(&mut sb).unwrap();
        let wrapped = read_mvd_message(MVD_MULTICAST_ALL_R, 0, &mut sb, &profile).unwrap();
        let Some(ServerMessage::Multicast(mc)) = wrapped else { panic!("expected multicast") };
        assert_eq!(mc.messages(&profile).unwrap(), vec![ServerMessage::Layout("xv 0".into())]);
    }

    #[test]
    fn test_long_payload_uses_extra_bits() {
        let mut sb = SizeBuf::new();
        let uni = ServerMessage::Unicast(Unicast { client: 3, reliable: false, data: vec![SVC_NOP; 0x2ff] });
        write_mvd_message(&uni, &mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(sb.data[..3], [MVD_UNICAST | 2 << 5, 0xff, 3]);

        let too_long = ServerMessage::Unicast(Unicast { client: 3, reliable: false, data: vec![0; 4096] });
        assert!(write_mvd_message(&too_long, &mut SizeBuf::new(), &ProtocolProfile::standard()).is_err());
    }

    #[test]
    #[ignore = "needs testdata/multi.mvd2"]
    fn test_sample_seven_segments() {
        let demos = parse_file("../../testdata/multi.mvd2", ParseOptions::default()).unwrap();
        assert_eq!(demos.len(), 7);
    }

    #[test]
    #[ignore = "needs testdata/multi.mvd2 and testdata/multi.mvd2.gz"]
    fn test_sample_gzip_matches() {
        let plain = parse_file("../../testdata/multi.mvd2", ParseOptions::default()).unwrap();
        let gz = parse_file("../../testdata/multi.mvd2.gz", ParseOptions::default()).unwrap();
        assert_eq!(plain, gz);
    }
}
