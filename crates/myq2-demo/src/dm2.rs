// dm2.rs — single-view demo files: length-prefixed lumps of svc messages
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use myq2_wire::delta_entity::{entity_delta_bits, write_entity_fields, write_entity_terminator};
use myq2_wire::delta_player::write_delta_playerstate;
use myq2_wire::messages::svc_name;
use myq2_wire::qcommon::*;
use myq2_wire::sizebuf::*;
use myq2_wire::{EntityState, Frame, PlayerState, ProtocolProfile, ServerMessage, WireError};

use crate::assembler::{delta_reference, FrameAssembler};
use crate::config::ParseOptions;
use crate::demo::Demo;
use crate::dispatch::Dispatcher;
use crate::error::{DemoError, DemoResult};

/// Length that ends a single-view stream.
pub const DEMO_END: i32 = -1;

/// Reads as many bytes as are available up to `buf.len()`.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Incremental single-view parser. Each [`read_lump`](Self::read_lump)
/// decodes one lump; frames decoded before an error stay available through
/// [`finish`](Self::finish).
pub struct Dm2Reader<'d, R> {
    reader: R,
    options: ParseOptions,
    dispatcher: Dispatcher<'d>,
    assembler: FrameAssembler,
    demo: Option<Demo>,
    pending: Vec<ServerMessage>,
    offset: u64,
    done: bool,
}

impl<'d, R: Read> Dm2Reader<'d, R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, ParseOptions::default())
    }

    pub fn with_options(reader: R, options: ParseOptions) -> Self {
        Self {
            reader,
            options,
            dispatcher: Dispatcher::new(),
            assembler: FrameAssembler::default(),
            demo: None,
            pending: Vec::new(),
            offset: 0,
            done: false,
        }
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<'d> {
        &mut self.dispatcher
    }

    pub fn demo(&self) -> Option<&Demo> {
        self.demo.as_ref()
    }

    /// File offset of the next lump.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads and decodes one lump. Returns `Ok(false)` once the end marker
    /// or a clean end of file is reached.
    pub fn read_lump(&mut self) -> DemoResult<bool> {
        if self.done {
            return Ok(false);
        }
        let lump_offset = self.offset;

        let mut len_bytes = [0u8; 4];
        match read_full(&mut self.reader, &mut len_bytes)? {
            0 => {
                self.done = true;
                return Ok(false);
            }
            4 => {}
            n => {
                self.done = true;
                return Err(DemoError::decode(
                    lump_offset,
                    "lump",
                    WireError::UnexpectedEndOfBuffer { offset: n, needed: 4, remaining: n },
                ));
            }
        }
        let len = i32::from_le_bytes(len_bytes);
        if len == DEMO_END {
            self.done = true;
            return Ok(false);
        }
        if len < 0 || len as usize > self.options.max_lump_size {
            self.done = true;
            return Err(DemoError::decode(
                lump_offset,
                "lump",
                WireError::InvalidFormat(format!("bad lump length {}", len)),
            ));
        }

        let len = len as usize;
        let mut data = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut data)?;
        if got < len {
            self.done = true;
            return Err(DemoError::decode(
                lump_offset,
                "lump",
                WireError::UnexpectedEndOfBuffer { offset: got, needed: len - got, remaining: 0 },
            ));
        }
        self.offset += 4 + len as u64;

        if let Err(e) = self.parse_lump(lump_offset, data) {
            self.done = true;
            return Err(e);
        }
        Ok(true)
    }

    fn parse_lump(&mut self, offset: u64, data: Vec<u8>) -> DemoResult<()> {
        let mut msg = SizeBuf::from_bytes(data);

        while msg.remaining() > 0 {
            let start = msg.readcount;
            let cmd = msg_read_byte(&mut msg).map_err(|e| DemoError::decode(offset, "lump", e))?;
            let tag = svc_name(cmd);
            let ctx = |e| DemoError::decode(offset, tag, e);

            if cmd == SVC_FRAME {
                self.parse_frame(&mut msg).map_err(ctx)?;
                continue;
            }

            match ServerMessage::read_svc(cmd, &mut msg, self.assembler.profile()).map_err(ctx)? {
                Some(message) => self.absorb(message, start).map_err(ctx)?,
                None => {
                    if self.options.strict_tags {
                        return Err(ctx(WireError::violation(start, format!("unknown tag {}", cmd))));
                    }
                    warn!(
                        "lump at {}: unknown tag {} at {}, skipping {} bytes",
                        offset,
                        cmd,
                        start,
                        msg.remaining()
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn parse_frame(&mut self, msg: &mut SizeBuf) -> Result<(), WireError> {
        let start = msg.readcount;
        let Some(demo) = self.demo.as_mut() else {
            return Err(WireError::violation(start, "frame before server data"));
        };
        let mut frame = self.assembler.parse_frame(msg)?;
        frame.messages = std::mem::take(&mut self.pending);

        let message = ServerMessage::Frame(Box::new(frame));
        self.dispatcher.dispatch(&message);
        demo.frame_count += 1;
        if self.options.retain_frames {
            if let ServerMessage::Frame(frame) = message {
                demo.frames.push(*frame);
            }
        }
        Ok(())
    }

    fn absorb(&mut self, message: ServerMessage, start: usize) -> Result<(), WireError> {
        if let ServerMessage::ServerData(sd) = &message {
            if self.demo.is_some() {
                return Err(WireError::violation(start, "server data repeated in single-view stream"));
            }
            debug!("serverdata: count {} client {} map {:?}", sd.server_count, sd.client_number, sd.map_name);
            self.assembler.reset(sd.client_number);
            self.demo = Some(Demo::new(sd.clone(), ProtocolProfile::standard()));
            self.dispatcher.dispatch(&message);
            return Ok(());
        }

        let Some(demo) = self.demo.as_mut() else {
            return Err(WireError::violation(
                start,
                format!("{} before server data", message.kind().name()),
            ));
        };
        self.dispatcher.dispatch(&message);

        match message {
            ServerMessage::ConfigString(cs) if demo.frame_count == 0 => {
                demo.configstrings.set(cs.index, cs.value, start)?;
            }
            ServerMessage::SpawnBaseline(state) => {
                self.assembler.set_baseline(state);
                demo.baselines.insert(state.number, state);
            }
            other => self.pending.push(other),
        }
        Ok(())
    }

    /// Ends the parse, returning the demo decoded so far.
    pub fn finish(mut self) -> Option<Demo> {
        let pending = std::mem::take(&mut self.pending);
        self.demo.map(|mut demo| {
            demo.trailing = pending;
            demo
        })
    }

    /// Reads to the end of the stream.
    pub fn read_all(mut self) -> DemoResult<Demo> {
        while self.read_lump()? {}
        self.finish().ok_or_else(|| {
            DemoError::decode(0, "serverdata", WireError::InvalidFormat("no server data in stream".into()))
        })
    }
}

pub fn parse<R: Read>(reader: R) -> DemoResult<Demo> {
    Dm2Reader::new(reader).read_all()
}

pub fn parse_with_options<R: Read>(reader: R, options: ParseOptions) -> DemoResult<Demo> {
    Dm2Reader::with_options(reader, options).read_all()
}

pub fn parse_file(path: impl AsRef<Path>, options: ParseOptions) -> DemoResult<Demo> {
    let file = File::open(path)?;
    parse_with_options(BufReader::new(file), options)
}

// ============================================================
// Writing
// ============================================================

/// Accumulates sub-messages into lumps no larger than `limit`.
struct LumpWriter<'w, W: Write> {
    out: &'w mut W,
    lump: SizeBuf,
    limit: usize,
}

impl<'w, W: Write> LumpWriter<'w, W> {
    fn new(out: &'w mut W, limit: usize) -> Self {
        Self { out, lump: SizeBuf::new(), limit }
    }

    /// Adds one encoded sub-message, starting a new lump when it would
    /// not fit.
    fn push(&mut self, part: &SizeBuf) -> DemoResult<()> {
        if part.cursize() > self.limit {
            return Err(DemoError::Encode(WireError::violation(
                0,
                format!("{} byte message exceeds lump limit {}", part.cursize(), self.limit),
            )));
        }
        if self.lump.cursize() + part.cursize() > self.limit {
            self.flush()?;
        }
        self.lump.append(part);
        Ok(())
    }

    fn flush(&mut self) -> DemoResult<()> {
        if self.lump.is_empty() {
            return Ok(());
        }
        self.out.write_all(&(self.lump.cursize() as i32).to_le_bytes())?;
        self.out.write_all(self.lump.as_bytes())?;
        self.lump.clear();
        Ok(())
    }

    fn end(mut self) -> DemoResult<()> {
        self.flush()?;
        self.out.write_all(&DEMO_END.to_le_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

fn encode(message: &ServerMessage, profile: &ProtocolProfile) -> DemoResult<SizeBuf> {
    let mut sb = SizeBuf::new();
    message.write_svc(&mut sb, profile)?;
    Ok(sb)
}

/// Writes `demo` as a single-view stream: the gamestate, one lump per
/// frame delta compressed against the frame before it, then the end marker.
pub fn write_demo<W: Write>(demo: &Demo, writer: &mut W) -> DemoResult<()> {
    write_demo_with_limit(demo, writer, ParseOptions::default().max_lump_size)
}

pub fn write_demo_with_limit<W: Write>(demo: &Demo, writer: &mut W, limit: usize) -> DemoResult<()> {
    let profile = ProtocolProfile::standard();
    let mut out = LumpWriter::new(writer, limit);

    let mut serverdata = demo.serverdata.clone();
    serverdata.protocol = PROTOCOL_VERSION;
    out.push(&encode(&ServerMessage::ServerData(serverdata), &profile)?)?;
    for (index, value) in demo.configstrings.iter() {
        let cs = myq2_wire::messages::ConfigString { index, value: value.to_string() };
        out.push(&encode(&ServerMessage::ConfigString(cs), &profile)?)?;
    }
    for state in demo.baselines.values() {
        out.push(&encode(&ServerMessage::SpawnBaseline(*state), &profile)?)?;
    }
    out.flush()?;

    let mut prev: Option<&Frame> = None;
    for frame in &demo.frames {
        for m in &frame.messages {
            out.push(&encode(m, &profile)?)?;
        }
        let mut body = SizeBuf::new();
        write_frame(&mut body, frame, prev, &demo.baselines, &profile)?;
        out.push(&body)?;
        out.flush()?;
        prev = Some(frame);
    }

    for m in &demo.trailing {
        out.push(&encode(m, &profile)?)?;
    }
    out.end()
}

/// Writes `svc_frame`, `svc_playerinfo` and `svc_packetentities` for
/// `frame`, delta compressed against `prev` when it has a usable number.
pub fn write_frame(
    msg: &mut SizeBuf,
    frame: &Frame,
    prev: Option<&Frame>,
    baselines: &BTreeMap<u16, EntityState>,
    profile: &ProtocolProfile,
) -> DemoResult<()> {
    let prev = prev.filter(|p| p.number > 0 && p.number != frame.number);
    let areabytes = u8::try_from(frame.areabits.len()).map_err(|_| {
        WireError::violation(0, format!("{} area bytes do not fit a frame", frame.areabits.len()))
    })?;

    msg_write_byte(msg, SVC_FRAME);
    msg_write_long(msg, frame.number);
    msg_write_long(msg, prev.map_or(-1, |p| p.number));
    msg_write_byte(msg, frame.suppress_count);
    msg_write_byte(msg, areabytes);
    msg_write_data(msg, &frame.areabits);

    msg_write_byte(msg, SVC_PLAYERINFO);
    let from_ps = prev
        .and_then(|p| p.player().map(|(_, ps)| ps.clone()))
        .unwrap_or_default();
    let to_ps = frame.player().map(|(_, ps)| ps.clone()).unwrap_or_else(PlayerState::default);
    write_delta_playerstate(&from_ps, &to_ps, msg, profile)?;

    msg_write_byte(msg, SVC_PACKETENTITIES);
    let empty = BTreeMap::new();
    let old = prev.map_or(&empty, |p| &p.entities);
    write_packet_entities(msg, old, &frame.entities, baselines, profile)?;
    Ok(())
}

/// Emits the entity list turning `old` into `new`, walking both in number
/// order: matches are delta compressed, vanished entities get a remove,
/// new ones are sent against their baseline.
fn write_packet_entities(
    msg: &mut SizeBuf,
    old: &BTreeMap<u16, EntityState>,
    new: &BTreeMap<u16, EntityState>,
    baselines: &BTreeMap<u16, EntityState>,
    profile: &ProtocolProfile,
) -> DemoResult<()> {
    let mut old_iter = old.values().peekable();
    let mut new_iter = new.values().peekable();

    loop {
        let o = old_iter.peek().copied();
        let n = new_iter.peek().copied();
        match (o, n) {
            (None, None) => break,
            (Some(o), Some(n)) if o.number == n.number => {
                let reference = delta_reference(o, n);
                let bits = entity_delta_bits(&reference, n, profile)?;
                if bits & !U_NUMBER16 != 0 {
                    write_entity_fields(n, bits, msg, profile);
                }
                old_iter.next();
                new_iter.next();
            }
            (Some(o), Some(n)) if o.number < n.number => {
                write_remove(msg, o, profile);
                old_iter.next();
            }
            (Some(o), None) => {
                write_remove(msg, o, profile);
                old_iter.next();
            }
            (_, Some(n)) => {
                let baseline = baselines
                    .get(&n.number)
                    .copied()
                    .unwrap_or_else(|| EntityState::with_number(n.number));
                let reference = delta_reference(&baseline, n);
                let bits = entity_delta_bits(&reference, n, profile)?;
                write_entity_fields(n, bits, msg, profile);
                new_iter.next();
            }
        }
    }

    write_entity_terminator(msg);
    Ok(())
}

/// Removes carry no fields; readers drop the entity on the header alone.
fn write_remove(msg: &mut SizeBuf, old: &EntityState, profile: &ProtocolProfile) {
    write_entity_fields(old, U_REMOVE, msg, profile);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use myq2_wire::messages::{ConfigString, Print};
    use myq2_wire::q_shared::{CS_NAME, RF_BEAM};
    use myq2_wire::{MessageKind, ServerData};

    fn sample_demo() -> Demo {
        let sd = ServerData {
            protocol: 34,
            server_count: 7,
            demo: true,
            game_dir: "baseq2".into(),
            client_number: 2,
            map_name: "The Edge".into(),
            ..ServerData::default()
        };
        let mut demo = Demo::new(sd, ProtocolProfile::standard());
        demo.configstrings.set(CS_NAME, "q2dm1", 0).unwrap();
        demo.configstrings.set(32 + 1, "maps/q2dm1.bsp", 0).unwrap();
        demo.configstrings.set(1312 + 2, "player\\male/grunt", 0).unwrap();
        demo.baselines.insert(5, EntityState { number: 5, modelindex: 3, origin: [64, 64, 0], old_origin: [64, 64, 0], ..EntityState::default() });

        let mut entities = BTreeMap::new();
        entities.insert(5, EntityState { number: 5, modelindex: 3, origin: [64, 72, 0], old_origin: [64, 64, 0], ..EntityState::default() });
        entities.insert(300, EntityState { number: 300, modelindex: 9, frame: 4, event: 2, ..EntityState::default() });
        let mut players = BTreeMap::new();
        players.insert(2, PlayerState { fov: 90, ..PlayerState::default() });

        let f1 = Frame {
            number: 10,
            delta: None,
            valid: true,
            areabits: vec![0xff, 0x01],
            players: players.clone(),
            entities: entities.clone(),
            messages: vec![ServerMessage::Print(Print { level: 2, text: "fight!\n".into() })],
            ..Frame::default()
        };

        let mut entities2 = BTreeMap::new();
        entities2.insert(5, EntityState { origin: [64, 80, 0], old_origin: [64, 72, 0], ..entities[&5] });
        entities2.insert(
            7,
            EntityState { number: 7, renderfx: RF_BEAM, origin: [1, 2, 3], old_origin: [4, 5, 6], ..EntityState::default() },
        );
        players.insert(2, PlayerState { fov: 110, ..PlayerState::default() });
        let f2 = Frame {
            number: 11,
            delta: Some(10),
            valid: true,
            areabits: vec![0xff, 0x01],
            players,
            entities: entities2,
            messages: vec![ServerMessage::ConfigString(ConfigString { index: 1312 + 4, value: "late\\female/athena".into() })],
            ..Frame::default()
        };
        demo.frames = vec![f1, f2];
        demo.frame_count = 2;
        demo.trailing = vec![ServerMessage::Disconnect];
        demo
    }

    #[test]
    fn test_write_then_parse() {
        let demo = sample_demo();
        let mut bytes = Vec::new();
        write_demo(&demo, &mut bytes).unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &[0xff; 4]);

        let parsed = parse(&bytes[..]).unwrap();
        assert_eq!(parsed.serverdata, demo.serverdata);
        assert_eq!(parsed.configstrings, demo.configstrings);
        assert_eq!(parsed.baselines, demo.baselines);
        assert_eq!(parsed.frame_count, 2);
        assert_eq!(parsed.frames, demo.frames);
        assert_eq!(parsed.trailing, demo.trailing);
        assert_eq!(parsed.map_name(), "q2dm1");
        assert_eq!(parsed.players(), vec![(2, "player".to_string()), (4, "late".to_string())]);
    }

    #[test]
    fn test_dispatch_order() {
        let demo = sample_demo();
        let mut bytes = Vec::new();
        write_demo(&demo, &mut bytes).unwrap();

        let seen = RefCell::new(Vec::new());
        {
            let mut reader = Dm2Reader::new(&bytes[..]);
            let d = reader.dispatcher_mut();
            for kind in [MessageKind::ServerData, MessageKind::Print, MessageKind::Frame, MessageKind::Disconnect] {
                d.register(kind, |m| seen.borrow_mut().push(m.kind()));
            }
            let parsed = reader.read_all().unwrap();
            assert_eq!(parsed.frames.len(), 2);
        }
        assert_eq!(
            seen.into_inner(),
            vec![MessageKind::ServerData, MessageKind::Print, MessageKind::Frame, MessageKind::Frame, MessageKind::Disconnect]
        );
    }

    #[test]
    fn test_streaming_without_retention() {
        let demo = sample_demo();
        let mut bytes = Vec::new();
        write_demo(&demo, &mut bytes).unwrap();
        let options = ParseOptions { retain_frames: false, ..ParseOptions::default() };
        let parsed = parse_with_options(&bytes[..], options).unwrap();
        assert!(parsed.frames.is_empty());
        assert_eq!(parsed.frame_count, 2);
    }

    #[test]
    fn test_truncated_keeps_decoded_frames() {
        let demo = sample_demo();
        let mut bytes = Vec::new();
        write_demo(&demo, &mut bytes).unwrap();
        // drop the end marker and cut into the last frame lump
        bytes.truncate(bytes.len() - 10);

        let mut reader = Dm2Reader::new(&bytes[..]);
        let mut result = Ok(true);
        while let Ok(true) = result {
            result = reader.read_lump();
        }
        let err = result.unwrap_err();
        assert!(matches!(err.wire(), Some(WireError::UnexpectedEndOfBuffer { .. })));
        let partial = reader.finish().unwrap();
        assert_eq!(partial.frames.len(), 1);
        assert_eq!(partial.frames[0].number, 10);
    }

    #[test]
    fn test_clean_eof_without_marker() {
        let demo = sample_demo();
        let mut bytes = Vec::new();
        write_demo(&demo, &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert_eq!(parse(&bytes[..]).unwrap().frames.len(), 2);
    }

    #[test]
    fn test_bad_lump_length() {
        let mut bytes = (0x20000i32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);
        let err = parse(&bytes[..]).unwrap_err();
        assert!(matches!(err, DemoError::Decode { offset: 0, tag: "lump", source: WireError::InvalidFormat(_) }));
    }

    #[test]
    fn test_frame_before_serverdata() {
        let mut body = SizeBuf::new();
        write_frame(&mut body, &Frame { number: 1, ..Frame::default() }, None, &BTreeMap::new(), &ProtocolProfile::standard()).unwrap();
        let mut bytes = (body.cursize() as i32).to_le_bytes().to_vec();
        bytes.extend_from_slice(body.as_bytes());
        let err = parse(&bytes[..]).unwrap_err();
        assert!(matches!(err, DemoError::Decode { tag: "frame", source: WireError::ProtocolViolation { .. }, .. }));
    }

    #[test]
    fn test_second_serverdata_rejected() {
        let profile = ProtocolProfile::standard();
        let sd = ServerMessage::ServerData(ServerData { protocol: 34, ..ServerData::default() });
        let mut lump = encode(&sd, &profile).unwrap();
        lump.append(&encode(&sd, &profile).unwrap());
        let mut bytes = (lump.cursize() as i32).to_le_bytes().to_vec();
        bytes.extend_from_slice(lump.as_bytes());
        assert!(matches!(
            parse(&bytes[..]),
            Err(DemoError::Decode { tag: "serverdata", source: WireError::ProtocolViolation { .. }, .. })
        ));
    }

    #[test]
    fn test_unknown_tag_skips_rest_of_lump() {
        let profile = ProtocolProfile::standard();
        let mut lump = encode(&ServerMessage::ServerData(ServerData { protocol: 34, ..ServerData::default() }), &profile).unwrap();
        msg_write_byte(&mut lump, 99);
        msg_write_data(&mut lump, &[1, 2, 3]);
        let mut bytes = (lump.cursize() as i32).to_le_bytes().to_vec();
        bytes.extend_from_slice(lump.as_bytes());
        bytes.extend_from_slice(&DEMO_END.to_le_bytes());

        assert!(parse(&bytes[..]).is_ok());
        let strict = ParseOptions { strict_tags: true, ..ParseOptions::default() };
        assert!(matches!(
            parse_with_options(&bytes[..], strict),
            Err(DemoError::Decode { tag: "unknown", source: WireError::ProtocolViolation { .. }, .. })
        ));
    }

    #[test]
    fn test_lump_limit_splits_gamestate() {
        let mut demo = sample_demo();
        for i in 0..40u16 {
            demo.configstrings.set(800 + i, format!("light pattern {}", i), 0).unwrap();
        }
        let mut bytes = Vec::new();
        write_demo_with_limit(&demo, &mut bytes, 256).unwrap();
        let first = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert!(first <= 256);
        assert_eq!(parse(&bytes[..]).unwrap().configstrings, demo.configstrings);
    }

    #[test]
    #[ignore = "needs testdata/testduel.dm2"]
    fn test_sample_testduel() {
        let demo = parse_file("../../testdata/testduel.dm2", ParseOptions::default()).unwrap();
        assert_eq!(demo.frames.len(), 3199);
    }

    #[test]
    #[ignore = "needs testdata/test.dm2"]
    fn test_sample_test() {
        let demo = parse_file("../../testdata/test.dm2", ParseOptions::default()).unwrap();
        assert_eq!(demo.frames.len(), 23);
    }
}
