// messages.rs — decoded server sub-messages and their single-view encodings
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use tracing::debug;

use crate::delta_entity::{read_delta_entity, read_entity_bits, write_delta_entity};
use crate::error::{WireError, WireResult};
use crate::frame::Frame;
use crate::protocol::ProtocolProfile;
use crate::q_shared::{EntityState, MAX_ITEMS};
use crate::qcommon::*;
use crate::sizebuf::*;
use crate::tent::{read_temp_entity, write_temp_entity, TempEntity};

/// Handshake that opens a level. Multi-view streams additionally fill
/// `minor_version` and `flags`; single-view streams fill `demo` and
/// `map_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerData {
    pub protocol: i32,
    pub minor_version: u16,
    pub flags: u16,
    pub server_count: i32,
    pub demo: bool,
    pub game_dir: String,
    pub client_number: i16,
    pub map_name: String,
}

impl ServerData {
    /// Body of `svc_serverdata`; anything but protocol 34 is refused.
    pub fn read_svc(msg: &mut SizeBuf) -> WireResult<Self> {
        let protocol = msg_read_long(msg)?;
        if protocol != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedProtocolVersion {
                found: protocol,
                expected: PROTOCOL_VERSION,
            });
        }
        Ok(ServerData {
            protocol,
            server_count: msg_read_long(msg)?,
            demo: msg_read_byte(msg)? != 0,
            game_dir: msg_read_string(msg)?,
            client_number: msg_read_short(msg)?,
            map_name: msg_read_string(msg)?,
            ..ServerData::default()
        })
    }

    pub fn write_svc(&self, msg: &mut SizeBuf) {
        msg_write_byte(msg, SVC_SERVERDATA);
        msg_write_long(msg, self.protocol);
        msg_write_long(msg, self.server_count);
        msg_write_byte(msg, u8::from(self.demo));
        msg_write_string(msg, &self.game_dir);
        msg_write_short(msg, self.client_number);
        msg_write_string(msg, &self.map_name);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MuzzleFlash {
    pub entity: i16,
    pub weapon: u8,
}

/// Positioned or entity-attached sound. Optional fields are absent from
/// the wire when `None`; readers substitute the protocol defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sound {
    pub index: u16,
    pub volume: Option<u8>,
    pub attenuation: Option<u8>,
    pub offset: Option<u8>,
    pub entity: Option<u16>,
    pub channel: u8,
    pub position: Option<[i16; 3]>,
}

impl Sound {
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.volume.is_some() { flags |= SND_VOLUME; }
        if self.attenuation.is_some() { flags |= SND_ATTENUATION; }
        if self.offset.is_some() { flags |= SND_OFFSET; }
        if self.entity.is_some() { flags |= SND_ENT; }
        if self.position.is_some() { flags |= SND_POS; }
        flags
    }

    pub fn volume_or_default(&self) -> u8 {
        self.volume.unwrap_or(DEFAULT_SOUND_PACKET_VOLUME)
    }

    pub fn attenuation_or_default(&self) -> u8 {
        self.attenuation.unwrap_or(DEFAULT_SOUND_PACKET_ATTENUATION)
    }

    fn read_svc(msg: &mut SizeBuf) -> WireResult<Self> {
        let flags = msg_read_byte(msg)?;
        let mut snd = Sound {
            index: u16::from(msg_read_byte(msg)?),
            ..Sound::default()
        };
        if flags & SND_VOLUME != 0 { snd.volume = Some(msg_read_byte(msg)?); }
        if flags & SND_ATTENUATION != 0 { snd.attenuation = Some(msg_read_byte(msg)?); }
        if flags & SND_OFFSET != 0 { snd.offset = Some(msg_read_byte(msg)?); }
        if flags & SND_ENT != 0 {
            let sendchan = msg_read_word(msg)?;
            snd.entity = Some(sendchan >> 3);
            snd.channel = (sendchan & 7) as u8;
        }
        if flags & SND_POS != 0 { snd.position = Some(msg_read_pos(msg)?); }
        Ok(snd)
    }

    fn write_svc(&self, msg: &mut SizeBuf) -> WireResult<()> {
        if self.index > 255 {
            return Err(WireError::violation(0, format!("sound index {} does not fit a byte", self.index)));
        }
        msg_write_byte(msg, self.flags());
        msg_write_byte(msg, self.index as u8);
        if let Some(v) = self.volume { msg_write_byte(msg, v); }
        if let Some(a) = self.attenuation { msg_write_byte(msg, a); }
        if let Some(o) = self.offset { msg_write_byte(msg, o); }
        if let Some(ent) = self.entity {
            msg_write_word(msg, (ent << 3) | u16::from(self.channel & 7));
        }
        if let Some(pos) = &self.position { msg_write_pos(msg, pos); }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Print {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConfigString {
    pub index: u16,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Download {
    /// -1 when the server refused the download.
    pub size: i16,
    pub percent: u8,
    pub data: Vec<u8>,
}

/// Payload addressed to one client of a multi-view stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Unicast {
    pub client: u8,
    pub reliable: bool,
    pub data: Vec<u8>,
}

impl Unicast {
    pub fn messages(&self, profile: &ProtocolProfile) -> WireResult<Vec<ServerMessage>> {
        read_svc_payload(&self.data, profile)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MulticastTo {
    #[default]
    All,
    Phs,
    Pvs,
}

/// Payload broadcast to every client that can see or hear `leaf`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Multicast {
    pub to: MulticastTo,
    pub reliable: bool,
    /// Absent for `All`.
    pub leaf: Option<u16>,
    pub data: Vec<u8>,
}

impl Multicast {
    pub fn messages(&self, profile: &ProtocolProfile) -> WireResult<Vec<ServerMessage>> {
        read_svc_payload(&self.data, profile)
    }
}

/// Every sub-message a demo stream can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    MuzzleFlash(MuzzleFlash),
    MuzzleFlash2(MuzzleFlash),
    TempEntity(TempEntity),
    Layout(String),
    Inventory(Vec<i16>),
    Nop,
    Disconnect,
    Reconnect,
    Sound(Sound),
    Print(Print),
    StuffText(String),
    ServerData(ServerData),
    ConfigString(ConfigString),
    SpawnBaseline(EntityState),
    CenterPrint(String),
    Download(Download),
    Frame(Box<Frame>),
    Unicast(Unicast),
    Multicast(Multicast),
}

/// Tag of a [`ServerMessage`], usable as a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    MuzzleFlash,
    MuzzleFlash2,
    TempEntity,
    Layout,
    Inventory,
    Nop,
    Disconnect,
    Reconnect,
    Sound,
    Print,
    StuffText,
    ServerData,
    ConfigString,
    SpawnBaseline,
    CenterPrint,
    Download,
    Frame,
    Unicast,
    Multicast,
}

impl MessageKind {
    pub const COUNT: usize = 19;

    pub const ALL: [MessageKind; Self::COUNT] = [
        MessageKind::MuzzleFlash,
        MessageKind::MuzzleFlash2,
        MessageKind::TempEntity,
        MessageKind::Layout,
        MessageKind::Inventory,
        MessageKind::Nop,
        MessageKind::Disconnect,
        MessageKind::Reconnect,
        MessageKind::Sound,
        MessageKind::Print,
        MessageKind::StuffText,
        MessageKind::ServerData,
        MessageKind::ConfigString,
        MessageKind::SpawnBaseline,
        MessageKind::CenterPrint,
        MessageKind::Download,
        MessageKind::Frame,
        MessageKind::Unicast,
        MessageKind::Multicast,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::MuzzleFlash => "muzzleflash",
            MessageKind::MuzzleFlash2 => "muzzleflash2",
            MessageKind::TempEntity => "temp_entity",
            MessageKind::Layout => "layout",
            MessageKind::Inventory => "inventory",
            MessageKind::Nop => "nop",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Reconnect => "reconnect",
            MessageKind::Sound => "sound",
            MessageKind::Print => "print",
            MessageKind::StuffText => "stufftext",
            MessageKind::ServerData => "serverdata",
            MessageKind::ConfigString => "configstring",
            MessageKind::SpawnBaseline => "spawnbaseline",
            MessageKind::CenterPrint => "centerprint",
            MessageKind::Download => "download",
            MessageKind::Frame => "frame",
            MessageKind::Unicast => "unicast",
            MessageKind::Multicast => "multicast",
        }
    }
}

/// Name of a single-view tag for diagnostics.
pub fn svc_name(cmd: u8) -> &'static str {
    match cmd {
        SVC_PLAYERINFO => "playerinfo",
        SVC_PACKETENTITIES => "packetentities",
        SVC_DELTAPACKETENTITIES => "deltapacketentities",
        SVC_BAD => "bad",
        _ => match svc_kind(cmd) {
            Some(kind) => kind.name(),
            None => "unknown",
        },
    }
}

fn svc_kind(cmd: u8) -> Option<MessageKind> {
    let kind = match cmd {
        SVC_MUZZLEFLASH => MessageKind::MuzzleFlash,
        SVC_MUZZLEFLASH2 => MessageKind::MuzzleFlash2,
        SVC_TEMP_ENTITY => MessageKind::TempEntity,
        SVC_LAYOUT => MessageKind::Layout,
        SVC_INVENTORY => MessageKind::Inventory,
        SVC_NOP => MessageKind::Nop,
        SVC_DISCONNECT => MessageKind::Disconnect,
        SVC_RECONNECT => MessageKind::Reconnect,
        SVC_SOUND => MessageKind::Sound,
        SVC_PRINT => MessageKind::Print,
        SVC_STUFFTEXT => MessageKind::StuffText,
        SVC_SERVERDATA => MessageKind::ServerData,
        SVC_CONFIGSTRING => MessageKind::ConfigString,
        SVC_SPAWNBASELINE => MessageKind::SpawnBaseline,
        SVC_CENTERPRINT => MessageKind::CenterPrint,
        SVC_DOWNLOAD => MessageKind::Download,
        SVC_FRAME => MessageKind::Frame,
        _ => return None,
    };
    Some(kind)
}

impl ServerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::MuzzleFlash(_) => MessageKind::MuzzleFlash,
            ServerMessage::MuzzleFlash2(_) => MessageKind::MuzzleFlash2,
            ServerMessage::TempEntity(_) => MessageKind::TempEntity,
            ServerMessage::Layout(_) => MessageKind::Layout,
            ServerMessage::Inventory(_) => MessageKind::Inventory,
            ServerMessage::Nop => MessageKind::Nop,
            ServerMessage::Disconnect => MessageKind::Disconnect,
            ServerMessage::Reconnect => MessageKind::Reconnect,
            ServerMessage::Sound(_) => MessageKind::Sound,
            ServerMessage::Print(_) => MessageKind::Print,
            ServerMessage::StuffText(_) => MessageKind::StuffText,
            ServerMessage::ServerData(_) => MessageKind::ServerData,
            ServerMessage::ConfigString(_) => MessageKind::ConfigString,
            ServerMessage::SpawnBaseline(_) => MessageKind::SpawnBaseline,
            ServerMessage::CenterPrint(_) => MessageKind::CenterPrint,
            ServerMessage::Download(_) => MessageKind::Download,
            ServerMessage::Frame(_) => MessageKind::Frame,
            ServerMessage::Unicast(_) => MessageKind::Unicast,
            ServerMessage::Multicast(_) => MessageKind::Multicast,
        }
    }

    /// Decodes the body of a single-view sub-message whose tag byte has
    /// been consumed. Returns `Ok(None)` for tags this layer does not know.
    /// Frame components need the assembler's history and are refused here.
    pub fn read_svc(cmd: u8, msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<Option<Self>> {
        let start = msg.readcount;
        let message = match cmd {
            SVC_MUZZLEFLASH | SVC_MUZZLEFLASH2 => {
                let mz = MuzzleFlash {
                    entity: msg_read_short(msg)?,
                    weapon: msg_read_byte(msg)?,
                };
                if cmd == SVC_MUZZLEFLASH {
                    ServerMessage::MuzzleFlash(mz)
                } else {
                    ServerMessage::MuzzleFlash2(mz)
                }
            }
            SVC_TEMP_ENTITY => ServerMessage::TempEntity(read_temp_entity(msg)?),
            SVC_LAYOUT => ServerMessage::Layout(msg_read_string(msg)?),
            SVC_INVENTORY => {
                let mut items = Vec::with_capacity(MAX_ITEMS);
                for _ in 0..MAX_ITEMS {
                    items.push(msg_read_short(msg)?);
                }
                ServerMessage::Inventory(items)
            }
            SVC_NOP => ServerMessage::Nop,
            SVC_DISCONNECT => ServerMessage::Disconnect,
            SVC_RECONNECT => ServerMessage::Reconnect,
            SVC_SOUND => ServerMessage::Sound(Sound::read_svc(msg)?),
            SVC_PRINT => ServerMessage::Print(Print {
                level: msg_read_byte(msg)?,
                text: msg_read_string(msg)?,
            }),
            SVC_STUFFTEXT => ServerMessage::StuffText(msg_read_string(msg)?),
            SVC_SERVERDATA => ServerMessage::ServerData(ServerData::read_svc(msg)?),
            SVC_CONFIGSTRING => {
                let index = msg_read_word(msg)?;
                profile.remap.check_index(index, start)?;
                ServerMessage::ConfigString(ConfigString {
                    index,
                    value: msg_read_string(msg)?,
                })
            }
            SVC_SPAWNBASELINE => {
                let (number, bits) = read_entity_bits(msg, profile)?;
                let state = read_delta_entity(&EntityState::default(), number, bits, msg, profile)?;
                ServerMessage::SpawnBaseline(state)
            }
            SVC_CENTERPRINT => ServerMessage::CenterPrint(msg_read_string(msg)?),
            SVC_DOWNLOAD => {
                let size = msg_read_short(msg)?;
                let percent = msg_read_byte(msg)?;
                let data = match usize::try_from(size) {
                    Ok(len) => msg_read_data(msg, len)?,
                    Err(_) => Vec::new(),
                };
                ServerMessage::Download(Download { size, percent, data })
            }
            SVC_FRAME | SVC_PLAYERINFO | SVC_PACKETENTITIES | SVC_DELTAPACKETENTITIES => {
                return Err(WireError::violation(
                    start,
                    format!("{} outside of a frame", svc_name(cmd)),
                ));
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Writes tag and body in the single-view encoding. Frames and the
    /// multi-view envelopes have no standalone single-view form.
    pub fn write_svc(&self, msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<()> {
        match self {
            ServerMessage::MuzzleFlash(mz) | ServerMessage::MuzzleFlash2(mz) => {
                let cmd = if matches!(self, ServerMessage::MuzzleFlash(_)) {
                    SVC_MUZZLEFLASH
                } else {
                    SVC_MUZZLEFLASH2
                };
                msg_write_byte(msg, cmd);
                msg_write_short(msg, mz.entity);
                msg_write_byte(msg, mz.weapon);
            }
            ServerMessage::TempEntity(te) => {
                msg_write_byte(msg, SVC_TEMP_ENTITY);
                write_temp_entity(msg, te)?;
            }
            ServerMessage::Layout(s) => {
                msg_write_byte(msg, SVC_LAYOUT);
                msg_write_string(msg, s);
            }
            ServerMessage::Inventory(items) => {
                msg_write_byte(msg, SVC_INVENTORY);
                for i in 0..MAX_ITEMS {
                    msg_write_short(msg, items.get(i).copied().unwrap_or(0));
                }
            }
            ServerMessage::Nop => msg_write_byte(msg, SVC_NOP),
            ServerMessage::Disconnect => msg_write_byte(msg, SVC_DISCONNECT),
            ServerMessage::Reconnect => msg_write_byte(msg, SVC_RECONNECT),
            ServerMessage::Sound(snd) => {
                msg_write_byte(msg, SVC_SOUND);
                snd.write_svc(msg)?;
            }
            ServerMessage::Print(p) => {
                msg_write_byte(msg, SVC_PRINT);
                msg_write_byte(msg, p.level);
                msg_write_string(msg, &p.text);
            }
            ServerMessage::StuffText(s) => {
                msg_write_byte(msg, SVC_STUFFTEXT);
                msg_write_string(msg, s);
            }
            ServerMessage::ServerData(sd) => sd.write_svc(msg),
            ServerMessage::ConfigString(cs) => {
                profile.remap.check_index(cs.index, 0)?;
                msg_write_byte(msg, SVC_CONFIGSTRING);
                msg_write_word(msg, cs.index);
                msg_write_string(msg, &cs.value);
            }
            ServerMessage::SpawnBaseline(state) => {
                msg_write_byte(msg, SVC_SPAWNBASELINE);
                write_delta_entity(&EntityState::default(), state, msg, profile, true)?;
            }
            ServerMessage::CenterPrint(s) => {
                msg_write_byte(msg, SVC_CENTERPRINT);
                msg_write_string(msg, s);
            }
            ServerMessage::Download(d) => {
                msg_write_byte(msg, SVC_DOWNLOAD);
                msg_write_short(msg, d.size);
                msg_write_byte(msg, d.percent);
                if d.size > 0 {
                    msg_write_data(msg, &d.data[..d.data.len().min(d.size as usize)]);
                }
            }
            ServerMessage::Frame(_) | ServerMessage::Unicast(_) | ServerMessage::Multicast(_) => {
                return Err(WireError::violation(
                    0,
                    format!("{} has no standalone single-view encoding", self.kind().name()),
                ));
            }
        }
        Ok(())
    }
}

/// Decodes the single-view messages inside a unicast or multicast
/// payload. Decoding stops quietly at the first tag that cannot be
/// decoded on its own.
pub fn read_svc_payload(data: &[u8], profile: &ProtocolProfile) -> WireResult<Vec<ServerMessage>> {
    let mut msg = SizeBuf::from_bytes(data.to_vec());
    let mut out = Vec::new();
    while msg.remaining() > 0 {
        let cmd = msg_read_byte(&mut msg)?;
        if matches!(cmd, SVC_FRAME | SVC_PLAYERINFO | SVC_PACKETENTITIES | SVC_DELTAPACKETENTITIES) {
            debug!("payload carries {}; {} bytes left undecoded", svc_name(cmd), msg.remaining());
            break;
        }
        match ServerMessage::read_svc(cmd, &mut msg, profile)? {
            Some(m) => out.push(m),
            None => {
                debug!("unknown payload tag {}; {} bytes left undecoded", cmd, msg.remaining());
                break;
            }
        }
    }
    Ok(out)
}
