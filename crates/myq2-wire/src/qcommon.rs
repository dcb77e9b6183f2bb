// qcommon.rs — protocol numbers, message tags and delta bit assignments
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

pub const PROTOCOL_VERSION: i32 = 34;
pub const PROTOCOL_VERSION_MVD: i32 = 37;
pub const PROTOCOL_VERSION_MVD_MINIMUM: u16 = 2009;
pub const PROTOCOL_VERSION_MVD_DEFAULT: u16 = 2010;
pub const PROTOCOL_VERSION_MVD_EXTENDED_LIMITS: u16 = 2011;
pub const PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2: u16 = 2012;
pub const PROTOCOL_VERSION_MVD_CURRENT: u16 = 2012;

/// Copies of past frames kept for delta decoding.
pub const UPDATE_BACKUP: usize = 16;
pub const UPDATE_MASK: usize = UPDATE_BACKUP - 1;

// ============================================================
// Single-view server to client tags
// ============================================================

pub const SVC_BAD: u8 = 0;
pub const SVC_MUZZLEFLASH: u8 = 1;
pub const SVC_MUZZLEFLASH2: u8 = 2;
pub const SVC_TEMP_ENTITY: u8 = 3;
pub const SVC_LAYOUT: u8 = 4;
pub const SVC_INVENTORY: u8 = 5;
pub const SVC_NOP: u8 = 6;
pub const SVC_DISCONNECT: u8 = 7;
pub const SVC_RECONNECT: u8 = 8;
pub const SVC_SOUND: u8 = 9;
pub const SVC_PRINT: u8 = 10;
pub const SVC_STUFFTEXT: u8 = 11;
pub const SVC_SERVERDATA: u8 = 12;
pub const SVC_CONFIGSTRING: u8 = 13;
pub const SVC_SPAWNBASELINE: u8 = 14;
pub const SVC_CENTERPRINT: u8 = 15;
pub const SVC_DOWNLOAD: u8 = 16;
pub const SVC_PLAYERINFO: u8 = 17;
pub const SVC_PACKETENTITIES: u8 = 18;
pub const SVC_DELTAPACKETENTITIES: u8 = 19;
pub const SVC_FRAME: u8 = 20;

// ============================================================
// Multi-view tags (low five bits of the command byte)
// ============================================================

pub const MVD_BAD: u8 = 0;
pub const MVD_NOP: u8 = 1;
pub const MVD_DISCONNECT: u8 = 2;
pub const MVD_RECONNECT: u8 = 3;
pub const MVD_SERVERDATA: u8 = 4;
pub const MVD_CONFIGSTRING: u8 = 5;
pub const MVD_FRAME: u8 = 6;
pub const MVD_FRAME_NODELTA: u8 = 7;
pub const MVD_UNICAST: u8 = 8;
pub const MVD_UNICAST_R: u8 = 9;
pub const MVD_MULTICAST_ALL: u8 = 10;
pub const MVD_MULTICAST_PHS: u8 = 11;
pub const MVD_MULTICAST_PVS: u8 = 12;
pub const MVD_MULTICAST_ALL_R: u8 = 13;
pub const MVD_MULTICAST_PHS_R: u8 = 14;
pub const MVD_MULTICAST_PVS_R: u8 = 15;
pub const MVD_SOUND: u8 = 16;
pub const MVD_PRINT: u8 = 17;
pub const MVD_STUFFTEXT: u8 = 18;

pub const SVCMD_BITS: u8 = 5;
pub const SVCMD_MASK: u8 = (1 << SVCMD_BITS) - 1;

// Multi-view server data flags.
pub const MVF_NOMSGS: u16 = 1;
pub const MVF_SINGLEPOV: u16 = 2;
pub const MVF_EXTLIMITS: u16 = 4;
pub const MVF_EXTLIMITS_2: u16 = 8;

// ============================================================
// Sound flags
// ============================================================

pub const SND_VOLUME: u8 = 1 << 0;
pub const SND_ATTENUATION: u8 = 1 << 1;
pub const SND_POS: u8 = 1 << 2;
pub const SND_ENT: u8 = 1 << 3;
pub const SND_OFFSET: u8 = 1 << 4;

pub const DEFAULT_SOUND_PACKET_VOLUME: u8 = 255;
pub const DEFAULT_SOUND_PACKET_ATTENUATION: u8 = 64;

// ============================================================
// Player state bits, client layout (svc_playerinfo)
// ============================================================

pub const PS_M_TYPE: u16 = 1 << 0;
pub const PS_M_ORIGIN: u16 = 1 << 1;
pub const PS_M_VELOCITY: u16 = 1 << 2;
pub const PS_M_TIME: u16 = 1 << 3;
pub const PS_M_FLAGS: u16 = 1 << 4;
pub const PS_M_GRAVITY: u16 = 1 << 5;
pub const PS_M_DELTA_ANGLES: u16 = 1 << 6;
pub const PS_VIEWOFFSET: u16 = 1 << 7;
pub const PS_VIEWANGLES: u16 = 1 << 8;
pub const PS_KICKANGLES: u16 = 1 << 9;
pub const PS_BLEND: u16 = 1 << 10;
pub const PS_FOV: u16 = 1 << 11;
pub const PS_WEAPONINDEX: u16 = 1 << 12;
pub const PS_WEAPONFRAME: u16 = 1 << 13;
pub const PS_RDFLAGS: u16 = 1 << 14;

// ============================================================
// Player state bits, packed multi-view layout
// ============================================================

pub const P_TYPE: u16 = 1 << 0;
pub const P_ORIGIN: u16 = 1 << 1;
pub const P_ORIGIN2: u16 = 1 << 2;
pub const P_VIEWOFFSET: u16 = 1 << 3;
pub const P_VIEWANGLES: u16 = 1 << 4;
pub const P_VIEWANGLE2: u16 = 1 << 5;
pub const P_KICKANGLES: u16 = 1 << 6;
pub const P_BLEND: u16 = 1 << 7;
pub const P_FOV: u16 = 1 << 8;
pub const P_WEAPONINDEX: u16 = 1 << 9;
pub const P_WEAPONFRAME: u16 = 1 << 10;
pub const P_GUNOFFSET: u16 = 1 << 11;
pub const P_GUNANGLES: u16 = 1 << 12;
pub const P_RDFLAGS: u16 = 1 << 13;
pub const P_STATS: u16 = 1 << 14;
pub const P_REMOVE: u16 = 1 << 15;

// ============================================================
// Entity state bits
// ============================================================

// first byte
pub const U_ORIGIN1: u64 = 1 << 0;
pub const U_ORIGIN2: u64 = 1 << 1;
pub const U_ANGLE2: u64 = 1 << 2;
pub const U_ANGLE3: u64 = 1 << 3;
pub const U_FRAME8: u64 = 1 << 4;
pub const U_EVENT: u64 = 1 << 5;
pub const U_REMOVE: u64 = 1 << 6;
pub const U_MOREBITS1: u64 = 1 << 7;

// second byte
pub const U_NUMBER16: u64 = 1 << 8;
pub const U_ORIGIN3: u64 = 1 << 9;
pub const U_ANGLE1: u64 = 1 << 10;
pub const U_MODEL: u64 = 1 << 11;
pub const U_RENDERFX8: u64 = 1 << 12;
pub const U_ANGLE16: u64 = 1 << 13;
pub const U_EFFECTS8: u64 = 1 << 14;
pub const U_MOREBITS2: u64 = 1 << 15;

// third byte
pub const U_SKIN8: u64 = 1 << 16;
pub const U_FRAME16: u64 = 1 << 17;
pub const U_RENDERFX16: u64 = 1 << 18;
pub const U_EFFECTS16: u64 = 1 << 19;
pub const U_MODEL2: u64 = 1 << 20;
pub const U_MODEL3: u64 = 1 << 21;
pub const U_MODEL4: u64 = 1 << 22;
pub const U_MOREBITS3: u64 = 1 << 23;

// fourth byte
pub const U_OLDORIGIN: u64 = 1 << 24;
pub const U_SKIN16: u64 = 1 << 25;
pub const U_SOUND: u64 = 1 << 26;
pub const U_SOLID: u64 = 1 << 27;
pub const U_MODEL16: u64 = 1 << 28;
pub const U_MOREFX8: u64 = 1 << 29;
pub const U_ALPHA: u64 = 1 << 30;
pub const U_MOREBITS4: u64 = 1 << 31;

// fifth byte, extension tier only
pub const U_SCALE: u64 = 1 << 32;
pub const U_MOREFX16: u64 = 1 << 33;

/// Bits that only mean something when the extension tier is active.
pub const U_EXTENSION_BITS: u64 =
    U_MODEL16 | U_MOREFX8 | U_ALPHA | U_MOREBITS4 | U_SCALE | U_MOREFX16;
