// myq2-wire — Quake 2 server message codec
//
// Byte buffer primitives, entity and player delta compression, and the
// server-to-client sub-messages shared by live traffic and demo files.

#![allow(clippy::needless_range_loop, clippy::collapsible_else_if)]

pub mod configstrings;
pub mod delta_entity;
pub mod delta_player;
pub mod error;
pub mod frame;
pub mod messages;
pub mod protocol;
pub mod q_shared;
pub mod qcommon;
pub mod sizebuf;
pub mod tent;

pub use configstrings::ConfigStrings;
pub use error::{WireError, WireResult};
pub use frame::Frame;
pub use messages::{MessageKind, ServerData, ServerMessage};
pub use protocol::{ProtocolFlags, ProtocolProfile, RemapTable, CS_REMAP_EXTENDED, CS_REMAP_STANDARD};
pub use q_shared::{EntityState, PlayerState, PmoveState};
pub use sizebuf::SizeBuf;
