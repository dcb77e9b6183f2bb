// frame.rs — one fully resolved server snapshot

use std::collections::BTreeMap;

use crate::messages::ServerMessage;
use crate::q_shared::{EntityState, PlayerState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub number: i32,
    /// Frame this one was delta compressed against; `None` for a keyframe.
    pub delta: Option<i32>,
    /// False when the delta reference was unavailable and the frame was
    /// decoded against an empty baseline.
    pub valid: bool,
    pub suppress_count: u8,
    /// Area (single-view) or portal (multi-view) visibility bits.
    pub areabits: Vec<u8>,
    pub players: BTreeMap<u8, PlayerState>,
    pub entities: BTreeMap<u16, EntityState>,
    /// Other sub-messages received in the same lump or packet.
    pub messages: Vec<ServerMessage>,
}

impl Frame {
    pub fn is_keyframe(&self) -> bool {
        self.delta.is_none()
    }

    /// The viewer of a single-view frame.
    pub fn player(&self) -> Option<(u8, &PlayerState)> {
        self.players.iter().next().map(|(&n, ps)| (n, ps))
    }
}
