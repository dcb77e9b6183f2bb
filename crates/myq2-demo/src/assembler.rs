// assembler.rs — rebuild full snapshots from frame deltas
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use myq2_wire::delta_entity::{read_delta_entity, read_entity_bits};
use myq2_wire::delta_player::{read_delta_playerstate, read_delta_playerstate_packed};
use myq2_wire::messages::svc_name;
use myq2_wire::q_shared::{CLIENTNUM_NONE, MAX_CLIENTS};
use myq2_wire::qcommon::*;
use myq2_wire::sizebuf::*;
use myq2_wire::{EntityState, Frame, PlayerState, ProtocolProfile, WireError, WireResult};

use crate::config::UnknownPlayerPolicy;

// ============================================================
// Transient entity fields
// ============================================================

/// State an entity holds at the start of a frame when no delta touches
/// it: events last one frame, non-beam entities remember where they were.
pub fn carry_forward(prev: &EntityState) -> EntityState {
    let mut state = *prev;
    state.event = 0;
    state.removed = false;
    if !state.is_beam() {
        state.old_origin = state.origin;
    }
    state
}

/// Rules applied on top of the pure field merge.
pub fn apply_frame_rules(prev: &EntityState, state: &mut EntityState, bits: u64) {
    if bits & U_EVENT == 0 {
        state.event = 0;
    }
    if bits & U_OLDORIGIN == 0 && !state.is_beam() {
        state.old_origin = prev.origin;
    }
}

/// What a decoder will assume for `to` when no field is sent, given the
/// entity's previous state. Encoders diff against this.
pub fn delta_reference(prev: &EntityState, to: &EntityState) -> EntityState {
    let mut reference = carry_forward(prev);
    if !to.is_beam() {
        reference.old_origin = prev.origin;
    }
    reference
}

// ============================================================
// Single-view frames (svc_frame)
// ============================================================

/// Owns spawn baselines and the ring of recent frames that single-view
/// deltas reference.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    profile: ProtocolProfile,
    client: u8,
    baselines: BTreeMap<u16, EntityState>,
    history: Vec<Option<Frame>>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(ProtocolProfile::standard())
    }
}

impl FrameAssembler {
    pub fn new(profile: ProtocolProfile) -> Self {
        Self {
            profile,
            client: 0,
            baselines: BTreeMap::new(),
            history: vec![None; UPDATE_BACKUP],
        }
    }

    pub fn profile(&self) -> &ProtocolProfile {
        &self.profile
    }

    /// Forget everything learned from the previous level.
    pub fn reset(&mut self, client_number: i16) {
        self.client = u8::try_from(client_number).unwrap_or(0);
        self.baselines.clear();
        self.history.iter_mut().for_each(|f| *f = None);
    }

    pub fn set_baseline(&mut self, state: EntityState) {
        let mut state = state;
        state.removed = false;
        self.baselines.insert(state.number, state);
    }

    /// Spawn baseline for `number`; all zero when none was sent.
    pub fn baseline(&self, number: u16) -> EntityState {
        self.baselines
            .get(&number)
            .copied()
            .unwrap_or_else(|| EntityState::with_number(number))
    }

    fn history_frame(&self, number: i32) -> Option<&Frame> {
        let slot = (number as usize) & UPDATE_MASK;
        self.history[slot].as_ref().filter(|f| f.number == number)
    }

    /// Parses everything after an `svc_frame` tag: the header, the
    /// player info and the packet entities that must follow it.
    pub fn parse_frame(&mut self, msg: &mut SizeBuf) -> WireResult<Frame> {
        let number = msg_read_long(msg)?;
        let deltaframe = msg_read_long(msg)?;
        let suppress_count = msg_read_byte(msg)?;
        let len = msg_read_byte(msg)?;
        let areabits = msg_read_data(msg, usize::from(len))?;

        let (old, delta, valid) = if deltaframe <= 0 {
            (None, None, true)
        } else {
            match self.history_frame(deltaframe) {
                Some(old) => (Some(old), Some(deltaframe), old.valid),
                None => {
                    warn!("frame {}: delta from unavailable frame {}", number, deltaframe);
                    (None, Some(deltaframe), false)
                }
            }
        };

        let start = msg.readcount;
        let cmd = msg_read_byte(msg)?;
        if cmd != SVC_PLAYERINFO {
            return Err(WireError::violation(
                start,
                format!("expected playerinfo after frame, got {}", svc_name(cmd)),
            ));
        }
        let from_ps = old
            .and_then(|f| f.player().map(|(_, ps)| ps.clone()))
            .unwrap_or_default();
        let ps = read_delta_playerstate(&from_ps, msg, &self.profile)?;

        let start = msg.readcount;
        let cmd = msg_read_byte(msg)?;
        if cmd != SVC_PACKETENTITIES && cmd != SVC_DELTAPACKETENTITIES {
            return Err(WireError::violation(
                start,
                format!("expected packetentities after playerinfo, got {}", svc_name(cmd)),
            ));
        }
        let entities = self.parse_packet_entities(old.map(|f| &f.entities), msg)?;

        let mut players = BTreeMap::new();
        players.insert(self.client, ps);
        let frame = Frame {
            number,
            delta,
            valid,
            suppress_count,
            areabits,
            players,
            entities,
            messages: Vec::new(),
        };

        debug!("frame {} delta {:?}: {} entities", number, delta, frame.entities.len());
        let slot = (number as usize) & UPDATE_MASK;
        self.history[slot] = Some(Frame {
            messages: Vec::new(),
            ..frame.clone()
        });
        Ok(frame)
    }

    /// Merges the entity list against the old frame: untouched old entities
    /// carry over, removes drop them, new numbers start from the baseline.
    fn parse_packet_entities(
        &self,
        old: Option<&BTreeMap<u16, EntityState>>,
        msg: &mut SizeBuf,
    ) -> WireResult<BTreeMap<u16, EntityState>> {
        let empty = BTreeMap::new();
        let mut old_iter = old.unwrap_or(&empty).values().peekable();
        let mut out = BTreeMap::new();

        loop {
            let start = msg.readcount;
            let (number, bits) = read_entity_bits(msg, &self.profile)?;
            if number == 0 {
                break;
            }

            while let Some(o) = old_iter.next_if(|o| o.number < number) {
                out.insert(o.number, carry_forward(o));
            }

            if bits & U_REMOVE != 0 {
                if old_iter.next_if(|o| o.number == number).is_none() {
                    debug!("remove of entity {} not in old frame (offset {})", number, start);
                }
                continue;
            }

            let from = match old_iter.next_if(|o| o.number == number) {
                Some(o) => *o,
                None => self.baseline(number),
            };
            let mut state = read_delta_entity(&from, number, bits, msg, &self.profile)?;
            apply_frame_rules(&from, &mut state, bits);
            out.insert(number, state);
        }

        for o in old_iter {
            out.insert(o.number, carry_forward(o));
        }
        Ok(out)
    }
}

// ============================================================
// Multi-view frames
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Slot<T> {
    state: T,
    inuse: bool,
}

/// Persistent player and entity tables of a multi-view stream. Every
/// frame deltas against the last state seen for each number, whether or
/// not it is currently in use.
#[derive(Debug, Clone)]
pub struct MvdAssembler {
    profile: ProtocolProfile,
    policy: UnknownPlayerPolicy,
    max_clients: usize,
    frame_number: i32,
    players: BTreeMap<u8, Slot<PlayerState>>,
    entities: BTreeMap<u16, Slot<EntityState>>,
}

impl MvdAssembler {
    pub fn new(profile: ProtocolProfile, policy: UnknownPlayerPolicy) -> Self {
        Self {
            profile,
            policy,
            max_clients: MAX_CLIENTS,
            frame_number: 0,
            players: BTreeMap::new(),
            entities: BTreeMap::new(),
        }
    }

    pub fn profile(&self) -> &ProtocolProfile {
        &self.profile
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients.min(MAX_CLIENTS);
    }

    /// Drops every player and entity, so the next frame decodes from zero.
    pub fn clear(&mut self) {
        self.players.clear();
        self.entities.clear();
    }

    pub fn parse_frame(&mut self, msg: &mut SizeBuf) -> WireResult<Frame> {
        let len = msg_read_byte(msg)?;
        let portalbits = msg_read_data(msg, usize::from(len))?;

        self.parse_players(msg)?;

        for slot in self.entities.values_mut() {
            slot.state = carry_forward(&slot.state);
        }
        self.parse_entities(msg)?;

        let frame = Frame {
            number: self.frame_number,
            delta: None,
            valid: true,
            suppress_count: 0,
            areabits: portalbits,
            players: self
                .players
                .iter()
                .filter(|(_, s)| s.inuse)
                .map(|(&n, s)| (n, s.state.clone()))
                .collect(),
            entities: self
                .entities
                .iter()
                .filter(|(_, s)| s.inuse)
                .map(|(&n, s)| (n, s.state))
                .collect(),
            messages: Vec::new(),
        };
        self.frame_number += 1;
        Ok(frame)
    }

    fn parse_players(&mut self, msg: &mut SizeBuf) -> WireResult<()> {
        loop {
            let start = msg.readcount;
            let number = msg_read_byte(msg)?;
            if number == CLIENTNUM_NONE {
                return Ok(());
            }
            if usize::from(number) >= self.max_clients && !self.players.contains_key(&number) {
                match self.policy {
                    UnknownPlayerPolicy::Reject => {
                        return Err(WireError::violation(
                            start,
                            format!("player number {} beyond {} clients", number, self.max_clients),
                        ));
                    }
                    UnknownPlayerPolicy::Placeholder => {
                        warn!("player number {} beyond {} clients, tracking placeholder", number, self.max_clients);
                    }
                }
            }
            let flags = msg_read_word(msg)?;
            let slot = self.players.entry(number).or_default();
            slot.state = read_delta_playerstate_packed(&slot.state, flags, msg, &self.profile)?;
            slot.inuse = flags & P_REMOVE == 0;
        }
    }

    fn parse_entities(&mut self, msg: &mut SizeBuf) -> WireResult<()> {
        loop {
            let (number, bits) = read_entity_bits(msg, &self.profile)?;
            if number == 0 {
                return Ok(());
            }
            let slot = self.entities.entry(number).or_insert_with(|| Slot {
                state: EntityState::with_number(number),
                inuse: false,
            });
            let prev = slot.state;
            let mut state = read_delta_entity(&prev, number, bits, msg, &self.profile)?;
            apply_frame_rules(&prev, &mut state, bits);
            slot.inuse = !state.removed;
            state.removed = false;
            slot.state = state;
        }
    }
}

/// Mirror of [`MvdAssembler`]'s tables for writers, so that encoded deltas
/// decode back to the same frames.
#[derive(Debug, Clone, Default)]
pub struct MvdEncoderState {
    players: BTreeMap<u8, Slot<PlayerState>>,
    entities: BTreeMap<u16, Slot<EntityState>>,
}

impl MvdEncoderState {
    pub fn player(&self, number: u8) -> (PlayerState, bool) {
        self.players
            .get(&number)
            .map(|s| (s.state.clone(), s.inuse))
            .unwrap_or_default()
    }

    pub fn set_player(&mut self, number: u8, state: PlayerState, inuse: bool) {
        self.players.insert(number, Slot { state, inuse });
    }

    /// Numbers of players currently in use.
    pub fn active_players(&self) -> Vec<u8> {
        self.players.iter().filter(|(_, s)| s.inuse).map(|(&n, _)| n).collect()
    }

    /// Last state for `number` as the decoder sees it at frame start.
    pub fn entity(&self, number: u16) -> (EntityState, bool) {
        self.entities
            .get(&number)
            .map(|s| (carry_forward(&s.state), s.inuse))
            .unwrap_or_else(|| (EntityState::with_number(number), false))
    }

    pub fn set_entity(&mut self, state: EntityState, inuse: bool) {
        self.entities.insert(state.number, Slot { state, inuse });
    }

    pub fn active_entities(&self) -> Vec<u16> {
        self.entities.iter().filter(|(_, s)| s.inuse).map(|(&n, _)| n).collect()
    }
}
