// q_shared.rs — entity and player state as carried on the wire
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

// Coordinates are kept in wire units (1/8 world unit) and angles in 16-bit
// fractions of a full turn so that decode/encode is lossless.

pub const MAX_CLIENTS: usize = 256;
pub const MAX_EDICTS: usize = 1024;
pub const MAX_EDICTS_EXTENDED: usize = 8192;
pub const MAX_STATS: usize = 32;
pub const MAX_STATS_EXTENDED: usize = 64;
pub const MAX_ITEMS: usize = 256;
pub const MAX_CONFIGSTRING_LEN: usize = 1024;

// Player number meaning "no client" in multi-view frames.
pub const CLIENTNUM_NONE: u8 = 255;

pub const PRINT_LOW: u8 = 0;
pub const PRINT_MEDIUM: u8 = 1;
pub const PRINT_HIGH: u8 = 2;
pub const PRINT_CHAT: u8 = 3;

pub const RF_FRAMELERP: u32 = 64;
pub const RF_BEAM: u32 = 128;

// Fixed configstring slots shared by both remap layouts.
pub const CS_NAME: u16 = 0;
pub const CS_CDTRACK: u16 = 1;
pub const CS_SKY: u16 = 2;
pub const CS_STATUSBAR: u16 = 5;

/// Networked state of one entity. `removed` mirrors the remove bit of the
/// delta that produced this value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntityState {
    pub number: u16,
    pub origin: [i16; 3],
    pub angles: [i16; 3],
    pub old_origin: [i16; 3],
    pub modelindex: u16,
    pub modelindex2: u16,
    pub modelindex3: u16,
    pub modelindex4: u16,
    pub frame: u16,
    pub skinnum: u32,
    pub effects: u32,
    pub renderfx: u32,
    pub solid: u32,
    pub sound: u16,
    pub event: u8,
    pub morefx: u32,
    pub alpha: u8,
    pub scale: u8,
    pub removed: bool,
}

impl EntityState {
    pub fn with_number(number: u16) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    pub fn is_beam(&self) -> bool {
        self.renderfx & RF_BEAM != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PmoveState {
    pub pm_type: u8,
    pub origin: [i16; 3],
    pub velocity: [i16; 3],
    pub pm_flags: u8,
    pub pm_time: u8,
    pub gravity: i16,
    pub delta_angles: [i16; 3],
}

/// Everything a client needs to render its own view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayerState {
    pub pmove: PmoveState,
    pub viewangles: [i16; 3],
    pub viewoffset: [i8; 3],
    pub kick_angles: [i8; 3],
    pub gunangles: [i8; 3],
    pub gunoffset: [i8; 3],
    pub gunindex: u16,
    pub gunframe: u8,
    pub blend: [u8; 4],
    pub damage_blend: [u8; 4],
    pub fov: u8,
    pub rdflags: u8,
    pub stats: [i16; MAX_STATS_EXTENDED],
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            pmove: PmoveState::default(),
            viewangles: [0; 3],
            viewoffset: [0; 3],
            kick_angles: [0; 3],
            gunangles: [0; 3],
            gunoffset: [0; 3],
            gunindex: 0,
            gunframe: 0,
            blend: [0; 4],
            damage_blend: [0; 4],
            fov: 0,
            rdflags: 0,
            stats: [0; MAX_STATS_EXTENDED],
        }
    }
}

/// Convert a 16-bit angle to degrees.
pub fn short2angle(a: i16) -> f32 {
    f32::from(a) * (360.0 / 65536.0)
}

/// Convert a wire coordinate to world units.
pub fn short2coord(c: i16) -> f32 {
    f32::from(c) * 0.125
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_state_default_is_zero() {
        let ps = PlayerState::default();
        assert_eq!(ps.fov, 0);
        assert!(ps.stats.iter().all(|&s| s == 0));
        assert_eq!(ps.pmove, PmoveState::default());
    }

    #[test]
    fn test_entity_state_is_beam() {
        let mut es = EntityState::with_number(12);
        assert!(!es.is_beam());
        es.renderfx = RF_BEAM | RF_FRAMELERP;
        assert!(es.is_beam());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(short2coord(-80), -10.0);
        assert_eq!(short2angle(0x4000), 90.0);
        assert_eq!(short2angle(i16::MIN), -180.0);
    }
}
