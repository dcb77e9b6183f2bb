// protocol.rs — protocol feature tiers and configstring index layouts

use crate::error::{WireError, WireResult};
use crate::q_shared::{MAX_EDICTS, MAX_EDICTS_EXTENDED, MAX_STATS, MAX_STATS_EXTENDED};
use crate::qcommon::{
    MVF_EXTLIMITS, MVF_EXTLIMITS_2, PROTOCOL_VERSION_MVD_CURRENT,
    PROTOCOL_VERSION_MVD_EXTENDED_LIMITS, PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2,
    PROTOCOL_VERSION_MVD_MINIMUM,
};

bitflags::bitflags! {
    /// Optional encodings layered over the base protocol.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ProtocolFlags: u32 {
        /// Solid is a 32-bit long instead of a 16-bit word.
        const LONG_SOLID   = 1 << 0;
        /// Entity angles may be sent as 16-bit shorts.
        const SHORT_ANGLES = 1 << 1;
        /// Wider model/sound indices, alpha, scale and extra effects.
        const EXTENSIONS   = 1 << 2;
        /// Damage blend and 64 varint-masked stats.
        const EXTENSIONS_2 = 1 << 3;
    }
}

/// Which range of configstring indices an index falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigBand {
    /// Name, sky, status bar and the other fixed slots.
    Fixed,
    Models,
    Sounds,
    Images,
    Lights,
    Items,
    PlayerSkins,
    General,
}

/// Start index of each configstring band. `end` is one past the last
/// valid index and doubles as the list terminator on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemapTable {
    pub extended: bool,
    pub max_edicts: usize,
    pub airaccel: u16,
    pub maxclients: u16,
    pub mapchecksum: u16,
    pub models: u16,
    pub sounds: u16,
    pub images: u16,
    pub lights: u16,
    pub items: u16,
    pub playerskins: u16,
    pub general: u16,
    pub end: u16,
}

pub static CS_REMAP_STANDARD: RemapTable = RemapTable {
    extended: false,
    max_edicts: MAX_EDICTS,
    airaccel: 29,
    maxclients: 30,
    mapchecksum: 31,
    models: 32,
    sounds: 288,
    images: 544,
    lights: 800,
    items: 1056,
    playerskins: 1312,
    general: 1568,
    end: 2080,
};

pub static CS_REMAP_EXTENDED: RemapTable = RemapTable {
    extended: true,
    max_edicts: MAX_EDICTS_EXTENDED,
    airaccel: 59,
    maxclients: 60,
    mapchecksum: 61,
    models: 62,
    sounds: 8254,
    images: 10302,
    lights: 12350,
    items: 12606,
    playerskins: 12862,
    general: 13118,
    end: 13630,
};

impl RemapTable {
    pub fn band(&self, index: u16) -> Option<ConfigBand> {
        let band = if index >= self.end {
            return None;
        } else if index >= self.general {
            ConfigBand::General
        } else if index >= self.playerskins {
            ConfigBand::PlayerSkins
        } else if index >= self.items {
            ConfigBand::Items
        } else if index >= self.lights {
            ConfigBand::Lights
        } else if index >= self.images {
            ConfigBand::Images
        } else if index >= self.sounds {
            ConfigBand::Sounds
        } else if index >= self.models {
            ConfigBand::Models
        } else {
            ConfigBand::Fixed
        };
        Some(band)
    }

    fn band_start(&self, band: ConfigBand) -> u16 {
        match band {
            ConfigBand::Fixed => 0,
            ConfigBand::Models => self.models,
            ConfigBand::Sounds => self.sounds,
            ConfigBand::Images => self.images,
            ConfigBand::Lights => self.lights,
            ConfigBand::Items => self.items,
            ConfigBand::PlayerSkins => self.playerskins,
            ConfigBand::General => self.general,
        }
    }

    fn band_end(&self, band: ConfigBand) -> u16 {
        match band {
            ConfigBand::Fixed => self.models,
            ConfigBand::Models => self.sounds,
            ConfigBand::Sounds => self.images,
            ConfigBand::Images => self.lights,
            ConfigBand::Lights => self.items,
            ConfigBand::Items => self.playerskins,
            ConfigBand::PlayerSkins => self.general,
            ConfigBand::General => self.end,
        }
    }

    /// Translate an index from this layout into `other`. Fixed slots keep
    /// their meaning only when both layouts place them identically, apart
    /// from the three slots whose position differs between layouts.
    pub fn remap_to(&self, other: &RemapTable, index: u16) -> Option<u16> {
        let band = self.band(index)?;
        if band == ConfigBand::Fixed {
            let mapped = if index == self.airaccel {
                other.airaccel
            } else if index == self.maxclients {
                other.maxclients
            } else if index == self.mapchecksum {
                other.mapchecksum
            } else if index < other.airaccel.min(self.airaccel) {
                index
            } else {
                return None;
            };
            return Some(mapped);
        }
        let offset = index - self.band_start(band);
        let mapped = other.band_start(band).checked_add(offset)?;
        (mapped < other.band_end(band)).then_some(mapped)
    }

    pub fn check_index(&self, index: u16, offset: usize) -> WireResult<()> {
        if index >= self.end {
            return Err(WireError::violation(
                offset,
                format!("configstring index {} out of range (limit {})", index, self.end),
            ));
        }
        Ok(())
    }
}

/// Negotiated protocol tier for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolProfile {
    pub flags: ProtocolFlags,
    pub remap: &'static RemapTable,
}

impl Default for ProtocolProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProtocolProfile {
    /// Plain protocol 34 as written by single-view demos.
    pub fn standard() -> Self {
        Self {
            flags: ProtocolFlags::empty(),
            remap: &CS_REMAP_STANDARD,
        }
    }

    /// Derive the tier from a multi-view server data header. Flags the
    /// minor version predates are ignored.
    pub fn from_mvd(minor: u16, mvd_flags: u16, offset: usize) -> WireResult<Self> {
        if !(PROTOCOL_VERSION_MVD_MINIMUM..=PROTOCOL_VERSION_MVD_CURRENT).contains(&minor) {
            return Err(WireError::violation(
                offset,
                format!("unsupported multi-view minor version {}", minor),
            ));
        }
        let mut profile = Self::standard();
        if minor >= PROTOCOL_VERSION_MVD_EXTENDED_LIMITS && mvd_flags & MVF_EXTLIMITS != 0 {
            profile.flags |= ProtocolFlags::LONG_SOLID
                | ProtocolFlags::SHORT_ANGLES
                | ProtocolFlags::EXTENSIONS;
            profile.remap = &CS_REMAP_EXTENDED;
            if minor >= PROTOCOL_VERSION_MVD_EXTENDED_LIMITS_2 && mvd_flags & MVF_EXTLIMITS_2 != 0 {
                profile.flags |= ProtocolFlags::EXTENSIONS_2;
            }
        }
        Ok(profile)
    }

    pub fn long_solid(&self) -> bool {
        self.flags.contains(ProtocolFlags::LONG_SOLID)
    }

    pub fn short_angles(&self) -> bool {
        self.flags.contains(ProtocolFlags::SHORT_ANGLES)
    }

    pub fn extensions(&self) -> bool {
        self.flags.contains(ProtocolFlags::EXTENSIONS)
    }

    pub fn extensions2(&self) -> bool {
        self.flags.contains(ProtocolFlags::EXTENSIONS_2)
    }

    pub fn max_edicts(&self) -> usize {
        self.remap.max_edicts
    }

    pub fn max_stats(&self) -> usize {
        if self.extensions2() {
            MAX_STATS_EXTENDED
        } else {
            MAX_STATS
        }
    }
}
