// configstrings.rs — indexed server strings and the player names they carry

use std::collections::BTreeMap;

use crate::error::WireResult;
use crate::protocol::{ConfigBand, RemapTable, CS_REMAP_STANDARD};
use crate::q_shared::{CS_NAME, MAX_CLIENTS};

/// Sparse configstring table interpreted through one remap layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStrings {
    remap: &'static RemapTable,
    strings: BTreeMap<u16, String>,
}

impl Default for ConfigStrings {
    fn default() -> Self {
        Self::new(&CS_REMAP_STANDARD)
    }
}

impl ConfigStrings {
    pub fn new(remap: &'static RemapTable) -> Self {
        Self {
            remap,
            strings: BTreeMap::new(),
        }
    }

    pub fn remap(&self) -> &'static RemapTable {
        self.remap
    }

    /// Stores `value` at `index`. An empty value clears the slot.
    pub fn set(&mut self, index: u16, value: impl Into<String>, offset: usize) -> WireResult<()> {
        self.remap.check_index(index, offset)?;
        let value = value.into();
        if value.is_empty() {
            self.strings.remove(&index);
        } else {
            self.strings.insert(index, value);
        }
        Ok(())
    }

    pub fn get(&self, index: u16) -> Option<&str> {
        self.strings.get(&index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> + '_ {
        self.strings.iter().map(|(&i, s)| (i, s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn band(&self, index: u16) -> Option<ConfigBand> {
        self.remap.band(index)
    }

    pub fn map_name(&self) -> Option<&str> {
        self.get(CS_NAME)
    }

    /// Server's client slot count, when published.
    pub fn max_clients(&self) -> Option<usize> {
        self.get(self.remap.maxclients)?.trim().parse().ok()
    }

    /// Name of the player in `slot`: the skin string up to the first `\`.
    pub fn player_name(&self, slot: usize) -> Option<&str> {
        let index = usize::from(self.remap.playerskins) + slot;
        if slot >= MAX_CLIENTS || index >= usize::from(self.remap.general) {
            return None;
        }
        let skin = self.get(index as u16)?;
        let name = skin.split('\\').next().unwrap_or(skin);
        (!name.is_empty()).then_some(name)
    }

    /// Every named player slot, in slot order.
    pub fn players(&self) -> Vec<(usize, String)> {
        let start = self.remap.playerskins;
        self.strings
            .range(start..self.remap.general)
            .filter_map(|(&index, _)| {
                let slot = usize::from(index - start);
                self.player_name(slot).map(|name| (slot, name.to_string()))
            })
            .collect()
    }

    /// Copy into another layout, dropping strings with no slot there.
    pub fn remapped(&self, target: &'static RemapTable) -> ConfigStrings {
        let strings = self
            .strings
            .iter()
            .filter_map(|(&index, s)| Some((self.remap.remap_to(target, index)?, s.clone())))
            .collect();
        ConfigStrings {
            remap: target,
            strings,
        }
    }
}
