// demo.rs — one decoded level of a recording

use std::collections::BTreeMap;

use tracing::warn;

use myq2_wire::{ConfigStrings, EntityState, Frame, ProtocolProfile, ServerData, ServerMessage};

/// Everything recorded between one server data handshake and the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demo {
    pub serverdata: ServerData,
    pub profile: ProtocolProfile,
    /// Configstrings as of the first frame. Later updates travel in the
    /// frames' `messages`; see [`Demo::final_configstrings`].
    pub configstrings: ConfigStrings,
    pub baselines: BTreeMap<u16, EntityState>,
    pub frames: Vec<Frame>,
    /// Sub-messages that followed the last frame.
    pub trailing: Vec<ServerMessage>,
    /// Frames decoded, including any not retained.
    pub frame_count: usize,
}

impl Demo {
    pub fn new(serverdata: ServerData, profile: ProtocolProfile) -> Self {
        Self {
            serverdata,
            profile,
            configstrings: ConfigStrings::new(profile.remap),
            ..Demo::default()
        }
    }

    /// Level name: the `CS_NAME` configstring, falling back to the map
    /// name of the handshake.
    pub fn map_name(&self) -> &str {
        self.configstrings
            .map_name()
            .unwrap_or(self.serverdata.map_name.as_str())
    }

    /// Configstrings after replaying every update carried by the frames.
    pub fn final_configstrings(&self) -> ConfigStrings {
        let mut cs = self.configstrings.clone();
        let updates = self
            .frames
            .iter()
            .flat_map(|f| f.messages.iter())
            .chain(self.trailing.iter());
        for m in updates {
            if let ServerMessage::ConfigString(c) = m {
                if let Err(e) = cs.set(c.index, c.value.clone(), 0) {
                    warn!("configstring update {} not replayed: {}", c.index, e);
                }
            }
        }
        cs
    }

    /// `(slot, name)` of every player that had a skin during the level.
    pub fn players(&self) -> Vec<(usize, String)> {
        let mut seen: BTreeMap<usize, String> = self.configstrings.players().into_iter().collect();
        for (slot, name) in self.final_configstrings().players() {
            seen.insert(slot, name);
        }
        seen.into_iter().collect()
    }

    pub fn is_multi_view(&self) -> bool {
        self.serverdata.protocol != myq2_wire::qcommon::PROTOCOL_VERSION
    }
}
