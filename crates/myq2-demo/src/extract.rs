// extract.rs — one player's point of view out of a multi-view segment

use std::collections::BTreeMap;

use tracing::{debug, warn};

use myq2_wire::qcommon::PROTOCOL_VERSION;
use myq2_wire::{Frame, ProtocolProfile, ServerData, ServerMessage, WireError};

use crate::demo::Demo;
use crate::error::{DemoError, DemoResult};

/// Builds a single-view demo seen through `player`. Frames without that
/// player are dropped; their messages move to the next kept frame.
/// Unicasts to other players are dropped, broadcasts are unpacked.
pub fn single_view(segment: &Demo, player: u8) -> DemoResult<Demo> {
    let profile = ProtocolProfile::standard();
    if segment.profile != profile {
        return Err(DemoError::Encode(WireError::violation(
            0,
            "extended-limit segments have no single-view encoding",
        )));
    }

    let serverdata = ServerData {
        protocol: PROTOCOL_VERSION,
        minor_version: 0,
        flags: 0,
        server_count: segment.serverdata.server_count,
        demo: true,
        game_dir: segment.serverdata.game_dir.clone(),
        client_number: i16::from(player),
        map_name: segment.map_name().to_string(),
    };
    let mut demo = Demo::new(serverdata, profile);
    demo.configstrings = segment.configstrings.clone();

    let mut pending = Vec::new();
    let mut number = 0;
    for frame in &segment.frames {
        for m in &frame.messages {
            pending.extend(view_messages(m, player, &profile));
        }
        let Some(ps) = frame.players.get(&player) else {
            continue;
        };
        number += 1;
        let mut players = BTreeMap::new();
        players.insert(player, ps.clone());
        demo.frames.push(Frame {
            number,
            delta: (number > 1).then_some(number - 1),
            valid: true,
            suppress_count: 0,
            areabits: Vec::new(),
            players,
            entities: frame.entities.clone(),
            messages: std::mem::take(&mut pending),
        });
    }
    for m in &segment.trailing {
        pending.extend(view_messages(m, player, &profile));
    }
    demo.trailing = pending;
    demo.frame_count = demo.frames.len();

    if demo.frames.is_empty() {
        warn!("player {} never appears in the segment", player);
    }
    debug!("extracted {} of {} frames for player {}", demo.frames.len(), segment.frames.len(), player);
    Ok(demo)
}

/// What `player` would have received for one multi-view message.
fn view_messages(m: &ServerMessage, player: u8, profile: &ProtocolProfile) -> Vec<ServerMessage> {
    let payload = match m {
        ServerMessage::Unicast(u) if u.client == player => u.messages(profile),
        ServerMessage::Unicast(_) => return Vec::new(),
        ServerMessage::Multicast(mc) => mc.messages(profile),
        ServerMessage::Nop | ServerMessage::ServerData(_) | ServerMessage::Frame(_) => return Vec::new(),
        other => return vec![other.clone()],
    };
    match payload {
        Ok(messages) => messages
            .into_iter()
            .filter(|m| !matches!(m, ServerMessage::ServerData(_)))
            .collect(),
        Err(e) => {
            warn!("dropping undecodable payload: {}", e);
            Vec::new()
        }
    }
}
