// delta_player.rs — player state delta compression, client and packed layouts
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use crate::error::{WireError, WireResult};
use crate::protocol::ProtocolProfile;
use crate::q_shared::PlayerState;
use crate::qcommon::*;
use crate::sizebuf::*;

fn read_chars(msg: &mut SizeBuf) -> WireResult<[i8; 3]> {
    Ok([msg_read_char(msg)?, msg_read_char(msg)?, msg_read_char(msg)?])
}

fn write_chars(msg: &mut SizeBuf, v: &[i8; 3]) {
    for &c in v {
        msg_write_char(msg, c);
    }
}

fn read_gunindex(msg: &mut SizeBuf, profile: &ProtocolProfile) -> WireResult<u16> {
    if profile.extensions() {
        msg_read_word(msg)
    } else {
        Ok(u16::from(msg_read_byte(msg)?))
    }
}

fn write_gunindex(msg: &mut SizeBuf, gunindex: u16, profile: &ProtocolProfile) -> WireResult<()> {
    if profile.extensions() {
        msg_write_word(msg, gunindex);
    } else if gunindex > 255 {
        return Err(WireError::violation(0, format!("gun index {} needs extensions", gunindex)));
    } else {
        msg_write_byte(msg, gunindex as u8);
    }
    Ok(())
}

fn blend_differs(from: &PlayerState, to: &PlayerState, profile: &ProtocolProfile) -> bool {
    from.blend != to.blend || (profile.extensions2() && from.damage_blend != to.damage_blend)
}

// Under extensions2 an inner byte selects blend (low nibble) and damage
// blend (high nibble) components.
fn read_blend(msg: &mut SizeBuf, to: &mut PlayerState, profile: &ProtocolProfile) -> WireResult<()> {
    if profile.extensions2() {
        let mask = msg_read_byte(msg)?;
        for i in 0..4 {
            if mask & (1 << i) != 0 {
                to.blend[i] = msg_read_byte(msg)?;
            }
        }
        for i in 0..4 {
            if mask & (1 << (i + 4)) != 0 {
                to.damage_blend[i] = msg_read_byte(msg)?;
            }
        }
    } else {
        for i in 0..4 {
            to.blend[i] = msg_read_byte(msg)?;
        }
    }
    Ok(())
}

fn write_blend(msg: &mut SizeBuf, from: &PlayerState, to: &PlayerState, profile: &ProtocolProfile) {
    if profile.extensions2() {
        let mut mask = 0u8;
        for i in 0..4 {
            if to.blend[i] != from.blend[i] {
                mask |= 1 << i;
            }
            if to.damage_blend[i] != from.damage_blend[i] {
                mask |= 1 << (i + 4);
            }
        }
        msg_write_byte(msg, mask);
        for i in 0..4 {
            if mask & (1 << i) != 0 {
                msg_write_byte(msg, to.blend[i]);
            }
        }
        for i in 0..4 {
            if mask & (1 << (i + 4)) != 0 {
                msg_write_byte(msg, to.damage_blend[i]);
            }
        }
    } else {
        for &b in &to.blend {
            msg_write_byte(msg, b);
        }
    }
}

/// Stats mask: 32-bit long, or LEB128 over 64 slots under extensions2.
fn read_stats(msg: &mut SizeBuf, to: &mut PlayerState, profile: &ProtocolProfile) -> WireResult<()> {
    let statbits = if profile.extensions2() {
        msg_read_varint64(msg)?
    } else {
        u64::from(msg_read_ulong(msg)?)
    };
    for i in 0..profile.max_stats() {
        if statbits & (1u64 << i) != 0 {
            to.stats[i] = msg_read_short(msg)?;
        }
    }
    Ok(())
}

fn stats_mask(from: &PlayerState, to: &PlayerState, profile: &ProtocolProfile) -> u64 {
    (0..profile.max_stats())
        .filter(|&i| from.stats[i] != to.stats[i])
        .fold(0u64, |bits, i| bits | (1u64 << i))
}

fn write_stats(msg: &mut SizeBuf, statbits: u64, to: &PlayerState, profile: &ProtocolProfile) {
    if profile.extensions2() {
        msg_write_varint64(msg, statbits);
    } else {
        msg_write_ulong(msg, statbits as u32);
    }
    for i in 0..profile.max_stats() {
        if statbits & (1u64 << i) != 0 {
            msg_write_short(msg, to.stats[i]);
        }
    }
}

// ============================================================
// Client layout (svc_playerinfo)
// ============================================================

/// Reads the flags word, the flagged fields and the stats block that
/// follow an `svc_playerinfo` tag.
pub fn read_delta_playerstate(
    from: &PlayerState,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
) -> WireResult<PlayerState> {
    let flags = msg_read_word(msg)?;
    let mut to = from.clone();
    let pm = &mut to.pmove;

    if flags & PS_M_TYPE != 0 { pm.pm_type = msg_read_byte(msg)?; }
    if flags & PS_M_ORIGIN != 0 { pm.origin = msg_read_pos(msg)?; }
    if flags & PS_M_VELOCITY != 0 { pm.velocity = msg_read_pos(msg)?; }
    if flags & PS_M_TIME != 0 { pm.pm_time = msg_read_byte(msg)?; }
    if flags & PS_M_FLAGS != 0 { pm.pm_flags = msg_read_byte(msg)?; }
    if flags & PS_M_GRAVITY != 0 { pm.gravity = msg_read_short(msg)?; }
    if flags & PS_M_DELTA_ANGLES != 0 { pm.delta_angles = msg_read_pos(msg)?; }

    if flags & PS_VIEWOFFSET != 0 { to.viewoffset = read_chars(msg)?; }
    if flags & PS_VIEWANGLES != 0 { to.viewangles = msg_read_pos(msg)?; }
    if flags & PS_KICKANGLES != 0 { to.kick_angles = read_chars(msg)?; }
    if flags & PS_WEAPONINDEX != 0 { to.gunindex = read_gunindex(msg, profile)?; }
    if flags & PS_WEAPONFRAME != 0 {
        to.gunframe = msg_read_byte(msg)?;
        to.gunoffset = read_chars(msg)?;
        to.gunangles = read_chars(msg)?;
    }
    if flags & PS_BLEND != 0 { read_blend(msg, &mut to, profile)?; }
    if flags & PS_FOV != 0 { to.fov = msg_read_byte(msg)?; }
    if flags & PS_RDFLAGS != 0 { to.rdflags = msg_read_byte(msg)?; }

    read_stats(msg, &mut to, profile)?;
    Ok(to)
}

pub fn playerstate_delta_flags(from: &PlayerState, to: &PlayerState, profile: &ProtocolProfile) -> u16 {
    let (ops, ps) = (&from.pmove, &to.pmove);
    let mut flags = 0;

    if ps.pm_type != ops.pm_type { flags |= PS_M_TYPE; }
    if ps.origin != ops.origin { flags |= PS_M_ORIGIN; }
    if ps.velocity != ops.velocity { flags |= PS_M_VELOCITY; }
    if ps.pm_time != ops.pm_time { flags |= PS_M_TIME; }
    if ps.pm_flags != ops.pm_flags { flags |= PS_M_FLAGS; }
    if ps.gravity != ops.gravity { flags |= PS_M_GRAVITY; }
    if ps.delta_angles != ops.delta_angles { flags |= PS_M_DELTA_ANGLES; }

    if to.viewoffset != from.viewoffset { flags |= PS_VIEWOFFSET; }
    if to.viewangles != from.viewangles { flags |= PS_VIEWANGLES; }
    if to.kick_angles != from.kick_angles { flags |= PS_KICKANGLES; }
    if blend_differs(from, to, profile) { flags |= PS_BLEND; }
    if to.fov != from.fov { flags |= PS_FOV; }
    if to.rdflags != from.rdflags { flags |= PS_RDFLAGS; }
    if to.gunindex != from.gunindex { flags |= PS_WEAPONINDEX; }
    if to.gunframe != from.gunframe
        || to.gunoffset != from.gunoffset
        || to.gunangles != from.gunangles
    {
        flags |= PS_WEAPONFRAME;
    }

    flags
}

/// Writes the body of an `svc_playerinfo` message (without the tag).
pub fn write_delta_playerstate(
    from: &PlayerState,
    to: &PlayerState,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
) -> WireResult<()> {
    let flags = playerstate_delta_flags(from, to, profile);
    let ps = &to.pmove;

    msg_write_word(msg, flags);

    if flags & PS_M_TYPE != 0 { msg_write_byte(msg, ps.pm_type); }
    if flags & PS_M_ORIGIN != 0 { msg_write_pos(msg, &ps.origin); }
    if flags & PS_M_VELOCITY != 0 { msg_write_pos(msg, &ps.velocity); }
    if flags & PS_M_TIME != 0 { msg_write_byte(msg, ps.pm_time); }
    if flags & PS_M_FLAGS != 0 { msg_write_byte(msg, ps.pm_flags); }
    if flags & PS_M_GRAVITY != 0 { msg_write_short(msg, ps.gravity); }
    if flags & PS_M_DELTA_ANGLES != 0 { msg_write_pos(msg, &ps.delta_angles); }

    if flags & PS_VIEWOFFSET != 0 { write_chars(msg, &to.viewoffset); }
    if flags & PS_VIEWANGLES != 0 { msg_write_pos(msg, &to.viewangles); }
    if flags & PS_KICKANGLES != 0 { write_chars(msg, &to.kick_angles); }
    if flags & PS_WEAPONINDEX != 0 { write_gunindex(msg, to.gunindex, profile)?; }
    if flags & PS_WEAPONFRAME != 0 {
        msg_write_byte(msg, to.gunframe);
        write_chars(msg, &to.gunoffset);
        write_chars(msg, &to.gunangles);
    }
    if flags & PS_BLEND != 0 { write_blend(msg, from, to, profile); }
    if flags & PS_FOV != 0 { msg_write_byte(msg, to.fov); }
    if flags & PS_RDFLAGS != 0 { msg_write_byte(msg, to.rdflags); }

    let statbits = stats_mask(from, to, profile);
    write_stats(msg, statbits, to, profile);
    Ok(())
}

// ============================================================
// Packed layout (multi-view frames)
// ============================================================

/// Applies a packed delta whose flags word was already read. Movement
/// velocity, time, flags, gravity and delta angles are not carried by this
/// layout and keep their `from` values.
pub fn read_delta_playerstate_packed(
    from: &PlayerState,
    flags: u16,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
) -> WireResult<PlayerState> {
    let mut to = from.clone();

    if flags & P_TYPE != 0 { to.pmove.pm_type = msg_read_byte(msg)?; }
    if flags & P_ORIGIN != 0 {
        to.pmove.origin[0] = msg_read_short(msg)?;
        to.pmove.origin[1] = msg_read_short(msg)?;
    }
    if flags & P_ORIGIN2 != 0 { to.pmove.origin[2] = msg_read_short(msg)?; }
    if flags & P_VIEWOFFSET != 0 { to.viewoffset = read_chars(msg)?; }
    if flags & P_VIEWANGLES != 0 {
        to.viewangles[0] = msg_read_short(msg)?;
        to.viewangles[1] = msg_read_short(msg)?;
    }
    if flags & P_VIEWANGLE2 != 0 { to.viewangles[2] = msg_read_short(msg)?; }
    if flags & P_KICKANGLES != 0 { to.kick_angles = read_chars(msg)?; }
    if flags & P_WEAPONINDEX != 0 { to.gunindex = read_gunindex(msg, profile)?; }
    if flags & P_WEAPONFRAME != 0 { to.gunframe = msg_read_byte(msg)?; }
    if flags & P_GUNOFFSET != 0 { to.gunoffset = read_chars(msg)?; }
    if flags & P_GUNANGLES != 0 { to.gunangles = read_chars(msg)?; }
    if flags & P_BLEND != 0 { read_blend(msg, &mut to, profile)?; }
    if flags & P_FOV != 0 { to.fov = msg_read_byte(msg)?; }
    if flags & P_RDFLAGS != 0 { to.rdflags = msg_read_byte(msg)?; }
    if flags & P_STATS != 0 { read_stats(msg, &mut to, profile)?; }

    Ok(to)
}

pub fn packed_delta_flags(from: &PlayerState, to: &PlayerState, profile: &ProtocolProfile) -> u16 {
    let mut flags = 0;

    if to.pmove.pm_type != from.pmove.pm_type { flags |= P_TYPE; }
    if to.pmove.origin[..2] != from.pmove.origin[..2] { flags |= P_ORIGIN; }
    if to.pmove.origin[2] != from.pmove.origin[2] { flags |= P_ORIGIN2; }
    if to.viewoffset != from.viewoffset { flags |= P_VIEWOFFSET; }
    if to.viewangles[..2] != from.viewangles[..2] { flags |= P_VIEWANGLES; }
    if to.viewangles[2] != from.viewangles[2] { flags |= P_VIEWANGLE2; }
    if to.kick_angles != from.kick_angles { flags |= P_KICKANGLES; }
    if blend_differs(from, to, profile) { flags |= P_BLEND; }
    if to.fov != from.fov { flags |= P_FOV; }
    if to.rdflags != from.rdflags { flags |= P_RDFLAGS; }
    if to.gunindex != from.gunindex { flags |= P_WEAPONINDEX; }
    if to.gunframe != from.gunframe { flags |= P_WEAPONFRAME; }
    if to.gunoffset != from.gunoffset { flags |= P_GUNOFFSET; }
    if to.gunangles != from.gunangles { flags |= P_GUNANGLES; }
    if stats_mask(from, to, profile) != 0 { flags |= P_STATS; }

    flags
}

/// Writes the flags word and flagged fields of a packed delta. `extra`
/// is OR-ed into the flags (used for `P_REMOVE`).
pub fn write_delta_playerstate_packed(
    from: &PlayerState,
    to: &PlayerState,
    extra: u16,
    msg: &mut SizeBuf,
    profile: &ProtocolProfile,
) -> WireResult<u16> {
    let flags = packed_delta_flags(from, to, profile) | extra;

    msg_write_word(msg, flags);

    if flags & P_TYPE != 0 { msg_write_byte(msg, to.pmove.pm_type); }
    if flags & P_ORIGIN != 0 {
        msg_write_short(msg, to.pmove.origin[0]);
        msg_write_short(msg, to.pmove.origin[1]);
    }
    if flags & P_ORIGIN2 != 0 { msg_write_short(msg, to.pmove.origin[2]); }
    if flags & P_VIEWOFFSET != 0 { write_chars(msg, &to.viewoffset); }
    if flags & P_VIEWANGLES != 0 {
        msg_write_short(msg, to.viewangles[0]);
        msg_write_short(msg, to.viewangles[1]);
    }
    if flags & P_VIEWANGLE2 != 0 { msg_write_short(msg, to.viewangles[2]); }
    if flags & P_KICKANGLES != 0 { write_chars(msg, &to.kick_angles); }
    if flags & P_WEAPONINDEX != 0 { write_gunindex(msg, to.gunindex, profile)?; }
    if flags & P_WEAPONFRAME != 0 { msg_write_byte(msg, to.gunframe); }
    if flags & P_GUNOFFSET != 0 { write_chars(msg, &to.gunoffset); }
    if flags & P_GUNANGLES != 0 { write_chars(msg, &to.gunangles); }
    if flags & P_BLEND != 0 { write_blend(msg, from, to, profile); }
    if flags & P_FOV != 0 { msg_write_byte(msg, to.fov); }
    if flags & P_RDFLAGS != 0 { msg_write_byte(msg, to.rdflags); }
    if flags & P_STATS != 0 {
        write_stats(msg, stats_mask(from, to, profile), to, profile);
    }

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolFlags;

    fn ext2() -> ProtocolProfile {
        ProtocolProfile {
            flags: ProtocolFlags::all(),
            ..ProtocolProfile::standard()
        }
    }

    #[test]
    fn test_rdflags_only_delta_bytes() {
        let from = PlayerState { rdflags: 99, ..PlayerState::default() };
        let to = PlayerState { rdflags: 96, ..PlayerState::default() };
        let mut sb = SizeBuf::new();
        msg_write_byte(&mut sb, SVC_PLAYERINFO);
        write_delta_playerstate(&from, &to, &mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(sb.data, vec![0x11, 0x00, 0x40, 0x60, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_stats_in_ascending_order() {
        let from = PlayerState::default();
        let mut to = PlayerState::default();
        to.stats[1] = 100;
        to.stats[14] = -3;
        let mut sb = SizeBuf::new();
        write_delta_playerstate(&from, &to, &mut sb, &ProtocolProfile::standard()).unwrap();
        // flags 0, mask (1<<1)|(1<<14), then two shorts
        assert_eq!(
            sb.data,
            vec![0x00, 0x00, 0x02, 0x40, 0x00, 0x00, 100, 0x00, 0xfd, 0xff]
        );
        let decoded = read_delta_playerstate(&from, &mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(decoded, to);
    }

    #[test]
    fn test_full_client_roundtrip() {
        let from = PlayerState::default();
        let mut to = PlayerState::default();
        to.pmove.pm_type = 2;
        to.pmove.origin = [100, -200, 300];
        to.pmove.velocity = [1, 2, 3];
        to.pmove.pm_time = 9;
        to.pmove.pm_flags = 4;
        to.pmove.gravity = 800;
        to.pmove.delta_angles = [-1, 0, 1];
        to.viewoffset = [0, 0, 22];
        to.viewangles = [10, 20, 30];
        to.kick_angles = [-4, 4, 0];
        to.gunindex = 7;
        to.gunframe = 33;
        to.gunoffset = [1, 1, 1];
        to.blend = [255, 0, 0, 64];
        to.fov = 90;
        to.rdflags = 1;
        to.stats[31] = 77;
        let profile = ProtocolProfile::standard();
        let mut sb = SizeBuf::new();
        write_delta_playerstate(&from, &to, &mut sb, &profile).unwrap();
        let decoded = read_delta_playerstate(&from, &mut sb, &profile).unwrap();
        assert_eq!(decoded, to);
        assert_eq!(sb.remaining(), 0);
    }

    #[test]
    fn test_extensions2_blend_and_wide_stats() {
        let profile = ext2();
        let from = PlayerState::default();
        let mut to = PlayerState::default();
        to.blend[2] = 9;
        to.damage_blend[0] = 200;
        to.stats[63] = 5;
        to.gunindex = 600;
        let mut sb = SizeBuf::new();
        write_delta_playerstate(&from, &to, &mut sb, &profile).unwrap();
        // flags, gun word, blend mask + 2 bytes, varint mask (10 bytes) + short
        assert_eq!(sb.cursize(), 2 + 2 + 3 + 10 + 2);
        let decoded = read_delta_playerstate(&from, &mut sb, &profile).unwrap();
        assert_eq!(decoded, to);
    }

    #[test]
    fn test_damage_blend_not_carried_without_extensions2() {
        let from = PlayerState::default();
        let to = PlayerState { damage_blend: [1, 2, 3, 4], ..PlayerState::default() };
        assert_eq!(playerstate_delta_flags(&from, &to, &ProtocolProfile::standard()), 0);
    }

    #[test]
    fn test_gunindex_needs_extensions() {
        let to = PlayerState { gunindex: 256, ..PlayerState::default() };
        let mut sb = SizeBuf::new();
        assert!(write_delta_playerstate(&PlayerState::default(), &to, &mut sb, &ProtocolProfile::standard()).is_err());
    }

    #[test]
    fn test_packed_roundtrip_keeps_uncarried_fields() {
        let profile = ProtocolProfile::standard();
        let mut from = PlayerState::default();
        from.pmove.velocity = [5, 5, 5];
        let mut to = from.clone();
        to.pmove.origin = [1, 2, 3];
        to.viewangles = [0, 0, 9];
        to.gunoffset = [1, 0, 0];
        to.stats[0] = 1;
        let mut sb = SizeBuf::new();
        let flags = write_delta_playerstate_packed(&from, &to, 0, &mut sb, &profile).unwrap();
        assert_eq!(flags, P_ORIGIN | P_ORIGIN2 | P_VIEWANGLE2 | P_GUNOFFSET | P_STATS);
        assert_eq!(msg_read_word(&mut sb).unwrap(), flags);
        let decoded = read_delta_playerstate_packed(&from, flags, &mut sb, &profile).unwrap();
        assert_eq!(decoded, to);
        assert_eq!(decoded.pmove.velocity, [5, 5, 5]);
        assert_eq!(sb.remaining(), 0);
    }

    #[test]
    fn test_packed_no_stats_mask_without_flag() {
        let state = PlayerState::default();
        let mut sb = SizeBuf::new();
        let flags = write_delta_playerstate_packed(&state, &state, P_REMOVE, &mut sb, &ProtocolProfile::standard()).unwrap();
        assert_eq!(flags, P_REMOVE);
        assert_eq!(sb.data, vec![0x00, 0x80]);
    }

    #[test]
    fn test_truncated_playerinfo() {
        // viewangles flagged but only one short present
        let mut sb = SizeBuf::from_bytes(vec![0x00, 0x01, 0x10, 0x00]);
        assert!(matches!(
            read_delta_playerstate(&PlayerState::default(), &mut sb, &ProtocolProfile::standard()),
            Err(WireError::UnexpectedEndOfBuffer { .. })
        ));
    }
}
