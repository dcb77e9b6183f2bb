// tent.rs — temporary entity message layouts
// Copyright (C) 1997-2001 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use crate::error::{WireError, WireResult};
use crate::sizebuf::*;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempEvent {
    Gunshot = 0,
    Blood,
    Blaster,
    Railtrail,
    Shotgun,
    Explosion1,
    Explosion2,
    RocketExplosion,
    GrenadeExplosion,
    Sparks,
    Splash,
    Bubbletrail,
    ScreenSparks,
    ShieldSparks,
    BulletSparks,
    LaserSparks,
    ParasiteAttack,
    RocketExplosionWater,
    GrenadeExplosionWater,
    MedicCableAttack,
    BfgExplosion,
    BfgBigexplosion,
    Bosstport,
    BfgLaser,
    GrappleCable,
    WeldingSparks,
    Greenblood,
    Bluehyperblaster,
    PlasmaExplosion,
    TunnelSparks,
    Blaster2,
    Railtrail2,
    Flame,
    Lightning,
    Debugtrail,
    PlainExplosion,
    Flashlight,
    Forcewall,
    Heatbeam,
    MonsterHeatbeam,
    Steam,
    Bubbletrail2,
    Moreblood,
    HeatbeamSparks,
    HeatbeamSteam,
    ChainfistSmoke,
    ElectricSparks,
    TrackerExplosion,
    TeleportEffect,
    DballGoal,
    Widowbeamout,
    Nukeblast,
    Widowsplash,
    Explosion1Big,
    Explosion1Np,
    Flechette,
}

const TEMP_EVENTS: [TempEvent; 56] = {
    use TempEvent::*;
    [
        Gunshot, Blood, Blaster, Railtrail, Shotgun, Explosion1, Explosion2,
        RocketExplosion, GrenadeExplosion, Sparks, Splash, Bubbletrail, ScreenSparks,
        ShieldSparks, BulletSparks, LaserSparks, ParasiteAttack, RocketExplosionWater,
        GrenadeExplosionWater, MedicCableAttack, BfgExplosion, BfgBigexplosion, Bosstport,
        BfgLaser, GrappleCable, WeldingSparks, Greenblood, Bluehyperblaster,
        PlasmaExplosion, TunnelSparks, Blaster2, Railtrail2, Flame, Lightning, Debugtrail,
        PlainExplosion, Flashlight, Forcewall, Heatbeam, MonsterHeatbeam, Steam,
        Bubbletrail2, Moreblood, HeatbeamSparks, HeatbeamSteam, ChainfistSmoke,
        ElectricSparks, TrackerExplosion, TeleportEffect, DballGoal, Widowbeamout,
        Nukeblast, Widowsplash, Explosion1Big, Explosion1Np, Flechette,
    ]
};

/// Field sequence following the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeLayout {
    PosDir,
    /// count, pos, dir, color
    CountPosDirColor,
    PosPos2,
    Pos,
    EntPosPos2,
    /// ent, pos, pos2, offset
    Grapple,
    /// ent1, ent2, pos, pos2
    Lightning,
    /// pos, ent
    Flashlight,
    /// pos, pos2, color
    Forcewall,
    /// id, count, pos, dir, color, magnitude, time when id != -1
    Steam,
    /// id, pos
    Widowbeamout,
}

impl TempEvent {
    pub fn from_u8(v: u8) -> Option<Self> {
        TEMP_EVENTS.get(usize::from(v)).copied()
    }

    /// `None` for types that are never sent on the wire.
    pub fn layout(self) -> Option<TeLayout> {
        use TempEvent::*;
        let layout = match self {
            Blood | Gunshot | Sparks | BulletSparks | ScreenSparks | ShieldSparks | Shotgun
            | Blaster | Greenblood | Blaster2 | Flechette | HeatbeamSparks | HeatbeamSteam
            | Moreblood | ElectricSparks => TeLayout::PosDir,
            Splash | LaserSparks | WeldingSparks | TunnelSparks => TeLayout::CountPosDirColor,
            Bluehyperblaster | Railtrail | Bubbletrail | Debugtrail | Bubbletrail2 | BfgLaser => {
                TeLayout::PosPos2
            }
            GrenadeExplosion | GrenadeExplosionWater | Explosion2 | PlasmaExplosion
            | RocketExplosion | RocketExplosionWater | Explosion1 | Explosion1Np
            | Explosion1Big | BfgExplosion | BfgBigexplosion | Bosstport | PlainExplosion
            | ChainfistSmoke | TrackerExplosion | TeleportEffect | DballGoal | Widowsplash
            | Nukeblast => TeLayout::Pos,
            ParasiteAttack | MedicCableAttack | Heatbeam | MonsterHeatbeam => TeLayout::EntPosPos2,
            GrappleCable => TeLayout::Grapple,
            Lightning => TeLayout::Lightning,
            Flashlight => TeLayout::Flashlight,
            Forcewall => TeLayout::Forcewall,
            Steam => TeLayout::Steam,
            Widowbeamout => TeLayout::Widowbeamout,
            Railtrail2 | Flame => return None,
        };
        Some(layout)
    }
}

/// Decoded temporary entity; fields not used by the type's layout stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TempEntity {
    pub te_type: u8,
    pub pos1: [i16; 3],
    pub pos2: [i16; 3],
    pub offset: [i16; 3],
    pub dir: u8,
    pub count: u8,
    pub color: u8,
    pub entity1: i16,
    pub entity2: i16,
    pub magnitude: i16,
    pub time: i32,
}

fn layout_for(te_type: u8, offset: usize) -> WireResult<TeLayout> {
    TempEvent::from_u8(te_type)
        .and_then(TempEvent::layout)
        .ok_or_else(|| WireError::violation(offset, format!("bad temp entity type {}", te_type)))
}

/// Reads the body following an `svc_temp_entity` tag. An unknown type
/// cannot be skipped because its length is unknown.
pub fn read_temp_entity(msg: &mut SizeBuf) -> WireResult<TempEntity> {
    let start = msg.readcount;
    let te_type = msg_read_byte(msg)?;
    let layout = layout_for(te_type, start)?;
    let mut te = TempEntity { te_type, ..TempEntity::default() };

    match layout {
        TeLayout::PosDir => {
            te.pos1 = msg_read_pos(msg)?;
            te.dir = msg_read_byte(msg)?;
        }
        TeLayout::CountPosDirColor => {
            te.count = msg_read_byte(msg)?;
            te.pos1 = msg_read_pos(msg)?;
            te.dir = msg_read_byte(msg)?;
            te.color = msg_read_byte(msg)?;
        }
        TeLayout::PosPos2 => {
            te.pos1 = msg_read_pos(msg)?;
            te.pos2 = msg_read_pos(msg)?;
        }
        TeLayout::Pos => {
            te.pos1 = msg_read_pos(msg)?;
        }
        TeLayout::EntPosPos2 => {
            te.entity1 = msg_read_short(msg)?;
            te.pos1 = msg_read_pos(msg)?;
            te.pos2 = msg_read_pos(msg)?;
        }
        TeLayout::Grapple => {
            te.entity1 = msg_read_short(msg)?;
            te.pos1 = msg_read_pos(msg)?;
            te.pos2 = msg_read_pos(msg)?;
            te.offset = msg_read_pos(msg)?;
        }
        TeLayout::Lightning => {
            te.entity1 = msg_read_short(msg)?;
            te.entity2 = msg_read_short(msg)?;
            te.pos1 = msg_read_pos(msg)?;
            te.pos2 = msg_read_pos(msg)?;
        }
        TeLayout::Flashlight => {
            te.pos1 = msg_read_pos(msg)?;
            te.entity1 = msg_read_short(msg)?;
        }
        TeLayout::Forcewall => {
            te.pos1 = msg_read_pos(msg)?;
            te.pos2 = msg_read_pos(msg)?;
            te.color = msg_read_byte(msg)?;
        }
        TeLayout::Steam => {
            te.entity1 = msg_read_short(msg)?;
            te.count = msg_read_byte(msg)?;
            te.pos1 = msg_read_pos(msg)?;
            te.dir = msg_read_byte(msg)?;
            te.color = msg_read_byte(msg)?;
            te.magnitude = msg_read_short(msg)?;
            if te.entity1 != -1 {
                te.time = msg_read_long(msg)?;
            }
        }
        TeLayout::Widowbeamout => {
            te.entity1 = msg_read_short(msg)?;
            te.pos1 = msg_read_pos(msg)?;
        }
    }

    Ok(te)
}

/// Writes the type byte and body (without the message tag).
pub fn write_temp_entity(msg: &mut SizeBuf, te: &TempEntity) -> WireResult<()> {
    let layout = layout_for(te.te_type, 0)?;
    msg_write_byte(msg, te.te_type);

    match layout {
        TeLayout::PosDir => {
            msg_write_pos(msg, &te.pos1);
            msg_write_byte(msg, te.dir);
        }
        TeLayout::CountPosDirColor => {
            msg_write_byte(msg, te.count);
            msg_write_pos(msg, &te.pos1);
            msg_write_byte(msg, te.dir);
            msg_write_byte(msg, te.color);
        }
        TeLayout::PosPos2 => {
            msg_write_pos(msg, &te.pos1);
            msg_write_pos(msg, &te.pos2);
        }
        TeLayout::Pos => msg_write_pos(msg, &te.pos1),
        TeLayout::EntPosPos2 => {
            msg_write_short(msg, te.entity1);
            msg_write_pos(msg, &te.pos1);
            msg_write_pos(msg, &te.pos2);
        }
        TeLayout::Grapple => {
            msg_write_short(msg, te.entity1);
            msg_write_pos(msg, &te.pos1);
            msg_write_pos(msg, &te.pos2);
            msg_write_pos(msg, &te.offset);
        }
        TeLayout::Lightning => {
            msg_write_short(msg, te.entity1);
            msg_write_short(msg, te.entity2);
            msg_write_pos(msg, &te.pos1);
            msg_write_pos(msg, &te.pos2);
        }
        TeLayout::Flashlight => {
            msg_write_pos(msg, &te.pos1);
            msg_write_short(msg, te.entity1);
        }
        TeLayout::Forcewall => {
            msg_write_pos(msg, &te.pos1);
            msg_write_pos(msg, &te.pos2);
            msg_write_byte(msg, te.color);
        }
        TeLayout::Steam => {
            msg_write_short(msg, te.entity1);
            msg_write_byte(msg, te.count);
            msg_write_pos(msg, &te.pos1);
            msg_write_byte(msg, te.dir);
            msg_write_byte(msg, te.color);
            msg_write_short(msg, te.magnitude);
            if te.entity1 != -1 {
                msg_write_long(msg, te.time);
            }
        }
        TeLayout::Widowbeamout => {
            msg_write_short(msg, te.entity1);
            msg_write_pos(msg, &te.pos1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_covers_all_types() {
        for v in 0..56u8 {
            assert_eq!(TempEvent::from_u8(v).map(|e| e as u8), Some(v));
        }
        assert_eq!(TempEvent::from_u8(56), None);
    }

    #[test]
    fn test_gunshot_layout() {
        let mut sb = SizeBuf::from_bytes(vec![0, 8, 0, 16, 0, 24, 0, 5]);
        let te = read_temp_entity(&mut sb).unwrap();
        assert_eq!(te.te_type, TempEvent::Gunshot as u8);
        assert_eq!(te.pos1, [8, 16, 24]);
        assert_eq!(te.dir, 5);
        assert_eq!(sb.remaining(), 0);
    }

    #[test]
    fn test_steam_time_only_with_id() {
        let mut te = TempEntity {
            te_type: TempEvent::Steam as u8,
            entity1: -1,
            count: 3,
            magnitude: 40,
            time: 1234,
            ..TempEntity::default()
        };
        let mut sb = SizeBuf::new();
        write_temp_entity(&mut sb, &te).unwrap();
        assert_eq!(sb.cursize(), 1 + 2 + 1 + 6 + 1 + 1 + 2);
        let decoded = read_temp_entity(&mut sb).unwrap();
        assert_eq!(decoded.time, 0);

        te.entity1 = 7;
        let mut sb = SizeBuf::new();
        write_temp_entity(&mut sb, &te).unwrap();
        assert_eq!(read_temp_entity(&mut sb).unwrap(), te);
    }

    #[test]
    fn test_lightning_roundtrip() {
        let te = TempEntity {
            te_type: TempEvent::Lightning as u8,
            entity1: 4,
            entity2: 9,
            pos1: [1, 2, 3],
            pos2: [4, 5, 6],
            ..TempEntity::default()
        };
        let mut sb = SizeBuf::new();
        write_temp_entity(&mut sb, &te).unwrap();
        assert_eq!(read_temp_entity(&mut sb).unwrap(), te);
    }

    #[test]
    fn test_unknown_type_is_violation() {
        let mut sb = SizeBuf::from_bytes(vec![200, 0, 0]);
        assert!(matches!(
            read_temp_entity(&mut sb),
            Err(WireError::ProtocolViolation { offset: 0, .. })
        ));
        let mut sb = SizeBuf::from_bytes(vec![TempEvent::Flame as u8]);
        assert!(read_temp_entity(&mut sb).is_err());
    }
}
