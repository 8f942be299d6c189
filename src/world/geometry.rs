//! Runtime map entity tables.
//!
//! All entities live in dense arrays owned by [`Level`] and reference
//! each other by index; dereferencing happens through array lookups at
//! the call site. Everything is immutable during rendering except the
//! actor list and the gameplay-owned sector heights.

use bitflags::bitflags;
use glam::Vec2;

use crate::base::{Angle, Fixed};

pub type SectorId = u16;
pub type SideId = u16;
pub type LineId = u16;
pub type SegId = u32;
pub type SubSectorId = u32;
pub type ThingId = u32;

/// Ceiling texture number that triggers sky rendering.
pub const SKY_CEILING_PIC: u32 = u32::MAX;

/// Bounding box layout shared by lines and BSP nodes.
pub const BOX_TOP: usize = 0;
pub const BOX_BOTTOM: usize = 1;
pub const BOX_LEFT: usize = 2;
pub const BOX_RIGHT: usize = 3;

/*--------------------------- vertices -------------------------------*/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vertex {
    pub x: Fixed,
    pub y: Fixed,
}

/*--------------------------- sectors --------------------------------*/

#[derive(Clone, Debug)]
pub struct Sector {
    pub floor_h: Fixed,
    pub ceil_h: Fixed,
    /// Flat texture numbers; `ceiling_pic == SKY_CEILING_PIC` means sky.
    pub floor_pic: u32,
    pub ceiling_pic: u32,
    /// 0..=255.
    pub light_level: u32,
    pub special: u32,
    pub tag: u32,
}

/*--------------------------- sides ----------------------------------*/

#[derive(Clone, Debug)]
pub struct Side {
    pub tex_x_offset: f32,
    pub tex_y_offset: f32,
    pub top_texture: u32,
    pub bottom_texture: u32,
    pub mid_texture: u32,
    pub sector: SectorId,
}

/*--------------------------- lines ----------------------------------*/

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LineFlags: u32 {
        const BLOCKING        = 0x0001;
        const BLOCK_MONSTERS  = 0x0002;
        const TWO_SIDED       = 0x0004;
        /// Top texture is anchored to the ceiling rather than hanging down.
        const DONT_PEG_TOP    = 0x0008;
        /// Bottom texture is anchored to the ceiling rather than the floor.
        const DONT_PEG_BOTTOM = 0x0010;
        const SECRET          = 0x0020;
        const SOUND_BLOCK     = 0x0040;
        const DONT_DRAW       = 0x0080;
        /// Seen by the automap (latched by the renderer).
        const MAPPED          = 0x0100;
    }
}

/// Slope classification, kept for movement clipping collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlopeType {
    Horizontal,
    Vertical,
    Positive,
    Negative,
}

#[derive(Clone, Debug)]
pub struct Line {
    pub v1: Vertex,
    pub v2: Vertex,
    /// Float mirrors of the endpoints for the renderer.
    pub v1f: Vec2,
    pub v2f: Vec2,
    pub flags: LineFlags,
    pub special: u32,
    pub tag: u32,
    /// Front/back side indices; `sides[1]` is `None` for one-sided lines.
    pub sides: [Option<SideId>; 2],
    /// `[top, bottom, left, right]` in fixed map units.
    pub bbox: [Fixed; 4],
    pub slope: SlopeType,
    pub front_sector: SectorId,
    pub back_sector: Option<SectorId>,
    /// Fine-angle index of the line direction (for sliding movement).
    pub fine_angle: u32,
}

/*--------------------------- segs -----------------------------------*/

#[derive(Clone, Debug)]
pub struct Seg {
    pub v1: Vec2,
    pub v2: Vec2,
    pub angle: Angle,
    /// Extra texture x offset from BSP splitting.
    pub tex_x_offset: f32,
    pub side: SideId,
    pub line: LineId,
    /// Which side of the line this seg renders (0 or 1).
    pub line_side: u8,
    pub front_sector: SectorId,
    /// Present iff the line is two sided.
    pub back_sector: Option<SectorId>,
    /// Fake-contrast light multiplier.
    pub light_mul: f32,
}

/*--------------------------- subsectors -----------------------------*/

#[derive(Clone, Debug)]
pub struct SubSector {
    pub sector: SectorId,
    /// Segs are stored contiguously in the level seg array.
    pub first_seg: SegId,
    pub num_segs: u32,
}

/*--------------------------- BSP nodes ------------------------------*/

/// A node child is either another node or a leaf subsector; the on-disk
/// tag bit becomes an explicit sum type at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BspChild {
    Node(u32),
    SubSector(SubSectorId),
}

#[derive(Clone, Debug)]
pub struct Node {
    /// Partition line origin and direction in fixed coords.
    pub x: Fixed,
    pub y: Fixed,
    pub dx: Fixed,
    pub dy: Fixed,
    /// Child bounding boxes, `[top, bottom, left, right]` each.
    pub bbox: [[Fixed; 4]; 2],
    pub children: [BspChild; 2],
}

/*--------------------------- blockmap -------------------------------*/

#[derive(Clone, Debug, Default)]
pub struct BlockMap {
    pub origin_x: Fixed,
    pub origin_y: Fixed,
    /// Size in 128-unit blocks.
    pub width: u32,
    pub height: u32,
    /// Per-block list of intersecting line indices.
    pub block_lines: Vec<Vec<LineId>>,
}

/*--------------------------- actors ---------------------------------*/

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MapObjFlags: u32 {
        /// Rendered with the fuzzy 50% blend (spectres, invisibility).
        const SHADOW = 0x0004_0000;
    }
}

/// The renderer-facing view of a dynamic actor. Created and mutated by
/// the simulation collaborator; the renderer only reads it.
#[derive(Clone, Debug)]
pub struct MapObject {
    pub x: Fixed,
    pub y: Fixed,
    pub z: Fixed,
    pub angle: Angle,
    /// Sprite resource number, frame index within it, and whether the
    /// frame renders at full brightness.
    pub sprite: u32,
    pub frame: u32,
    pub full_bright: bool,
    pub flags: MapObjFlags,
    /// Sector currently containing the actor.
    pub sector: SectorId,
    /// Player actors are never drawn as sprites.
    pub is_player: bool,
}

/*--------------------------- the level ------------------------------*/

/// Runtime snapshot of one map. Owned by the level session; the
/// renderer borrows it for the lifetime of a frame.
#[derive(Default)]
pub struct Level {
    pub vertices: Vec<Vertex>,
    pub sectors: Vec<Sector>,
    pub sides: Vec<Side>,
    pub lines: Vec<Line>,
    pub segs: Vec<Seg>,
    pub subsectors: Vec<SubSector>,
    pub nodes: Vec<Node>,
    /// Bit matrix over sector pairs for O(1) sight rejection.
    pub reject: Vec<u8>,
    pub blockmap: BlockMap,
    /// Dynamic actors, owned by the simulation.
    pub things: Vec<MapObject>,
    /// Thing ids grouped by containing sector, rebuilt by the simulation
    /// whenever actors move.
    pub sector_things: Vec<Vec<ThingId>>,
}

impl Level {
    /// Index of the BSP root (the last node).
    #[inline(always)]
    pub fn bsp_root(&self) -> u32 {
        debug_assert!(!self.nodes.is_empty());
        (self.nodes.len() - 1) as u32
    }

    /// Iterate the seg indices of one subsector, in storage order.
    pub fn subsector_segs(&self, ss: SubSectorId) -> impl Iterator<Item = SegId> + '_ {
        let ss = &self.subsectors[ss as usize];
        ss.first_seg..ss.first_seg + ss.num_segs
    }

    /// Consult the reject matrix: false when the pair of sectors is
    /// marked mutually invisible.
    pub fn sectors_can_see(&self, a: SectorId, b: SectorId) -> bool {
        let bit = a as usize * self.sectors.len() + b as usize;
        match self.reject.get(bit >> 3) {
            Some(byte) => (byte >> (bit & 7)) & 1 == 0,
            None => true,
        }
    }

    /// Replace the actor tables and regroup them by sector.
    pub fn set_things(&mut self, things: Vec<MapObject>) {
        self.sector_things = vec![Vec::new(); self.sectors.len()];
        for (i, t) in things.iter().enumerate() {
            if let Some(list) = self.sector_things.get_mut(t.sector as usize) {
                list.push(i as ThingId);
            }
        }
        self.things = things;
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_matrix_bits() {
        let mut level = Level::default();
        level.sectors = vec![
            Sector {
                floor_h: 0,
                ceil_h: 0,
                floor_pic: 0,
                ceiling_pic: 0,
                light_level: 0,
                special: 0,
                tag: 0,
            };
            3
        ];
        // Mark pair (1, 2): bit index 1*3+2 = 5.
        level.reject = vec![0b0010_0000, 0x00];
        assert!(!level.sectors_can_see(1, 2));
        assert!(level.sectors_can_see(2, 1));
        assert!(level.sectors_can_see(0, 0));
    }

    #[test]
    fn set_things_groups_by_sector() {
        let mut level = Level::default();
        level.sectors = vec![
            Sector {
                floor_h: 0,
                ceil_h: 0,
                floor_pic: 0,
                ceiling_pic: 0,
                light_level: 0,
                special: 0,
                tag: 0,
            };
            2
        ];
        let thing = |sector| MapObject {
            x: 0,
            y: 0,
            z: 0,
            angle: 0,
            sprite: 0,
            frame: 0,
            full_bright: false,
            flags: MapObjFlags::empty(),
            sector,
            is_player: false,
        };
        level.set_things(vec![thing(1), thing(0), thing(1)]);
        assert_eq!(level.sector_things[0], vec![1]);
        assert_eq!(level.sector_things[1], vec![0, 2]);
    }
}
