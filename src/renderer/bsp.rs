//! Front-to-back BSP traversal.
//!
//! Walks the static tree from the view position, submitting each seg of
//! every visited subsector to the seg pipeline in order, and gathering
//! the sprites of each sector the first time it is touched this frame.
//! Traversal stops outright once every screen column is fully occluded,
//! which bounds the work sharply in dense corridors.

use glam::vec2;

use crate::base::angle::{ANG180, Angle, point_to_angle};
use crate::base::fixed::Fixed;
use crate::renderer::Renderer;
use crate::world::geometry::{
    BOX_BOTTOM, BOX_LEFT, BOX_RIGHT, BOX_TOP, BspChild, Level, SubSectorId,
};
use crate::world::sprites::SpriteBank;
use crate::world::texture::TextureBank;

/// Which two bounding box corners subtend the widest angle, by view
/// position relative to the box (3x3 cases, row-major; 5 = inside).
/// Entries index `[x1, y1, x2, y2]` into a `[top, bottom, left, right]`
/// box.
const CHECK_COORD: [[usize; 4]; 11] = [
    [3, 0, 2, 1], // above left
    [3, 0, 2, 0], // above center
    [3, 1, 2, 0], // above right
    [0, 0, 0, 0],
    [2, 0, 2, 1], // center left
    [0, 0, 0, 0], // inside
    [3, 1, 3, 0], // center right
    [0, 0, 0, 0],
    [2, 0, 3, 1], // below left
    [2, 1, 3, 1], // below center
    [2, 1, 3, 0], // below right
];

impl Renderer {
    /// Walk the whole tree and submit everything visible.
    pub(crate) fn do_bsp_traversal(
        &mut self,
        level: &Level,
        textures: &TextureBank,
        sprites: &SpriteBank,
    ) {
        if level.nodes.is_empty() {
            // Degenerate map: a single subsector with no partitions.
            if !level.subsectors.is_empty() {
                self.visit_subsector(level, textures, sprites, 0);
            }
            return;
        }
        self.recurse_bsp_node(level, textures, sprites, BspChild::Node(level.bsp_root()));
    }

    fn recurse_bsp_node(
        &mut self,
        level: &Level,
        textures: &TextureBank,
        sprites: &SpriteBank,
        child: BspChild,
    ) {
        // Every column full: nothing further back can contribute.
        if self.num_full_seg_cols >= self.metrics.width {
            return;
        }

        match child {
            BspChild::SubSector(ss) => self.visit_subsector(level, textures, sprites, ss),
            BspChild::Node(n) => {
                let node = &level.nodes[n as usize];
                let side = node.point_side(vec2(self.view_x, self.view_y));

                // Near child first so segs arrive in depth order.
                self.recurse_bsp_node(level, textures, sprites, node.children[side]);

                if self.num_full_seg_cols >= self.metrics.width {
                    return;
                }

                let far = side ^ 1;
                if self.is_bbox_in_frustum(&level.nodes[n as usize].bbox[far]) {
                    self.recurse_bsp_node(level, textures, sprites, level.nodes[n as usize].children[far]);
                }
            }
        }
    }

    fn visit_subsector(
        &mut self,
        level: &Level,
        textures: &TextureBank,
        sprites: &SpriteBank,
        ss: SubSectorId,
    ) {
        let sector = level.subsectors[ss as usize].sector;

        // Gather the sector's sprites the first time this frame that
        // any of its subsectors is visited.
        if self.sector_visited[sector as usize] != self.frame_count {
            self.sector_visited[sector as usize] = self.frame_count;
            for &thing_id in &level.sector_things[sector as usize] {
                self.add_sprite_to_frame(level, sprites, &level.things[thing_id as usize]);
            }
        }

        for seg_id in level.subsector_segs(ss) {
            self.add_seg_to_frame(level, textures, seg_id);
        }
    }

    /// Frustum check for the far child's bounding box: compute the BAM
    /// angles to its two extreme corners and reject when the whole span
    /// lies outside the doubled clip angle.
    pub(crate) fn is_bbox_in_frustum(&self, bbox: &[Fixed; 4]) -> bool {
        let boxx = if self.view_x_frac <= bbox[BOX_LEFT] {
            0
        } else if self.view_x_frac < bbox[BOX_RIGHT] {
            1
        } else {
            2
        };
        let boxy = if self.view_y_frac >= bbox[BOX_TOP] {
            0
        } else if self.view_y_frac > bbox[BOX_BOTTOM] {
            1
        } else {
            2
        };

        let boxpos = boxy * 4 + boxx;
        if boxpos == 5 {
            return true; // inside the box
        }

        let coords = &CHECK_COORD[boxpos];
        let x1 = bbox[coords[0]];
        let y1 = bbox[coords[1]];
        let x2 = bbox[coords[2]];
        let y2 = bbox[coords[3]];

        // Corner angles, made view relative.
        let angle1: Angle = point_to_angle(self.view_x_frac, self.view_y_frac, x1, y1)
            .wrapping_sub(self.view_angle);
        let angle2: Angle = point_to_angle(self.view_x_frac, self.view_y_frac, x2, y2)
            .wrapping_sub(self.view_angle);

        let span = angle1.wrapping_sub(angle2);
        if span >= ANG180 {
            return true; // the box wraps around behind the view
        }

        let clip = self.metrics.clip_angle;
        let double_clip = self.metrics.double_clip_angle;

        // Shift both corner angles so the frustum covers [0, 2*clip];
        // treated as signed, anything beyond is outside on that side.
        let tspan = angle1.wrapping_add(clip);
        if tspan > double_clip {
            let overshoot = tspan.wrapping_sub(double_clip);
            if overshoot >= span {
                return false; // entirely off the left side
            }
        }

        let tspan = clip.wrapping_sub(angle2);
        if tspan > double_clip {
            let overshoot = tspan.wrapping_sub(double_clip);
            if overshoot >= span {
                return false; // entirely off the right side
            }
        }

        true
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::angle::ANG90;
    use crate::base::fixed::int_to_fixed;
    use crate::renderer::ViewParams;
    use crate::world::geometry::{Node, Sector, SubSector};

    fn sector() -> Sector {
        Sector {
            floor_h: 0,
            ceil_h: int_to_fixed(128),
            floor_pic: 0,
            ceiling_pic: 0,
            light_level: 160,
            special: 0,
            tag: 0,
        }
    }

    /// Two empty subsectors split by a north-pointing partition.
    fn two_room_level() -> Level {
        let mut level = Level::default();
        level.sectors = vec![sector(), sector()];
        level.sector_things = vec![Vec::new(), Vec::new()];
        level.subsectors = vec![
            SubSector {
                sector: 0,
                first_seg: 0,
                num_segs: 0,
            },
            SubSector {
                sector: 1,
                first_seg: 0,
                num_segs: 0,
            },
        ];
        let big = int_to_fixed(4096);
        level.nodes = vec![Node {
            x: 0,
            y: 0,
            dx: 0,
            dy: int_to_fixed(1),
            // [top, bottom, left, right] per child
            bbox: [[big, -big, 0, big], [big, -big, -big, 0]],
            children: [BspChild::SubSector(0), BspChild::SubSector(1)],
        }];
        level
    }

    fn north_view(x: i32, y: i32) -> ViewParams {
        ViewParams {
            x: int_to_fixed(x),
            y: int_to_fixed(y),
            z: int_to_fixed(41),
            angle: ANG90,
            extra_light: 0,
        }
    }

    #[test]
    fn traversal_visits_every_sector_once_per_frame() {
        let level = two_room_level();
        let mut r = Renderer::new(0);
        r.pre_draw(&level, &north_view(10, 10));

        let textures = TextureBank::init(
            &crate::rez::archive::ResourceFile::from_bytes(minimal_texture_archive()).unwrap(),
            50,
        )
        .unwrap();
        let sprites = SpriteBank::new(1000, 0);

        r.do_bsp_traversal(&level, &textures, &sprites);
        assert_eq!(r.sector_visited[0], r.frame_count);
        assert_eq!(r.sector_visited[1], r.frame_count);
    }

    #[test]
    fn traversal_stops_when_screen_is_full() {
        let level = two_room_level();
        let mut r = Renderer::new(0);
        r.pre_draw(&level, &north_view(10, 10));

        let textures = TextureBank::init(
            &crate::rez::archive::ResourceFile::from_bytes(minimal_texture_archive()).unwrap(),
            50,
        )
        .unwrap();
        let sprites = SpriteBank::new(1000, 0);

        r.num_full_seg_cols = r.metrics.width;
        r.do_bsp_traversal(&level, &textures, &sprites);
        assert_eq!(r.sector_visited[0], 0);
        assert_eq!(r.sector_visited[1], 0);
    }

    #[test]
    fn bbox_behind_the_view_is_culled() {
        let level = two_room_level();
        let mut r = Renderer::new(0);
        // Stand north of a box and face further north: the box is
        // entirely behind.
        r.pre_draw(&level, &north_view(0, 1000));

        let behind = [
            int_to_fixed(500),  // top
            int_to_fixed(100),  // bottom
            int_to_fixed(-100), // left
            int_to_fixed(100),  // right
        ];
        assert!(!r.is_bbox_in_frustum(&behind));

        let ahead = [
            int_to_fixed(2000),
            int_to_fixed(1500),
            int_to_fixed(-100),
            int_to_fixed(100),
        ];
        assert!(r.is_bbox_in_frustum(&ahead));
    }

    #[test]
    fn bbox_containing_the_view_is_always_visible() {
        let level = two_room_level();
        let mut r = Renderer::new(0);
        r.pre_draw(&level, &north_view(0, 0));
        let surrounding = [
            int_to_fixed(100),
            int_to_fixed(-100),
            int_to_fixed(-100),
            int_to_fixed(100),
        ];
        assert!(r.is_bbox_in_frustum(&surrounding));
    }

    #[test]
    fn bbox_far_to_the_side_is_culled() {
        let level = two_room_level();
        let mut r = Renderer::new(0);
        r.pre_draw(&level, &north_view(0, 0));
        // A box far east while facing north sits outside the 90 degree
        // frustum.
        let east = [
            int_to_fixed(50),
            int_to_fixed(-50),
            int_to_fixed(2000),
            int_to_fixed(2100),
        ];
        assert!(!r.is_bbox_in_frustum(&east));
    }

    /// The tiniest valid texture-info archive (no walls, no flats).
    fn minimal_texture_archive() -> Vec<u8> {
        let mut info = Vec::new();
        info.extend(&0u32.to_be_bytes());
        info.extend(&60u32.to_be_bytes());
        info.extend(&0u32.to_be_bytes());
        info.extend(&70u32.to_be_bytes());

        let mut out = Vec::<u8>::new();
        out.extend_from_slice(b"BRGR");
        out.extend(&1u32.to_be_bytes());
        out.extend(&24u32.to_be_bytes());
        out.extend(&1u32.to_be_bytes()); // type
        out.extend(&50u32.to_be_bytes()); // start
        out.extend(&1u32.to_be_bytes()); // count
        out.extend(&(12 + 24u32).to_be_bytes());
        out.extend(&(info.len() as u32).to_be_bytes());
        out.extend(&0u32.to_be_bytes());
        out.extend(&info);
        out
    }
}
