//! Seg pipeline: view-space transform, homogeneous clipping and
//! front/back classification, up to the point where columns are emitted.
//!
//! Coordinate notes:
//!  - Map xy is the ground plane and z is height. After the view
//!    transform, view-space x is "right on screen" and y is depth.
//!  - The projection matrix treats depth as the usual z, so a seg's
//!    clip-space `w` is simply its view-space y.
//!  - A point is inside the clip volume when `-w <= c <= w` holds for
//!    the clipped coordinate.

use crate::base::fixed::fixed_to_float;
use crate::world::geometry::{Level, Seg};

/// Sparse 4x4 perspective projection. Omitted elements are zero except
/// the implicit `r3c2 = 1`, which is why `w` ends up as the input depth.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectionMatrix {
    pub r0c0: f32,
    pub r1c1: f32,
    pub r2c2: f32,
    pub r2c3: f32,
}

impl ProjectionMatrix {
    /// The aspect ratio is a fixed property of the projection, not
    /// derived from the pixel dimensions.
    pub fn new(z_near: f32, z_far: f32, fov: f32) -> Self {
        let f = (fov * 0.5).tan();
        let a = super::VIEW_ASPECT_RATIO;
        Self {
            r0c0: 1.0 / f,
            r1c1: -a / f,
            r2c2: -z_far / (z_near - z_far),
            r2c3: -(z_near * z_far) / (z_far - z_near),
        }
    }
}

/// 3D coordinates and attributes for one seg on its way to the screen.
#[derive(Clone, Copy, Debug, Default)]
pub struct DrawSeg {
    // 1st and 2nd wall points: x, y (depth after projection) and w.
    pub p1x: f32,
    pub p1y: f32,
    pub p1w: f32,
    pub p2x: f32,
    pub p2y: f32,
    pub p2w: f32,

    // Top/bottom z at each point, front and back sector.
    pub p1tz: f32,
    pub p1bz: f32,
    pub p1tz_back: f32,
    pub p1bz_back: f32,
    pub p2tz: f32,
    pub p2bz: f32,
    pub p2tz_back: f32,
    pub p2bz_back: f32,

    // Emission decisions, made while the z values are computed.
    pub emit_ceiling: bool,
    pub emit_floor: bool,
    pub emit_upper_occluder: bool,
    pub emit_lower_occluder: bool,
    pub upper_occluder_uses_back_z: bool,
    pub lower_occluder_uses_back_z: bool,

    // Vertex attributes untouched by the transforms but clipped along
    // with the points and interpolated across columns.
    pub p1_tex_x: f32,
    pub p2_tex_x: f32,
    pub p1_world_x: f32,
    pub p1_world_y: f32,
    pub p2_world_x: f32,
    pub p2_world_y: f32,
}

/// Copy the seg attributes that survive into column interpolation.
pub fn populate_seg_vertex_attribs(seg: &Seg, side_tex_x_offset: f32, out: &mut DrawSeg) {
    let seg_len = (seg.v2 - seg.v1).length();
    let tex_x_offset = seg.tex_x_offset + side_tex_x_offset;

    out.p1_tex_x = tex_x_offset;
    // A 64-unit wall with a 64-unit texture must never sample x = 64.0.
    out.p2_tex_x = tex_x_offset + seg_len - 0.001;

    out.p1_world_x = seg.v1.x;
    out.p1_world_y = seg.v1.y;
    out.p2_world_x = seg.v2.x;
    out.p2_world_y = seg.v2.y;
}

/// Translate by the view position and rotate so the view direction
/// becomes +y (depth) and screen-right becomes +x.
pub fn transform_seg_xy_to_view_space(
    seg: &Seg,
    view_x: f32,
    view_y: f32,
    view_sin: f32,
    view_cos: f32,
    out: &mut DrawSeg,
) {
    let p1x = seg.v1.x - view_x;
    let p1y = seg.v1.y - view_y;
    let p2x = seg.v2.x - view_x;
    let p2y = seg.v2.y - view_y;

    out.p1x = view_cos * p1x - view_sin * p1y;
    out.p1y = view_sin * p1x + view_cos * p1y;
    out.p2x = view_cos * p2x - view_sin * p2y;
    out.p2y = view_sin * p2x + view_cos * p2y;
}

/// Front-facing segs read left to right on screen; anything else is a
/// back face.
pub fn is_screen_space_seg_back_facing(seg: &DrawSeg) -> bool {
    seg.p1x >= seg.p2x
}

pub fn transform_seg_xyw_to_clip_space(proj: &ProjectionMatrix, seg: &mut DrawSeg) {
    let y1 = seg.p1y;
    let y2 = seg.p2y;

    seg.p1x *= proj.r0c0;
    seg.p2x *= proj.r0c0;
    seg.p1y = proj.r2c2 * y1 + proj.r2c3;
    seg.p2y = proj.r2c2 * y2 + proj.r2c3;
    seg.p1w = y1;
    seg.p2w = y2;
}

/// Which frustum plane to clip against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipPlane {
    /// NDC y = -1 (the near plane in this layout).
    Front,
    /// NDC x = -1.
    Left,
    /// NDC x = +1.
    Right,
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Clip the seg against one plane of the view frustum.
///
/// Returns false when the whole seg is outside. When one endpoint is
/// outside, it is replaced with the plane intersection: x, y, w and the
/// interpolated vertex attributes all move, and `w` is pinned so the
/// clipped coordinate lands exactly on the NDC boundary.
pub fn clip_seg_against_plane(seg: &mut DrawSeg, plane: ClipPlane) -> bool {
    let (d1, d2) = match plane {
        ClipPlane::Front => (seg.p1y + seg.p1w, seg.p2y + seg.p2w),
        ClipPlane::Left => (seg.p1x + seg.p1w, seg.p2x + seg.p2w),
        ClipPlane::Right => (-seg.p1x + seg.p1w, -seg.p2x + seg.p2w),
    };

    let p1_inside = d1 >= 0.0;
    let p2_inside = d2 >= 0.0;
    if p1_inside == p2_inside {
        return p1_inside;
    }

    let t = d1.abs() / (d1.abs() + d2.abs());
    let new_x = lerp(seg.p1x, seg.p2x, t);
    let new_y = lerp(seg.p1y, seg.p2y, t);
    let new_tex_x = lerp(seg.p1_tex_x, seg.p2_tex_x, t);
    let new_world_x = lerp(seg.p1_world_x, seg.p2_world_x, t);
    let new_world_y = lerp(seg.p1_world_y, seg.p2_world_y, t);

    let new_w = match plane {
        ClipPlane::Front => -new_y,
        ClipPlane::Left => -new_x,
        ClipPlane::Right => new_x,
    };

    if p1_inside {
        seg.p2x = new_x;
        seg.p2y = new_y;
        seg.p2w = new_w;
        seg.p2_tex_x = new_tex_x;
        seg.p2_world_x = new_world_x;
        seg.p2_world_y = new_world_y;
    } else {
        seg.p1x = new_x;
        seg.p1y = new_y;
        seg.p1w = new_w;
        seg.p1_tex_x = new_tex_x;
        seg.p1_world_x = new_world_x;
        seg.p1_world_y = new_world_y;
    }
    true
}

/// Fill in the clip-space z (height) values, done lazily once the seg
/// has survived x/y clipping. This also decides the floor/ceiling
/// emission and the occluder policy, which is easiest to determine here.
pub fn add_clip_space_z_values(
    draw_seg: &mut DrawSeg,
    seg: &Seg,
    level: &Level,
    view_z: f32,
    proj: &ProjectionMatrix,
) {
    let front = &level.sectors[seg.front_sector as usize];
    let front_floor_z = fixed_to_float(front.floor_h);
    let front_ceil_z = fixed_to_float(front.ceil_h);
    let front_floor_view_z = front_floor_z - view_z;
    let front_ceil_view_z = front_ceil_z - view_z;

    draw_seg.emit_ceiling = front_ceil_view_z > 0.0;
    draw_seg.emit_floor = front_floor_view_z < 0.0;

    draw_seg.p1tz = front_ceil_view_z * proj.r1c1;
    draw_seg.p1bz = front_floor_view_z * proj.r1c1;
    draw_seg.p2tz = front_ceil_view_z * proj.r1c1;
    draw_seg.p2bz = front_floor_view_z * proj.r1c1;

    let Some(back_sector) = seg.back_sector else {
        draw_seg.p1tz_back = 0.0;
        draw_seg.p1bz_back = 0.0;
        draw_seg.p2tz_back = 0.0;
        draw_seg.p2bz_back = 0.0;
        return;
    };

    let back = &level.sectors[back_sector as usize];
    let back_floor_z = fixed_to_float(back.floor_h);
    let back_ceil_z = fixed_to_float(back.ceil_h);
    let back_floor_view_z = back_floor_z - view_z;
    let back_ceil_view_z = back_ceil_z - view_z;

    draw_seg.p1tz_back = back_ceil_view_z * proj.r1c1;
    draw_seg.p1bz_back = back_floor_view_z * proj.r1c1;
    draw_seg.p2tz_back = back_ceil_view_z * proj.r1c1;
    draw_seg.p2bz_back = back_floor_view_z * proj.r1c1;

    // Upper/lower occluder policy. The clip floor guards against closed
    // doors and crushers, which occlude everything across the opening.
    let clip_floor_z = front_floor_z.max(back_floor_z);

    if clip_floor_z < back_ceil_z {
        if front_floor_z < back_floor_z {
            draw_seg.emit_lower_occluder = view_z <= back_floor_z;
            draw_seg.lower_occluder_uses_back_z = true;
        } else if front_floor_z > back_floor_z {
            draw_seg.emit_lower_occluder = view_z >= back_floor_z;
            draw_seg.lower_occluder_uses_back_z = false;
        } else {
            draw_seg.emit_lower_occluder = false;
        }

        if front_ceil_z < back_ceil_z {
            draw_seg.emit_upper_occluder = view_z <= back_ceil_z;
            draw_seg.upper_occluder_uses_back_z = false;
        } else if front_ceil_z > back_ceil_z {
            draw_seg.emit_upper_occluder = view_z >= back_ceil_z;
            draw_seg.upper_occluder_uses_back_z = true;
        } else {
            draw_seg.emit_upper_occluder = false;
        }
    } else {
        draw_seg.emit_lower_occluder = true;
        draw_seg.lower_occluder_uses_back_z = true;
        draw_seg.emit_upper_occluder = true;
        draw_seg.upper_occluder_uses_back_z = true;
    }
}

/// Perspective divide into normalized device coordinates. Returns the
/// reciprocal depths for later interpolation; `w` itself is dead after
/// this point.
pub fn do_perspective_division(seg: &mut DrawSeg) -> (f32, f32) {
    let w1_inv = 1.0 / seg.p1w;
    let w2_inv = 1.0 / seg.p2w;

    seg.p1x *= w1_inv;
    seg.p1y *= w1_inv;
    seg.p2x *= w2_inv;
    seg.p2y *= w2_inv;

    seg.p1tz *= w1_inv;
    seg.p1bz *= w1_inv;
    seg.p1tz_back *= w1_inv;
    seg.p1bz_back *= w1_inv;

    seg.p2tz *= w2_inv;
    seg.p2bz *= w2_inv;
    seg.p2tz_back *= w2_inv;
    seg.p2bz_back *= w2_inv;

    (w1_inv, w2_inv)
}

/// Map NDC x and z from [-1, +1] to pixel coordinates. A half pixel is
/// shaved off the ranges so a coordinate at 100% never lands on the
/// width/height itself.
pub fn transform_seg_xz_to_screen_space(seg: &mut DrawSeg, view_w: u32, view_h: u32) {
    let vw = view_w as f32 - 0.5;
    let vh = view_h as f32 - 0.5;

    seg.p1x = (seg.p1x * 0.5 + 0.5) * vw;
    seg.p2x = (seg.p2x * 0.5 + 0.5) * vw;

    seg.p1tz = (seg.p1tz * 0.5 + 0.5) * vh;
    seg.p1bz = (seg.p1bz * 0.5 + 0.5) * vh;
    seg.p2tz = (seg.p2tz * 0.5 + 0.5) * vh;
    seg.p2bz = (seg.p2bz * 0.5 + 0.5) * vh;

    seg.p1tz_back = (seg.p1tz_back * 0.5 + 0.5) * vh;
    seg.p1bz_back = (seg.p1bz_back * 0.5 + 0.5) * vh;
    seg.p2tz_back = (seg.p2tz_back * 0.5 + 0.5) * vh;
    seg.p2bz_back = (seg.p2bz_back * 0.5 + 0.5) * vh;
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{FOV, Z_FAR, Z_NEAR};
    use glam::vec2;

    fn seg_between(v1: glam::Vec2, v2: glam::Vec2) -> Seg {
        Seg {
            v1,
            v2,
            angle: 0,
            tex_x_offset: 0.0,
            side: 0,
            line: 0,
            line_side: 0,
            front_sector: 0,
            back_sector: None,
            light_mul: 1.0,
        }
    }

    /// View at the origin facing north: view sin/cos for the rotation
    /// that maps +y (world north) onto +y (depth).
    fn north_view() -> (f32, f32) {
        // rotation by 90 deg - 90 deg = identity
        (0.0, 1.0)
    }

    #[test]
    fn view_space_transform_keeps_north_as_depth() {
        let (sin, cos) = north_view();
        let seg = seg_between(vec2(-8.0, 10.0), vec2(8.0, 10.0));
        let mut ds = DrawSeg::default();
        transform_seg_xy_to_view_space(&seg, 0.0, 0.0, sin, cos, &mut ds);
        assert_eq!((ds.p1x, ds.p1y), (-8.0, 10.0));
        assert_eq!((ds.p2x, ds.p2y), (8.0, 10.0));
        assert!(!is_screen_space_seg_back_facing(&ds));
    }

    #[test]
    fn reversed_seg_is_back_facing() {
        let (sin, cos) = north_view();
        let seg = seg_between(vec2(8.0, 10.0), vec2(-8.0, 10.0));
        let mut ds = DrawSeg::default();
        transform_seg_xy_to_view_space(&seg, 0.0, 0.0, sin, cos, &mut ds);
        assert!(is_screen_space_seg_back_facing(&ds));
    }

    #[test]
    fn near_plane_clip_literal_case() {
        // Endpoints at depth 2 and -2 with a near plane at depth 1 clip
        // to depths 2 and 1.
        let proj = ProjectionMatrix::new(1.0, Z_FAR, FOV);
        let mut ds = DrawSeg {
            p1x: 0.0,
            p1y: 2.0,
            p2x: 0.0,
            p2y: -2.0,
            p1_tex_x: 0.0,
            p2_tex_x: 4.0,
            ..DrawSeg::default()
        };
        transform_seg_xyw_to_clip_space(&proj, &mut ds);
        assert!(clip_seg_against_plane(&mut ds, ClipPlane::Front));

        // The clipped endpoint sits on the near plane: y == -w in clip
        // space, and the recovered depth is 1.
        assert!((ds.p2y + ds.p2w).abs() < 1e-3);
        assert!((ds.p2w - Z_NEAR).abs() < 1e-3);
        // Attributes interpolate: t = (2-1)/(2-(-2)) = 0.25 of the way.
        assert!((ds.p2_tex_x - 1.0).abs() < 1e-3);
        // The untouched endpoint keeps its depth.
        assert!((ds.p1w - 2.0).abs() < 1e-6);
    }

    #[test]
    fn seg_entirely_behind_near_plane_is_rejected() {
        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
        let mut ds = DrawSeg {
            p1y: -3.0,
            p2y: -2.0,
            ..DrawSeg::default()
        };
        transform_seg_xyw_to_clip_space(&proj, &mut ds);
        assert!(!clip_seg_against_plane(&mut ds, ClipPlane::Front));
    }

    #[test]
    fn left_right_plane_rejection() {
        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
        // Entirely to the right: x > w at both endpoints.
        let mut ds = DrawSeg {
            p1x: 30.0,
            p1y: 10.0,
            p2x: 40.0,
            p2y: 10.0,
            ..DrawSeg::default()
        };
        transform_seg_xyw_to_clip_space(&proj, &mut ds);
        assert!(clip_seg_against_plane(&mut ds, ClipPlane::Front));
        assert!(clip_seg_against_plane(&mut ds, ClipPlane::Left));
        assert!(!clip_seg_against_plane(&mut ds, ClipPlane::Right));
    }

    #[test]
    fn screen_transform_orders_p1_left_of_p2() {
        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
        let mut ds = DrawSeg {
            p1x: -5.0,
            p1y: 10.0,
            p2x: 5.0,
            p2y: 10.0,
            ..DrawSeg::default()
        };
        transform_seg_xyw_to_clip_space(&proj, &mut ds);
        do_perspective_division(&mut ds);
        transform_seg_xz_to_screen_space(&mut ds, 280, 160);
        assert!(ds.p1x <= ds.p2x);
        assert!(ds.p1x >= 0.0 && ds.p2x < 280.0);
    }

    #[test]
    fn occluder_policy_closed_door_forces_both() {
        use crate::world::geometry::{Sector, SubSector};
        let mut level = Level::default();
        let sector = |floor: i32, ceil: i32| Sector {
            floor_h: floor << 16,
            ceil_h: ceil << 16,
            floor_pic: 0,
            ceiling_pic: 0,
            light_level: 255,
            special: 0,
            tag: 0,
        };
        // Back sector is a closed door: its ceiling meets the floor.
        level.sectors = vec![sector(0, 128), sector(0, 0)];
        level.subsectors = vec![SubSector {
            sector: 0,
            first_seg: 0,
            num_segs: 0,
        }];

        let mut seg = seg_between(vec2(0.0, 0.0), vec2(64.0, 0.0));
        seg.back_sector = Some(1);

        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
        let mut ds = DrawSeg::default();
        add_clip_space_z_values(&mut ds, &seg, &level, 41.0, &proj);
        assert!(ds.emit_upper_occluder);
        assert!(ds.emit_lower_occluder);
        assert!(ds.upper_occluder_uses_back_z);
        assert!(ds.lower_occluder_uses_back_z);
    }

    #[test]
    fn occluder_policy_depends_on_eye_side_of_the_edge() {
        use crate::world::geometry::{Sector, SubSector};
        let mut level = Level::default();
        let sector = |floor: i32, ceil: i32| Sector {
            floor_h: floor << 16,
            ceil_h: ceil << 16,
            floor_pic: 0,
            ceiling_pic: 0,
            light_level: 255,
            special: 0,
            tag: 0,
        };
        // Back floor raised to 24, back ceiling lowered to 96.
        level.sectors = vec![sector(0, 128), sector(24, 96)];
        level.subsectors = vec![SubSector {
            sector: 0,
            first_seg: 0,
            num_segs: 0,
        }];

        let mut seg = seg_between(vec2(0.0, 0.0), vec2(64.0, 0.0));
        seg.back_sector = Some(1);
        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);

        // An eye between the two edges never sees hidden sprites bleed
        // past them, so neither occluder is emitted.
        let mut ds = DrawSeg::default();
        add_clip_space_z_values(&mut ds, &seg, &level, 41.0, &proj);
        assert!(!ds.emit_lower_occluder);
        assert!(!ds.emit_upper_occluder);
        assert!(ds.emit_ceiling);
        assert!(ds.emit_floor);

        // Below the raised back floor the step edge needs a bottom
        // occluder, measured at the back z.
        let mut ds = DrawSeg::default();
        add_clip_space_z_values(&mut ds, &seg, &level, 10.0, &proj);
        assert!(ds.emit_lower_occluder);
        assert!(ds.lower_occluder_uses_back_z);

        // Above the lowered back ceiling the opposite holds.
        let mut ds = DrawSeg::default();
        add_clip_space_z_values(&mut ds, &seg, &level, 100.0, &proj);
        assert!(ds.emit_upper_occluder);
        assert!(ds.upper_occluder_uses_back_z);
    }
}
