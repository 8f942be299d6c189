//! The software rendering pipeline.
//!
//! One [`Renderer`] owns every per-frame accumulator plus the per-line
//! parallel render state, and turns a view + level + actors into pixels:
//!
//! 1. `pre_draw` resets the accumulators and derives the view basis,
//!    projection matrix and near plane values.
//! 2. BSP traversal walks the map front to back, feeding the seg
//!    pipeline and gathering visible sprites.
//! 3. The fragment drawers run: walls, floors, ceilings, skies.
//! 4. Sprites are depth sorted and rasterized against the per-column
//!    occluder store.
//! 5. The weapon layer draws on top.

pub mod blit;
pub mod bsp;
pub mod draw;
pub mod emit;
pub mod seg;
pub mod sprite;
pub mod tables;
pub mod weapon;

use glam::{Vec2, vec2};
use smallvec::SmallVec;

use crate::base::angle::{ANG90, Angle, angle_to_radians};
use crate::base::fixed::{Fixed, fixed_to_float};
use crate::rez::images::CelImageCache;
use crate::video::FrameBuffer;
use crate::world::geometry::Level;
use crate::world::sprites::SpriteBank;
use crate::world::texture::TextureBank;

pub use seg::ProjectionMatrix;
pub use tables::{FOV, LightParams, ScreenMetrics};
pub use weapon::WeaponSprite;

/// Near plane depth.
pub const Z_NEAR: f32 = 1.0;
/// Size of the range of depth values allowed.
pub const Z_RANGE_SIZE: f32 = 16384.0;
pub const Z_FAR: f32 = Z_NEAR + Z_RANGE_SIZE;
/// Aspect ratio baked into the perspective projection.
pub const VIEW_ASPECT_RATIO: f32 = 2.0;

/// View-space z bias applied to sprite origins.
pub const SPRITE_EXTRA_Z_OFFSET: f32 = 1.0;

/// Rendering constants for shadowed (invisible/spectre) things.
pub const MF_SHADOW_ALPHA: f32 = 0.5;
pub const MF_SHADOW_COLOR_MULT: f32 = 0.1;

/// Folds a BAM angle to a sky texture column (sky is 256 wide and
/// repeats four times per turn).
pub const ANGLE_TO_SKY_SHIFT: u32 = 22;

/// Per-screen-column top/bottom clip bounds that walls, floors and
/// ceilings progressively tighten. `top + 1 >= bottom` means the column
/// accepts no more seg pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegClip {
    pub top: i16,
    pub bottom: i16,
}

/// One occluding wall piece at one screen column, consulted by the
/// sprite rasterizer. Pixels at or above `top` and at or below `bottom`
/// are hidden behind this entry's line (at its depth).
#[derive(Clone, Copy, Debug)]
pub struct OccluderEntry {
    pub line: u16,
    pub depth: f32,
    pub top: i16,
    pub bottom: i16,
}

/// BSP order appends entries in ascending depth, so the list is sorted
/// without extra work. The inline capacity doubles as the hard limit.
pub const MAX_OCCLUDER_ENTRIES: usize = 16;
pub type OccludingColumns = SmallVec<[OccluderEntry; MAX_OCCLUDER_ENTRIES]>;

/// A column of wall to be drawn.
#[derive(Clone, Copy, Debug)]
pub struct WallFragment {
    pub x: u16,
    pub y: u16,
    pub height: u16,
    /// May be negative; the wall blit wraps it into the texture.
    pub texcoord_x: i32,
    pub texcoord_y: f32,
    /// Sub pixel stability adjustment applied after the first stepping.
    pub texcoord_y_subpixel_adjust: f32,
    pub texcoord_y_step: f32,
    pub light_mul: f32,
    /// Wall texture index (animation already resolved).
    pub wall_tex: u32,
}

/// A column of floor or ceiling to be drawn.
#[derive(Clone, Copy, Debug)]
pub struct FlatFragment {
    pub x: u16,
    pub y: u16,
    pub height: u16,
    pub sector_light_level: u8,
    /// Take the first pixel's texcoord from the fragment's world
    /// position instead of back-projecting, to stop far textures from
    /// overstepping their bounds.
    pub clamp_first_pixel: bool,
    pub depth: f32,
    /// World position at the wall which generated this column.
    pub world_x: f32,
    pub world_y: f32,
    pub world_z: f32,
    /// Flat texture index (animation already resolved).
    pub flat_tex: u32,
}

/// A column of sky to be drawn.
#[derive(Clone, Copy, Debug)]
pub struct SkyFragment {
    pub x: u16,
    pub height: u16,
}

/// An actor that survived culling, queued for rasterization.
#[derive(Clone, Copy, Debug)]
pub struct DrawSprite {
    pub depth: f32,
    /// World position, needed for the cross-product occlusion test.
    pub world_x: f32,
    pub world_y: f32,
    /// Screen extents.
    pub screen_lx: f32,
    pub screen_rx: f32,
    pub screen_ty: f32,
    pub screen_by: f32,
    pub light_mul: f32,
    pub flip: bool,
    pub transparent: bool,
    /// Pixel source: sprite resource + image index within it.
    pub sprite_rez: u32,
    pub image: u16,
}

/// Per-line render state kept out of the shared map tables: the
/// memoized sprite in-front test plus the depths the line was drawn at
/// this frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineRenderState {
    /// Matches the global counter iff computed for the current sprite.
    pub valid_count: u32,
    /// Screen-space w at each endpoint when the line's seg was drawn.
    pub v1_draw_depth: f32,
    pub v2_draw_depth: f32,
    /// Which side of the line was rendered this frame (0 or 1).
    pub drawn_side: u8,
    /// Memoized cross-product outcome for the current sprite.
    pub in_front_of_sprite: bool,
}

/// The world-space near plane quad, used to cast rays for flat columns.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearPlane {
    /// Left and right edge at the near distance.
    pub p1: Vec2,
    pub p2: Vec2,
    /// Top and bottom world z.
    pub tz: f32,
    pub bz: f32,
    /// World xy step per screen column along the plane.
    pub x_step_per_col: f32,
    pub y_step_per_col: f32,
    /// World z step per pixel down a screen column.
    pub z_step_per_pixel: f32,
}

/// Inputs to a frame, provided by the simulation collaborator.
#[derive(Clone, Copy, Debug)]
pub struct ViewParams {
    pub x: Fixed,
    pub y: Fixed,
    pub z: Fixed,
    pub angle: Angle,
    /// Bumped light from gun blasts (0..=255).
    pub extra_light: u32,
}

pub struct Renderer {
    metrics: ScreenMetrics,
    proj: ProjectionMatrix,

    // Derived view state, valid between pre_draw and the end of frame.
    view_x: f32,
    view_y: f32,
    view_z: f32,
    view_x_frac: Fixed,
    view_y_frac: Fixed,
    view_angle: Angle,
    view_sin: f32,
    view_cos: f32,
    near_plane: NearPlane,
    extra_light: u32,

    // Frame counters. `frame_count` keys the once-per-frame sector
    // visits; `valid_count` keys the per-sprite line memoization.
    frame_count: u32,
    valid_count: u32,

    // Per-frame accumulators, cleared by pre_draw.
    seg_clip: Vec<SegClip>,
    occluding_cols: Vec<OccludingColumns>,
    num_full_seg_cols: u32,
    wall_fragments: Vec<WallFragment>,
    floor_fragments: Vec<FlatFragment>,
    ceil_fragments: Vec<FlatFragment>,
    sky_fragments: Vec<SkyFragment>,
    draw_sprites: Vec<DrawSprite>,

    // Per-level parallel arrays, sized lazily against the level.
    line_state: Vec<LineRenderState>,
    line_mapped: Vec<bool>,
    sector_visited: Vec<u32>,
}

impl Renderer {
    pub fn new(screen_size_index: usize) -> Self {
        let metrics = ScreenMetrics::new(screen_size_index);
        // The projection's aspect ratio is fixed; it does not track the
        // pixel dimensions of the selected view size.
        let proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
        Self {
            metrics,
            proj,
            view_x: 0.0,
            view_y: 0.0,
            view_z: 0.0,
            view_x_frac: 0,
            view_y_frac: 0,
            view_angle: 0,
            view_sin: 0.0,
            view_cos: 1.0,
            near_plane: NearPlane::default(),
            extra_light: 0,
            frame_count: 0,
            valid_count: 0,
            seg_clip: Vec::new(),
            occluding_cols: Vec::new(),
            num_full_seg_cols: 0,
            wall_fragments: Vec::new(),
            floor_fragments: Vec::new(),
            ceil_fragments: Vec::new(),
            sky_fragments: Vec::new(),
            draw_sprites: Vec::new(),
            line_state: Vec::new(),
            line_mapped: Vec::new(),
            sector_visited: Vec::new(),
        }
    }

    /// Switch to another of the six view sizes.
    pub fn set_screen_size(&mut self, screen_size_index: usize) {
        self.metrics = ScreenMetrics::new(screen_size_index);
        self.proj = ProjectionMatrix::new(Z_NEAR, Z_FAR, FOV);
    }

    pub fn metrics(&self) -> &ScreenMetrics {
        &self.metrics
    }

    /// Which lines have contributed at least one wall or flat column so
    /// far this level (for the automap collaborator). Latched.
    pub fn mapped_lines(&self) -> &[bool] {
        &self.line_mapped
    }

    /// Forget the per-level state (level exit).
    pub fn end_level(&mut self) {
        self.line_state.clear();
        self.line_mapped.clear();
        self.sector_visited.clear();
    }

    /*------------------------------------------------------------------*/
    /*                       Frame sequencing                           */
    /*------------------------------------------------------------------*/

    /// Render one complete frame of the 3D view into `fb`.
    ///
    /// All assets the level references must be resident (the loader
    /// guarantees this); the render path itself cannot fail.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_player_view(
        &mut self,
        level: &Level,
        textures: &TextureBank,
        sprites: &SpriteBank,
        cel_images: &CelImageCache,
        view: &ViewParams,
        weapons: &[WeaponSprite],
        weapon_shadow: bool,
        fb: &mut FrameBuffer,
    ) {
        self.pre_draw(level, view);
        self.do_bsp_traversal(level, textures, sprites);
        self.draw_all_wall_fragments(textures, fb);
        self.draw_all_floor_fragments(textures, fb);
        self.draw_all_ceiling_fragments(textures, fb);
        self.draw_all_sky_fragments(textures, fb);
        self.draw_all_sprites(level, sprites, fb);
        self.draw_weapons(level, cel_images, weapons, weapon_shadow, fb);
    }

    /// Reset the per-frame accumulators and derive the view basis.
    pub fn pre_draw(&mut self, level: &Level, view: &ViewParams) {
        self.view_x = fixed_to_float(view.x);
        self.view_y = fixed_to_float(view.y);
        self.view_z = fixed_to_float(view.z);
        self.view_x_frac = view.x;
        self.view_y_frac = view.y;
        self.view_angle = view.angle;
        self.extra_light = view.extra_light.min(255);

        // Rotation that maps the view direction onto +y (depth) and
        // screen-right onto +x.
        let rot = angle_to_radians(ANG90.wrapping_sub(view.angle));
        self.view_sin = rot.sin();
        self.view_cos = rot.cos();

        // World-space near plane, for casting flat-column rays.
        let dir_rad = angle_to_radians(view.angle);
        let dir = vec2(dir_rad.cos(), dir_rad.sin());
        let right = vec2(dir.y, -dir.x);
        let half_w = (FOV * 0.5).tan() * Z_NEAR;
        let half_h = half_w / VIEW_ASPECT_RATIO;
        let view_pos = vec2(self.view_x, self.view_y);
        let p1 = view_pos + dir * Z_NEAR - right * half_w;
        let p2 = view_pos + dir * Z_NEAR + right * half_w;
        self.near_plane = NearPlane {
            p1,
            p2,
            tz: self.view_z + half_h,
            bz: self.view_z - half_h,
            x_step_per_col: (p2.x - p1.x) / self.metrics.width as f32,
            y_step_per_col: (p2.y - p1.y) / self.metrics.width as f32,
            z_step_per_pixel: -(half_h * 2.0) / self.metrics.height as f32,
        };

        // Reset the per-frame accumulators.
        let w = self.metrics.width as usize;
        self.seg_clip.clear();
        self.seg_clip.resize(
            w,
            SegClip {
                top: -1,
                bottom: self.metrics.height as i16,
            },
        );
        self.occluding_cols.clear();
        self.occluding_cols.resize(w, OccludingColumns::new());
        self.num_full_seg_cols = 0;
        self.wall_fragments.clear();
        self.floor_fragments.clear();
        self.ceil_fragments.clear();
        self.sky_fragments.clear();
        self.draw_sprites.clear();

        // Size the per-level parallel arrays on first use.
        if self.line_state.len() != level.lines.len() {
            self.line_state = vec![LineRenderState::default(); level.lines.len()];
            self.line_mapped = vec![false; level.lines.len()];
        }
        if self.sector_visited.len() != level.sectors.len() {
            self.sector_visited = vec![0; level.sectors.len()];
        }

        self.frame_count = self.frame_count.wrapping_add(1);
    }

    /// Effective light level for a sector: extra light applies below
    /// the near-fullbright band only, then clamps.
    pub(crate) fn effective_light_level(&self, sector_light: u32) -> u32 {
        let light = if sector_light < 240 {
            sector_light + self.extra_light
        } else {
            sector_light
        };
        light.min(255)
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::fixed::int_to_fixed;

    fn tiny_level() -> Level {
        use crate::world::geometry::Sector;
        let mut level = Level::default();
        level.sectors = vec![Sector {
            floor_h: 0,
            ceil_h: int_to_fixed(128),
            floor_pic: 0,
            ceiling_pic: 0,
            light_level: 160,
            special: 0,
            tag: 0,
        }];
        level
    }

    #[test]
    fn pre_draw_resets_clip_state() {
        let mut r = Renderer::new(0);
        let level = tiny_level();
        let view = ViewParams {
            x: 0,
            y: 0,
            z: int_to_fixed(41),
            angle: ANG90,
            extra_light: 0,
        };
        r.pre_draw(&level, &view);

        assert_eq!(r.seg_clip.len(), 280);
        assert!(r.seg_clip.iter().all(|c| c.top == -1 && c.bottom == 160));
        assert!(r.occluding_cols.iter().all(|c| c.is_empty()));
        assert_eq!(r.num_full_seg_cols, 0);

        // Facing north: the rotation collapses to the identity.
        assert!((r.view_sin - 0.0).abs() < 1e-5);
        assert!((r.view_cos - 1.0).abs() < 1e-5);
    }

    #[test]
    fn near_plane_faces_the_view_direction() {
        let mut r = Renderer::new(0);
        let level = tiny_level();
        let view = ViewParams {
            x: 0,
            y: 0,
            z: int_to_fixed(41),
            angle: ANG90, // facing north
            extra_light: 0,
        };
        r.pre_draw(&level, &view);

        // The plane sits one unit north of the eye, spanning east-west.
        let np = &r.near_plane;
        assert!((np.p1.y - 1.0).abs() < 1e-5);
        assert!((np.p2.y - 1.0).abs() < 1e-5);
        assert!(np.p1.x < np.p2.x);
        // Top/bottom straddle the eye height by the half plane height.
        assert!((np.tz - 41.5).abs() < 1e-5);
        assert!((np.bz - 40.5).abs() < 1e-5);
        assert!(np.z_step_per_pixel < 0.0);
    }

    #[test]
    fn extra_light_only_boosts_dim_sectors() {
        let mut r = Renderer::new(0);
        let level = tiny_level();
        let mut view = ViewParams {
            x: 0,
            y: 0,
            z: 0,
            angle: 0,
            extra_light: 64,
        };
        r.pre_draw(&level, &view);
        assert_eq!(r.effective_light_level(100), 164);
        assert_eq!(r.effective_light_level(250), 250);
        assert_eq!(r.effective_light_level(230), 255); // clamped

        view.extra_light = 0;
        r.pre_draw(&level, &view);
        assert_eq!(r.effective_light_level(100), 100);
    }

    #[test]
    fn frame_counter_advances_each_pre_draw() {
        let mut r = Renderer::new(0);
        let level = tiny_level();
        let view = ViewParams {
            x: 0,
            y: 0,
            z: 0,
            angle: 0,
            extra_light: 0,
        };
        r.pre_draw(&level, &view);
        let first = r.frame_count;
        r.pre_draw(&level, &view);
        assert_eq!(r.frame_count, first.wrapping_add(1));
    }
}
