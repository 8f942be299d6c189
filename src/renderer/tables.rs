//! Screen size tables, per-column view angles and light diminishing.

use crate::base::angle::Angle;

/// The six supported 3D view sizes.
pub const SCREEN_WIDTHS: [u32; 6] = [280, 256, 224, 192, 160, 128];
pub const SCREEN_HEIGHTS: [u32; 6] = [160, 144, 128, 112, 96, 80];

/// The original maximum size of the 3D view.
pub const REFERENCE_3D_VIEW_WIDTH: u32 = 280;
pub const REFERENCE_3D_VIEW_HEIGHT: u32 = 160;

/// Reference screen layout the view is centered within.
pub const REFERENCE_SCREEN_WIDTH: u32 = 320;
pub const REFERENCE_SCREEN_HEIGHT: u32 = 160;

pub const MAX_LIGHT_VALUE: f32 = 255.0;

/// Minimum allowed multiplier due to light diminishing.
pub const MIN_LIGHT_MUL: f32 = 0.020;

/// Field of view for the perspective projection.
pub const FOV: f32 = std::f32::consts::FRAC_PI_2;

/// Per-size derived screen values, rebuilt whenever the view size
/// changes.
pub struct ScreenMetrics {
    pub size_index: usize,
    /// 3D view size in pixels.
    pub width: u32,
    pub height: u32,
    /// Placement of the view within the reference screen area.
    pub x_offset: u32,
    pub y_offset: u32,
    /// `(160/W) * (H/180) * 2.2`, the aspect correction factor.
    pub stretch: f32,
    /// Scale factors for the player weapon art.
    pub gun_x_scale: f32,
    pub gun_y_scale: f32,
    /// View-relative BAM angle of each screen column (width + 1 entries,
    /// positive to the left).
    pub x_to_view_angle: Vec<Angle>,
    /// `x_to_view_angle[0]` and twice that: the frustum clip angles.
    pub clip_angle: Angle,
    pub double_clip_angle: Angle,
}

impl ScreenMetrics {
    pub fn new(size_index: usize) -> Self {
        let width = SCREEN_WIDTHS[size_index];
        let height = SCREEN_HEIGHTS[size_index];

        let half_fov_tan = (FOV * 0.5).tan();
        let center_x = width as f64 * 0.5;

        let x_to_view_angle: Vec<Angle> = (0..=width)
            .map(|x| {
                let rel = (center_x - x as f64) / center_x;
                let rad = (rel * half_fov_tan as f64).atan();
                (rad / std::f64::consts::TAU * 4294967296.0).round() as i64 as u32
            })
            .collect();

        let clip_angle = x_to_view_angle[0];
        let stretch = (160.0 / width as f32) * (height as f32 / 180.0) * 2.2;

        Self {
            size_index,
            width,
            height,
            x_offset: (REFERENCE_SCREEN_WIDTH - width) / 2,
            y_offset: (REFERENCE_SCREEN_HEIGHT - height) / 2,
            stretch,
            gun_x_scale: width as f32 / 320.0,
            gun_y_scale: height as f32 / 160.0,
            x_to_view_angle,
            clip_angle,
            double_clip_angle: clip_angle.wrapping_mul(2),
        }
    }

    /// Light parameters for a sector light level at this screen size.
    pub fn light_params(&self, sector_light_level: u32) -> LightParams {
        let l = sector_light_level.min(255) as f32;
        let light_min = (l / 3.0).floor();
        let range = l - light_min;
        let denom = 800.0 - self.width as f32;

        LightParams {
            light_min,
            light_max: l,
            light_sub: self.width as f32 * range / denom,
            light_coef: range * 65536.0 / denom,
        }
    }
}

/// Describes lighting for an input light level. Gives a multiplier for
/// textures after distance-based light diminishing.
#[derive(Clone, Copy, Debug)]
pub struct LightParams {
    pub light_min: f32,
    pub light_max: f32,
    pub light_sub: f32,
    pub light_coef: f32,
}

impl LightParams {
    pub fn light_mul_for_dist(&self, dist: f32) -> f32 {
        let light = if dist > 0.0 {
            self.light_coef / dist - self.light_sub
        } else {
            self.light_max
        };
        let light = light.clamp(self.light_min, self.light_max);
        (light / MAX_LIGHT_VALUE).max(MIN_LIGHT_MUL)
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
