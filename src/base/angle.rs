//! Binary angle measurement (BAM) and the trig lookup tables.
//!
//! The full range of a `u32` spans one turn, so angle arithmetic wraps
//! naturally under `wrapping_*` operations. An 8192-entry quantization
//! ("fine angles") indexes the sine/cosine tables.

use once_cell::sync::Lazy;

use crate::base::fixed::{FRACUNIT, Fixed};

/// 32-bit BAM angle: the entire unsigned range represents 0-360 degrees.
pub type Angle = u32;

pub const ANG45: Angle = 0x2000_0000;
pub const ANG90: Angle = 0x4000_0000;
pub const ANG180: Angle = 0x8000_0000;
pub const ANG270: Angle = 0xC000_0000;

pub const FINEANGLES: usize = 8192;
pub const FINEMASK: usize = FINEANGLES - 1;
pub const ANGLE_TO_FINE_SHIFT: u32 = 19;

/// Number of entries in the tan-to-angle table.
pub const SLOPERANGE: u32 = 2048;
pub const SLOPEBITS: u32 = 11;

/// Sine table in 16.16 fixed point. A quarter turn of extra entries is
/// appended so the cosine lookup can alias into it at `idx + 2048`.
static FINE_SINE: Lazy<Vec<Fixed>> = Lazy::new(|| {
    (0..FINEANGLES + FINEANGLES / 4)
        .map(|i| {
            let rad = i as f64 * std::f64::consts::TAU / FINEANGLES as f64;
            (rad.sin() * FRACUNIT as f64).round() as Fixed
        })
        .collect()
});

/// Tangent table covering -90..+90 degrees in 4096 entries, offset by a
/// half step to dodge the poles.
static FINE_TANGENT: Lazy<Vec<Fixed>> = Lazy::new(|| {
    (0..FINEANGLES / 2)
        .map(|i| {
            let rad =
                (i as f64 - (FINEANGLES / 4) as f64 + 0.5) * std::f64::consts::TAU / FINEANGLES as f64;
            let t = rad.tan() * FRACUNIT as f64;
            t.clamp(i32::MIN as f64, i32::MAX as f64) as Fixed
        })
        .collect()
});

/// Reverse lookup: slope (0..=2048, in units of 1/2048) to BAM angle.
static TAN_TO_ANGLE: Lazy<Vec<Angle>> = Lazy::new(|| {
    (0..=SLOPERANGE)
        .map(|i| {
            let rad = (i as f64 / SLOPERANGE as f64).atan();
            (rad / std::f64::consts::TAU * 4294967296.0).round() as u64 as Angle
        })
        .collect()
});

#[inline(always)]
pub fn angle_to_fine(angle: Angle) -> usize {
    (angle >> ANGLE_TO_FINE_SHIFT) as usize & FINEMASK
}

#[inline(always)]
pub fn fine_sine(idx: usize) -> Fixed {
    FINE_SINE[idx & FINEMASK]
}

/// Cosine aliases the sine table offset by a quarter turn.
#[inline(always)]
pub fn fine_cosine(idx: usize) -> Fixed {
    FINE_SINE[(idx & FINEMASK) + FINEANGLES / 4]
}

#[inline(always)]
pub fn fine_tangent(idx: usize) -> Fixed {
    FINE_TANGENT[idx & (FINEANGLES / 2 - 1)]
}

#[inline(always)]
pub fn tan_to_angle(slope: u32) -> Angle {
    TAN_TO_ANGLE[slope.min(SLOPERANGE) as usize]
}

#[inline(always)]
pub fn negate_angle(angle: Angle) -> Angle {
    (angle as i32).wrapping_neg() as Angle
}

#[inline(always)]
pub fn angle_to_radians(angle: Angle) -> f32 {
    (angle as f64 / 4294967296.0 * std::f64::consts::TAU) as f32
}

/// Octant-reduced slope for the tan-to-angle table, as used by
/// [`point_to_angle`]. Saturates at `SLOPERANGE`.
fn slope_div(num: u32, den: u32) -> u32 {
    if den < 512 {
        return SLOPERANGE;
    }
    let ans = ((num as u64) << 3) / ((den as u64) >> 8);
    (ans as u32).min(SLOPERANGE)
}

/// BAM angle of the vector from `(x1, y1)` to `(x2, y2)` (fixed coords).
///
/// Classifies the vector into one of eight octants and resolves the
/// in-octant angle through the tan-to-angle table.
pub fn point_to_angle(x1: Fixed, y1: Fixed, x2: Fixed, y2: Fixed) -> Angle {
    let mut x = x2.wrapping_sub(x1);
    let mut y = y2.wrapping_sub(y1);

    if x == 0 && y == 0 {
        return 0;
    }

    if x >= 0 {
        if y >= 0 {
            if x > y {
                tan_to_angle(slope_div(y as u32, x as u32))
            } else {
                ANG90.wrapping_sub(1).wrapping_sub(tan_to_angle(slope_div(x as u32, y as u32)))
            }
        } else {
            y = -y;
            if x > y {
                negate_angle(tan_to_angle(slope_div(y as u32, x as u32)))
            } else {
                ANG270.wrapping_add(tan_to_angle(slope_div(x as u32, y as u32)))
            }
        }
    } else {
        x = -x;
        if y >= 0 {
            if x > y {
                ANG180.wrapping_sub(1).wrapping_sub(tan_to_angle(slope_div(y as u32, x as u32)))
            } else {
                ANG90.wrapping_add(tan_to_angle(slope_div(x as u32, y as u32)))
            }
        } else {
            y = -y;
            if x > y {
                ANG180.wrapping_add(tan_to_angle(slope_div(y as u32, x as u32)))
            } else {
                ANG270.wrapping_sub(1).wrapping_sub(tan_to_angle(slope_div(x as u32, y as u32)))
            }
        }
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::fixed::FRACUNIT;

    #[test]
    fn cardinal_table_values() {
        assert_eq!(fine_sine(0), 0);
        assert_eq!(fine_sine(2048), FRACUNIT);
        assert_eq!(fine_cosine(0), FRACUNIT);
        assert_eq!(fine_cosine(2048), 0);
    }

    #[test]
    fn cosine_aliases_sine_plus_quarter_turn() {
        for a in (0..FINEANGLES).step_by(37) {
            assert_eq!(fine_cosine(a), fine_sine((a + 2048) & FINEMASK));
        }
    }

    #[test]
    fn tan_to_angle_endpoints() {
        assert_eq!(tan_to_angle(0), 0);
        assert_eq!(tan_to_angle(SLOPERANGE), ANG45);
        // Saturates rather than indexing out of range.
        assert_eq!(tan_to_angle(SLOPERANGE + 1000), ANG45);
    }

    #[test]
    fn point_to_angle_cardinals() {
        let u = FRACUNIT;
        // Due east, north, west, south; allow 1-entry table quantization.
        let close = |a: Angle, b: Angle| {
            let d = a.wrapping_sub(b) as i32;
            d.unsigned_abs() < (1 << 20)
        };
        assert!(close(point_to_angle(0, 0, 100 * u, 0), 0));
        assert!(close(point_to_angle(0, 0, 0, 100 * u), ANG90));
        assert!(close(point_to_angle(0, 0, -100 * u, 0), ANG180));
        assert!(close(point_to_angle(0, 0, 0, -100 * u), ANG270));
        assert!(close(point_to_angle(0, 0, 100 * u, 100 * u), ANG45));
    }

    #[test]
    fn angle_wraparound_is_modular() {
        let a: Angle = ANG270;
        assert_eq!(a.wrapping_add(ANG180), ANG90);
        assert_eq!(negate_angle(ANG90), ANG270);
    }

    #[test]
    fn tangent_is_odd_around_center() {
        // Half-step offset makes entries symmetric about the center seam.
        assert_eq!(fine_tangent(2048), -fine_tangent(2047));
        assert!(fine_tangent(2048) > 0);
        assert!(fine_tangent(0) < 0);
    }
}
