//! Weapon/HUD layer: the first-person weapon sprites and the screen
//! border, drawn after all 3D fragments.

use glam::vec2;

use crate::renderer::blit;
use crate::renderer::{MF_SHADOW_ALPHA, MF_SHADOW_COLOR_MULT, Renderer};
use crate::rez::images::CelImageCache;
use crate::video::FrameBuffer;
use crate::world::geometry::Level;

/// Y offset that centers the player's weapon properly, in reference
/// (320x160) coordinates.
const SCREEN_GUN_Y: i32 = -38;

/// The rocket launcher art shipped with frame 5 skewed slightly right;
/// nudge it back into place when that exact image is drawn.
const SKEWED_WEAPON_ART: (u32, u32) = (428, 5);
const SKEWED_WEAPON_ART_X_FIX: f32 = -0.75;

/// One player sprite slot (weapon or muzzle flash overlay), as handed
/// over by the simulation.
#[derive(Clone, Copy, Debug)]
pub struct WeaponSprite {
    /// Cel image array resource holding the weapon art.
    pub resource_num: u32,
    /// Sub-frame within the resource.
    pub frame: u32,
    pub full_bright: bool,
    /// Sway offsets in reference coordinates.
    pub weapon_x: i32,
    pub weapon_y: i32,
}

impl Renderer {
    /// Draw the player sprite slots on top of the 3D view. `shadow`
    /// renders them blended (invisibility power-up).
    pub(crate) fn draw_weapons(
        &mut self,
        level: &Level,
        images: &CelImageCache,
        weapons: &[WeaponSprite],
        shadow: bool,
        fb: &mut FrameBuffer,
    ) {
        for weapon in weapons {
            self.draw_one_weapon(level, images, weapon, shadow, fb);
        }
    }

    fn draw_one_weapon(
        &mut self,
        level: &Level,
        images: &CelImageCache,
        weapon: &WeaponSprite,
        shadow: bool,
        fb: &mut FrameBuffer,
    ) {
        // Weapon art is cached by the loader before the frame starts.
        let Some(array) = images.get(weapon.resource_num) else {
            debug_assert!(false, "weapon art {} not resident", weapon.resource_num);
            return;
        };
        let img = array.image(weapon.frame);

        // Light the weapon like anything standing where the player is.
        let light_mul = if weapon.full_bright {
            1.0
        } else {
            let light_level = if level.nodes.is_empty() {
                255
            } else {
                let ss = level.locate_subsector(vec2(self.view_x, self.view_y));
                let sector = level.subsectors[ss as usize].sector;
                self.effective_light_level(level.sectors[sector as usize].light_level)
            };
            self.metrics
                .light_params(light_level)
                .light_mul_for_dist(0.0)
        };

        // Position from the sway offsets plus the art's own offsets.
        let mut gun_x = (img.offset_x as i32 + weapon.weapon_x) as f32;
        let gun_y = (img.offset_y as i32 + weapon.weapon_y + SCREEN_GUN_Y) as f32;

        if (weapon.resource_num, weapon.frame) == SKEWED_WEAPON_ART {
            gun_x += SKEWED_WEAPON_ART_X_FIX;
        }

        gun_x *= self.metrics.gun_x_scale;
        let gun_y = gun_y * self.metrics.gun_y_scale;

        let base =
            self.metrics.y_offset as usize * fb.width() + self.metrics.x_offset as usize;
        let pitch = fb.width() as u32;
        let (view_w, view_h) = (self.metrics.width, self.metrics.height);
        let dst = &mut fb.pixels_mut()[base..];

        let (mul, alpha_mul, blend) = if shadow {
            (MF_SHADOW_COLOR_MULT, MF_SHADOW_ALPHA, true)
        } else {
            (light_mul, 1.0, false)
        };

        blit::blit_sprite::<u16>(
            &img.pixels,
            img.width as u32,
            img.height as u32,
            0.0,
            0.0,
            img.width as f32,
            img.height as f32,
            dst,
            view_w,
            view_h,
            pitch,
            gun_x,
            gun_y,
            img.width as f32 * self.metrics.gun_x_scale,
            img.height as f32 * self.metrics.gun_y_scale,
            blend,
            mul,
            mul,
            mul,
            alpha_mul,
        );
    }

    /// Draw a masked UI image (like the view border) at reference
    /// screen coordinates, over the whole framebuffer.
    pub fn draw_masked_ui_sprite(
        &self,
        images: &CelImageCache,
        resource_num: u32,
        x: i32,
        y: i32,
        fb: &mut FrameBuffer,
    ) {
        let Some(array) = images.get(resource_num) else {
            debug_assert!(false, "UI art {} not resident", resource_num);
            return;
        };
        let img = array.image(0);

        let fb_w = fb.width() as u32;
        let fb_h = fb.height() as u32;
        let dst = fb.pixels_mut();
        blit::blit_sprite::<u16>(
            &img.pixels,
            img.width as u32,
            img.height as u32,
            0.0,
            0.0,
            img.width as f32,
            img.height as f32,
            dst,
            fb_w,
            fb_h,
            fb_w,
            (x + img.offset_x as i32) as f32,
            (y + img.offset_y as i32) as f32,
            img.width as f32,
            img.height as f32,
            false,
            1.0,
            1.0,
            1.0,
            1.0,
        );
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
    use crate::rez::cel::{CelImage, CelLoadFlags};
    use crate::world::geometry::{Level, Sector};

    fn cache_with_plain_image(rez_num: u32) -> CelImageCache {
        // Bypass decoding: drop a ready image into the cache through
        // its public surface by building a tiny real resource.
        let mut cel = vec![0u8; 68 + 16];
        let pre0: u32 = (1 << 6) | 6; // 2 rows, 16 bpp
        cel[0..4].copy_from_slice(&0x10u32.to_be_bytes());
        cel[8..12].copy_from_slice(&((68 - 12) as u32).to_be_bytes());
        cel[52..56].copy_from_slice(&pre0.to_be_bytes());
        cel[56..60].copy_from_slice(&1u32.to_be_bytes());
        for (i, px) in [0x7FFFu16, 0x7FFF, 0x7FFF, 0x7FFF].iter().enumerate() {
            let off = 68 + (i / 2) * 8 + (i % 2) * 2;
            cel[off..off + 2].copy_from_slice(&px.to_be_bytes());
        }

        let mut data = Vec::new();
        data.extend(&8u32.to_be_bytes()); // 2 images
        data.extend(&((8 + cel.len()) as u32).to_be_bytes());
        data.extend(&cel);
        data.extend(&cel);

        let mut out = Vec::<u8>::new();
        out.extend_from_slice(b"BRGR");
        out.extend(&1u32.to_be_bytes());
        out.extend(&24u32.to_be_bytes());
        out.extend(&1u32.to_be_bytes());
        out.extend(&rez_num.to_be_bytes());
        out.extend(&1u32.to_be_bytes());
        out.extend(&(12 + 24u32).to_be_bytes());
        out.extend(&(data.len() as u32).to_be_bytes());
        out.extend(&0u32.to_be_bytes());
        out.extend(&data);
        let rez = crate::rez::archive::ResourceFile::from_bytes(out).unwrap();

        let mut cache = CelImageCache::new();
        cache.load(&rez, rez_num, CelLoadFlags::MASKED).unwrap();
        cache
    }

    #[test]
    fn weapon_draw_writes_into_the_view() {
        let mut level = Level::default();
        level.sectors = vec![Sector {
            floor_h: 0,
            ceil_h: int_to_fixed(128),
            floor_pic: 0,
            ceiling_pic: 0,
            light_level: 255,
            special: 0,
            tag: 0,
        }];

        let mut r = Renderer::new(0);
        r.pre_draw(
            &level,
            &ViewParams {
                x: 0,
                y: 0,
                z: int_to_fixed(41),
                angle: ANG90,
                extra_light: 0,
            },
        );

        let cache = cache_with_plain_image(500);
        let mut fb = FrameBuffer::new();
        let weapon = WeaponSprite {
            resource_num: 500,
            frame: 0,
            full_bright: true,
            weapon_x: 100,
            weapon_y: 80,
        };
        r.draw_weapons(&level, &cache, &[weapon], false, &mut fb);
        assert!(fb.pixels().iter().any(|&p| p != 0));
    }

    #[test]
    fn missing_weapon_frame_count_matches_cel_array() {
        let cache = cache_with_plain_image(500);
        let array = cache.get(500).unwrap();
        assert_eq!(array.images.len(), 2);
        let img: &CelImage = array.image(1);
        assert_eq!((img.width, img.height), (2, 2));
    }
}
