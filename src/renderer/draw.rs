//! Fragment drawers: consume the per-frame wall/flat/sky fragment lists
//! and write framebuffer rows through the column blitter. Light
//! diminishing is applied here.

use crate::renderer::blit::{
    self, BCF_COLOR_MULT_RGB, BCF_H_WRAP_WRAP, BCF_STEP_Y, BCF_V_WRAP_WRAP, SourcePixel,
    calc_texel_step,
};
use crate::renderer::tables::REFERENCE_3D_VIEW_HEIGHT;
use crate::renderer::{ANGLE_TO_SKY_SHIFT, FlatFragment, Renderer};
use crate::video::FrameBuffer;
use crate::world::texture::{FLAT_SIZE, TextureBank};

const WALL_COLUMN_FLAGS: u32 = BCF_STEP_Y | BCF_H_WRAP_WRAP | BCF_V_WRAP_WRAP | BCF_COLOR_MULT_RGB;

impl Renderer {
    /// Index of the framebuffer pixel at the top-left of the 3D view.
    fn view_base(&self, fb: &FrameBuffer) -> usize {
        self.metrics.y_offset as usize * fb.width() + self.metrics.x_offset as usize
    }

    pub(crate) fn draw_all_wall_fragments(&mut self, textures: &TextureBank, fb: &mut FrameBuffer) {
        let base = self.view_base(fb);
        let pitch = fb.width() as u32;
        let (view_w, view_h) = (self.metrics.width, self.metrics.height);
        let dst = &mut fb.pixels_mut()[base..];

        for frag in &self.wall_fragments {
            let tex = textures.wall(frag.wall_tex);
            debug_assert!(tex.is_loaded());

            // Wall texture pixels are column major; both axes wrap.
            blit::blit_column::<{ WALL_COLUMN_FLAGS }, u16>(
                &tex.pixels,
                tex.width,
                tex.height,
                frag.texcoord_x as f32,
                frag.texcoord_y,
                0.0,
                frag.texcoord_y_subpixel_adjust,
                dst,
                view_w,
                view_h,
                pitch,
                frag.x as i32,
                frag.y as i32,
                frag.height as u32,
                0.0,
                frag.texcoord_y_step,
                frag.light_mul,
                frag.light_mul,
                frag.light_mul,
                1.0,
            );
        }
    }

    pub(crate) fn draw_all_floor_fragments(&mut self, textures: &TextureBank, fb: &mut FrameBuffer) {
        for i in 0..self.floor_fragments.len() {
            let frag = self.floor_fragments[i];
            self.draw_flat_column::<true>(&frag, textures, fb);
        }
    }

    pub(crate) fn draw_all_ceiling_fragments(
        &mut self,
        textures: &TextureBank,
        fb: &mut FrameBuffer,
    ) {
        for i in 0..self.ceil_fragments.len() {
            let frag = self.ceil_fragments[i];
            self.draw_flat_column::<false>(&frag, textures, fb);
        }
    }

    /// Draw one vertical column of a floor or ceiling.
    ///
    /// There are no visplanes here: each column casts a ray through its
    /// screen pixels onto the flat's plane and samples the 64x64
    /// texture at the intersection, with light from the 3D distance.
    /// Floors walk top to bottom, ceilings bottom to top.
    fn draw_flat_column<const IS_FLOOR: bool>(
        &self,
        frag: &FlatFragment,
        textures: &TextureBank,
        fb: &mut FrameBuffer,
    ) {
        debug_assert!(frag.depth >= 0.0);

        let tex = textures.flat(frag.flat_tex);
        debug_assert!(tex.is_loaded());
        let src = &tex.pixels;

        let light_params = self.metrics.light_params(frag.sector_light_level as u32);
        let plane_z = frag.world_z;
        let np = &self.near_plane;

        // The ray from the eye through this screen column; the xy part
        // is fixed for the whole column. Sample pixel centers.
        let near_x = np.p1.x + (frag.x as f32 + 0.5) * np.x_step_per_col;
        let near_y = np.p1.y + (frag.x as f32 + 0.5) * np.y_step_per_col;
        let ray_dir_x = near_x - self.view_x;
        let ray_dir_y = near_y - self.view_y;

        // Intersect the per-pixel ray with the flat's horizontal plane.
        let intersect_at = |screen_y: i32| -> (f32, f32, f32) {
            let near_z = np.tz + np.z_step_per_pixel * (screen_y as f32 + 0.5);
            let ray_dir_z = near_z - self.view_z;
            let t = (plane_z - self.view_z) / ray_dir_z;
            (
                self.view_x + ray_dir_x * t,
                self.view_y + ray_dir_y * t,
                plane_z,
            )
        };

        let (mut cur_y, end_y, y_step): (i32, i32, i32) = if IS_FLOOR {
            (frag.y as i32, frag.y as i32 + frag.height as i32, 1)
        } else {
            (
                frag.y as i32 + frag.height as i32 - 1,
                frag.y as i32 - 1,
                -1,
            )
        };

        // The first pixel may be pinned to the fragment's exact world
        // position to stop the texture overstepping at far depths.
        let mut intersect = if frag.clamp_first_pixel {
            (frag.world_x, frag.world_y, frag.world_z)
        } else {
            intersect_at(cur_y)
        };

        let fb_width = fb.width();
        let base = (self.metrics.y_offset as usize) * fb_width + self.metrics.x_offset as usize;
        let pixels = fb.pixels_mut();
        let mask = FLAT_SIZE as i64 - 1;

        while cur_y != end_y {
            let (ix, iy, iz) = intersect;

            // Flats are 64x64 always, so wrap with a bitwise AND.
            let sx = (ix as i64 & mask) as usize;
            let sy = (iy as i64 & mask) as usize;
            let src_pixel = src[sy * FLAT_SIZE as usize + sx];

            let dx = ix - self.view_x;
            let dy = iy - self.view_y;
            let dz = iz - self.view_z;
            let dist = (dx * dx + dy * dy + dz * dz).sqrt();
            let light_mul = light_params.light_mul_for_dist(dist);

            let (r, g, b) = src_pixel.rgb255();
            let r = (r * light_mul).min(255.0);
            let g = (g * light_mul).min(255.0);
            let b = (b * light_mul).min(255.0);

            let idx = base + cur_y as usize * fb_width + frag.x as usize;
            pixels[idx] = ((r as u32) << 16) | ((g as u32) << 8) | (b as u32);

            cur_y += y_step;
            if cur_y == end_y {
                break;
            }
            intersect = intersect_at(cur_y);
        }
    }

    /// Draw every queued sky column. The sky texture is 256 wide and
    /// repeats four times around a full turn; it renders at full light
    /// and a fixed scale derived from the view height.
    pub(crate) fn draw_all_sky_fragments(&mut self, textures: &TextureBank, fb: &mut FrameBuffer) {
        if self.sky_fragments.is_empty() {
            return;
        }

        let tex = textures.wall(textures.sky_tex_num());
        debug_assert!(tex.is_loaded());

        let sky_scale = self.metrics.height as f32 / REFERENCE_3D_VIEW_HEIGHT as f32;
        let col_height = (tex.height as f32 * sky_scale).ceil() as u32;
        debug_assert!(col_height <= self.metrics.height);
        let tex_y_step = calc_texel_step(tex.height, col_height);

        let base = self.view_base(fb);
        let pitch = fb.width() as u32;
        let (view_w, view_h) = (self.metrics.width, self.metrics.height);
        let dst = &mut fb.pixels_mut()[base..];

        for frag in &self.sky_fragments {
            let angle = self
                .view_angle
                .wrapping_add(self.metrics.x_to_view_angle[frag.x as usize]);
            let tex_x = (angle >> ANGLE_TO_SKY_SHIFT) & 0xFF;

            blit::blit_column::<{ BCF_STEP_Y }, u16>(
                &tex.pixels,
                tex.width,
                tex.height,
                tex_x as f32,
                0.0,
                0.0,
                0.0,
                dst,
                view_w,
                view_h,
                pitch,
                frag.x as i32,
                0,
                col_height.min(frag.height as u32),
                0.0,
                tex_y_step,
                1.0,
                1.0,
                1.0,
                1.0,
            );
        }
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
    use crate::renderer::{ViewParams, WallFragment};
    use crate::world::geometry::Level;

    /// Archive with one 2x2 wall texture and one solid-color flat.
    fn test_textures() -> TextureBank {
        let mut info = Vec::new();
        info.extend(&1u32.to_be_bytes());
        info.extend(&60u32.to_be_bytes());
        info.extend(&1u32.to_be_bytes());
        info.extend(&70u32.to_be_bytes());
        info.extend(&2u32.to_be_bytes()); // wall w
        info.extend(&2u32.to_be_bytes()); // wall h
        info.extend(&0u32.to_be_bytes());

        let mut wall = Vec::new();
        for i in 0..16u16 {
            // Palette entry i: red channel = i (so pixel value i<<10).
            wall.extend(&((i << 10) | 0x8000).to_be_bytes());
        }
        wall.extend(&[0x11, 0x11]); // 4 pixels of palette index 1

        let mut flat = Vec::new();
        for _ in 0..32u16 {
            flat.extend(&(0x8000u16 | (31 << 10)).to_be_bytes()); // all red
        }
        flat.extend(vec![0u8; 64 * 64]);

        let payloads: [(u32, &[u8]); 3] = [(50, &info), (60, &wall), (70, &flat)];
        let mut out = Vec::<u8>::new();
        out.extend_from_slice(b"BRGR");
        out.extend(&3u32.to_be_bytes());
        let headers_size = 3 * 24u32;
        out.extend(&headers_size.to_be_bytes());
        let mut offset = 12 + headers_size;
        for (num, data) in payloads {
            out.extend(&7u32.to_be_bytes());
            out.extend(&num.to_be_bytes());
            out.extend(&1u32.to_be_bytes());
            out.extend(&offset.to_be_bytes());
            out.extend(&(data.len() as u32).to_be_bytes());
            out.extend(&0u32.to_be_bytes());
            offset += data.len() as u32;
        }
        for (_, data) in payloads {
            out.extend(data);
        }
        let rez = crate::rez::archive::ResourceFile::from_bytes(out).unwrap();
        let mut bank = TextureBank::init(&rez, 50).unwrap();
        bank.load_wall(&rez, 0).unwrap();
        bank.load_flat(&rez, 0).unwrap();
        bank
    }

    fn ready_renderer() -> Renderer {
        let mut level = Level::default();
        level.sectors = vec![crate::world::geometry::Sector {
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
        r
    }

    #[test]
    fn wall_fragment_writes_lit_texels_into_the_view() {
        let textures = test_textures();
        let mut r = ready_renderer();
        let mut fb = FrameBuffer::new();

        r.wall_fragments.push(WallFragment {
            x: 0,
            y: 0,
            height: 2,
            texcoord_x: 0,
            texcoord_y: 0.0,
            texcoord_y_subpixel_adjust: 0.0,
            texcoord_y_step: 1.0,
            light_mul: 1.0,
            wall_tex: 0,
        });
        r.draw_all_wall_fragments(&textures, &mut fb);

        // Palette index 1 has red = 1 -> expanded to 8.
        let x_off = r.metrics.x_offset as usize;
        let y_off = r.metrics.y_offset as usize;
        let p = fb.pixels()[y_off * fb.width() + x_off];
        assert_eq!(p >> 16, 8);
    }

    #[test]
    fn floor_fragment_fills_its_rows() {
        let textures = test_textures();
        let mut r = ready_renderer();
        let mut fb = FrameBuffer::new();

        r.floor_fragments.push(FlatFragment {
            x: 10,
            y: 120,
            height: 4,
            sector_light_level: 255,
            clamp_first_pixel: false,
            depth: 60.0,
            world_x: 0.0,
            world_y: 60.0,
            world_z: 0.0,
            flat_tex: 0,
        });
        r.draw_all_floor_fragments(&textures, &mut fb);

        let x_off = r.metrics.x_offset as usize;
        let y_off = r.metrics.y_offset as usize;
        for row in 120..124 {
            let p = fb.pixels()[(y_off + row) * fb.width() + x_off + 10];
            assert!(p >> 16 > 0, "row {row} unwritten");
        }
        // The row above the fragment is untouched.
        assert_eq!(fb.pixels()[(y_off + 119) * fb.width() + x_off + 10], 0);
    }

    #[test]
    fn clamped_first_pixel_samples_the_fragment_world_position() {
        let textures = test_textures();
        let mut r = ready_renderer();
        let mut fb = FrameBuffer::new();

        // Two identical fragments, one clamped; both must draw without
        // panicking and fill their first row.
        for (x, clamp) in [(20u16, false), (21u16, true)] {
            r.floor_fragments.push(FlatFragment {
                x,
                y: 140,
                height: 2,
                sector_light_level: 200,
                clamp_first_pixel: clamp,
                depth: 200.0,
                world_x: 5.0,
                world_y: 200.0,
                world_z: 0.0,
                flat_tex: 0,
            });
        }
        r.draw_all_floor_fragments(&textures, &mut fb);

        let x_off = r.metrics.x_offset as usize;
        let y_off = r.metrics.y_offset as usize;
        assert!(fb.pixels()[(y_off + 140) * fb.width() + x_off + 20] > 0);
        assert!(fb.pixels()[(y_off + 140) * fb.width() + x_off + 21] > 0);
    }
}
