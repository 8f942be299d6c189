//! Sprite pipeline: transform and cull actors into `DrawSprite`s during
//! BSP traversal, then depth-sort and rasterize them column by column
//! against the per-column occluder store.

use crate::base::angle::{ANG45, point_to_angle};
use crate::base::fixed::fixed_to_float;
use crate::renderer::blit::{
    self, BCF_ALPHA_BLEND, BCF_ALPHA_TEST, BCF_COLOR_MULT_A, BCF_COLOR_MULT_RGB, BCF_STEP_Y,
    BCF_V_CLIP, BCF_V_WRAP_DISCARD,
};
use crate::renderer::{
    DrawSprite, MF_SHADOW_ALPHA, MF_SHADOW_COLOR_MULT, Renderer, SPRITE_EXTRA_Z_OFFSET, Z_NEAR,
};
use crate::video::FrameBuffer;
use crate::world::geometry::{Level, MapObjFlags, MapObject};
use crate::world::sprites::{SpriteBank, SpriteImage};

const SPRITE_COLUMN_FLAGS: u32 =
    BCF_STEP_Y | BCF_ALPHA_TEST | BCF_COLOR_MULT_RGB | BCF_V_WRAP_DISCARD | BCF_V_CLIP;

const SPRITE_COLUMN_BLEND_FLAGS: u32 =
    SPRITE_COLUMN_FLAGS | BCF_ALPHA_BLEND | BCF_COLOR_MULT_A;

impl Renderer {
    /// Pick the 0-7 view angle of a thing's sprite for this viewpoint.
    fn thing_sprite_angle(&self, thing: &MapObject) -> usize {
        let ang = point_to_angle(self.view_x_frac, self.view_y_frac, thing.x, thing.y)
            .wrapping_sub(thing.angle)
            .wrapping_add((ANG45 / 2).wrapping_mul(9));
        (ang >> 29) as usize
    }

    /// Transform and cull one actor; survivors join the vis-sprite list.
    pub(crate) fn add_sprite_to_frame(
        &mut self,
        level: &Level,
        sprites: &SpriteBank,
        thing: &MapObject,
    ) {
        // The player never gets added for obvious reasons.
        if thing.is_player {
            return;
        }

        let world_x = fixed_to_float(thing.x);
        let world_y = fixed_to_float(thing.y);
        let world_z = fixed_to_float(thing.z);

        // View space: translate, rotate, and apply the small z bias.
        let tx = world_x - self.view_x;
        let ty = world_y - self.view_y;
        let view_x = self.view_cos * tx - self.view_sin * ty;
        let view_y = self.view_sin * tx + self.view_cos * ty;
        let view_z = world_z - self.view_z + SPRITE_EXTRA_Z_OFFSET;

        if view_y <= Z_NEAR {
            return;
        }

        // Resolve the sprite frame angle. The loader keeps every sprite
        // an actor can show resident; a missing one is a loader bug.
        let Some(sprite) = sprites.get(thing.sprite) else {
            debug_assert!(false, "actor sprite {} not resident", thing.sprite);
            return;
        };
        let Some(frame) = sprite.frames.get(thing.frame as usize) else {
            debug_assert!(false, "actor sprite frame {} out of range", thing.frame);
            return;
        };
        let frame_angle = &frame.angles[self.thing_sprite_angle(thing)];
        let image = sprite.image(frame_angle);
        debug_assert!(image.width > 0 && image.height > 0);

        let tex_w = image.width as f32;
        let tex_h = image.height as f32;

        // Clip-space x range; cull when entirely outside [-w, +w].
        let view_lx = view_x - frame_angle.left_offset as f32;
        let view_rx = view_lx + tex_w;
        let clip_lx = view_lx * self.proj.r0c0;
        let clip_rx = view_rx * self.proj.r0c0;
        let clip_w = view_y;
        if clip_lx > clip_w || clip_rx < -clip_w {
            return;
        }

        // Clip-space z range likewise.
        let view_tz = view_z + frame_angle.top_offset as f32;
        let view_bz = view_tz - tex_h;
        let clip_tz = view_tz * self.proj.r1c1;
        let clip_bz = view_bz * self.proj.r1c1;
        if clip_tz > clip_w || clip_bz < -clip_w {
            return;
        }

        // Perspective divide and map to screen pixels.
        let screen_w = self.metrics.width as f32 - 0.5;
        let screen_h = self.metrics.height as f32 - 0.5;
        let inv_w = 1.0 / clip_w;
        let screen_lx = (clip_lx * inv_w * 0.5 + 0.5) * screen_w;
        let screen_rx = (clip_rx * inv_w * 0.5 + 0.5) * screen_w;
        let screen_ty = (clip_tz * inv_w * 0.5 + 0.5) * screen_h;
        let screen_by = (clip_bz * inv_w * 0.5 + 0.5) * screen_h;

        let light_level = if thing.full_bright {
            255
        } else {
            self.effective_light_level(level.sectors[thing.sector as usize].light_level)
        };
        let light_mul = self
            .metrics
            .light_params(light_level)
            .light_mul_for_dist(clip_w);

        self.draw_sprites.push(DrawSprite {
            depth: clip_w,
            world_x,
            world_y,
            screen_lx,
            screen_rx,
            screen_ty,
            screen_by,
            light_mul,
            flip: frame_angle.flipped,
            transparent: thing.flags.contains(MapObjFlags::SHADOW),
            sprite_rez: thing.sprite,
            image: frame_angle.image,
        });
    }

    /// Depth sort the gathered sprites (furthest first) and rasterize
    /// them in painter's order.
    pub(crate) fn draw_all_sprites(
        &mut self,
        level: &Level,
        sprites: &SpriteBank,
        fb: &mut FrameBuffer,
    ) {
        let mut list = std::mem::take(&mut self.draw_sprites);
        list.sort_by(|a, b| b.depth.partial_cmp(&a.depth).unwrap());

        for sprite in &list {
            if sprite.flip {
                self.draw_sprite::<true>(level, sprites, sprite, fb);
            } else {
                self.draw_sprite::<false>(level, sprites, sprite, fb);
            }
        }

        self.draw_sprites = list;
    }

    /// Emit and draw the columns of one sprite.
    fn draw_sprite<const FLIP: bool>(
        &mut self,
        level: &Level,
        sprites: &SpriteBank,
        sprite: &DrawSprite,
        fb: &mut FrameBuffer,
    ) {
        debug_assert!(sprite.screen_rx >= sprite.screen_lx);
        debug_assert!(sprite.screen_by >= sprite.screen_ty);

        let image = &sprites
            .get(sprite.sprite_rez)
            .expect("sprite vanished mid-frame")
            .images[sprite.image as usize];

        let sprite_w = sprite.screen_rx - sprite.screen_lx;
        let sprite_h = sprite.screen_by - sprite.screen_ty;

        let lx_int = sprite.screen_lx as i32;
        let rx_int = sprite.screen_rx as i32;
        let ty_int = sprite.screen_ty as i32;
        // Two extra rows to make sure sprite borders are captured.
        let by_int = sprite.screen_by as i32 + 2;

        let w_int = rx_int - lx_int + 1;
        let h_int = by_int - ty_int + 1;

        let tex_w = image.width as f32;
        let tex_h = image.height as f32;
        let tex_x_step = if sprite_w > 1.0 { tex_w / sprite_w } else { 0.0 };
        let tex_y_step = if sprite_h > 1.0 { tex_h / sprite_h } else { 0.0 };

        // Sub-pixel stability adjustments, as for walls: the fraction
        // of the first pixel counts as already stepped.
        let sub_x = -(sprite.screen_lx - sprite.screen_lx.trunc()) * tex_x_step;
        let sub_y = -(sprite.screen_ty - sprite.screen_ty.trunc()) * tex_y_step;

        // If stepping falls short of the last texture column, order one
        // extra screen column so borders are not cut off.
        let mut do_extra_col = {
            let end_tex_x = (w_int - 1) as f32 * tex_x_step + sub_x;
            tex_w - 1.0 - end_tex_x > 0.0
        };

        // Skip columns hanging off the left edge.
        let mut cur_screen_x = lx_int;
        let mut cur_col = 0u32;
        if cur_screen_x < 0 {
            cur_col = (-cur_screen_x) as u32;
            cur_screen_x = 0;
        }
        if cur_col as i32 >= w_int {
            return;
        }

        let end_screen_x = if rx_int >= self.metrics.width as i32 {
            do_extra_col = false;
            self.metrics.width as i32
        } else {
            rx_int + 1
        };

        // New sprite: invalidate the per-line in-front memoization.
        self.valid_count = self.valid_count.wrapping_add(1);

        let mut tex_x_f: f32 = if FLIP { tex_w.next_down() } else { 0.0 };

        while cur_screen_x < end_screen_x {
            debug_assert!(cur_screen_x >= 0 && cur_screen_x < self.metrics.width as i32);
            let tex_x = tex_x_f as u32;
            if tex_x >= image.width as u32 {
                break;
            }

            self.clip_and_draw_sprite_column(
                level,
                sprite,
                image,
                tex_x,
                cur_screen_x as u32,
                ty_int,
                h_int as u32,
                tex_y_step,
                sub_y,
                fb,
            );

            cur_screen_x += 1;
            cur_col += 1;

            if FLIP {
                tex_x_f = tex_w - (tex_x_step * cur_col as f32 + sub_x).max(0.5);
            } else {
                tex_x_f = (tex_x_step * cur_col as f32 + sub_x).max(0.0);
            }
        }

        // The ordered extra column shows the sprite's far edge.
        if do_extra_col {
            let x = rx_int + 1;
            if x < self.metrics.width as i32 {
                let tex_x = if FLIP { 0 } else { image.width as u32 - 1 };
                self.clip_and_draw_sprite_column(
                    level,
                    sprite,
                    image,
                    tex_x,
                    x as u32,
                    ty_int,
                    h_int as u32,
                    tex_y_step,
                    sub_y,
                    fb,
                );
            }
        }
    }

    /// Tighten the given sprite column against every occluder entry at
    /// this screen column whose line is in front of the sprite.
    /// Returns `(clip_top, clip_bottom)`: rows at or above/below these
    /// are hidden.
    pub(crate) fn sprite_clip_bounds(
        &mut self,
        level: &Level,
        x: u32,
        depth: f32,
        sprite_world_x: f32,
        sprite_world_y: f32,
    ) -> (i16, i16) {
        let mut clip_top: i16 = -1;
        let mut clip_bottom: i16 = self.metrics.height as i16;

        for i in 0..self.occluding_cols[x as usize].len() {
            let entry = self.occluding_cols[x as usize][i];
            let state = &mut self.line_state[entry.line as usize];

            if state.valid_count != self.valid_count {
                // Endpoint depth bounds take precedence over the cross
                // product: deeper than both endpoints means the line is
                // definitely in front, shallower than both means
                // definitely behind. This mimics the classic software
                // renderer's behavior, artifacts included.
                let min_depth = state.v1_draw_depth.min(state.v2_draw_depth);
                let max_depth = state.v1_draw_depth.max(state.v2_draw_depth);

                if depth > max_depth {
                    state.in_front_of_sprite = true;
                } else if depth < min_depth {
                    state.in_front_of_sprite = false;
                } else {
                    // Which way the test points depends on the side of
                    // the line that was actually drawn this frame.
                    let line = &level.lines[entry.line as usize];
                    let (rx, ry, dx, dy) = if state.drawn_side == 0 {
                        (
                            sprite_world_x - line.v1f.x,
                            sprite_world_y - line.v1f.y,
                            line.v2f.x - line.v1f.x,
                            line.v2f.y - line.v1f.y,
                        )
                    } else {
                        (
                            sprite_world_x - line.v2f.x,
                            sprite_world_y - line.v2f.y,
                            line.v1f.x - line.v2f.x,
                            line.v1f.y - line.v2f.y,
                        )
                    };
                    state.in_front_of_sprite = rx * dy < ry * dx;
                }

                state.valid_count = self.valid_count;
            }

            if state.in_front_of_sprite {
                clip_top = clip_top.max(entry.top);
                clip_bottom = clip_bottom.min(entry.bottom);
            }
        }

        (clip_top, clip_bottom)
    }

    /// Clip one sprite column against the occluders and draw it.
    #[allow(clippy::too_many_arguments)]
    fn clip_and_draw_sprite_column(
        &mut self,
        level: &Level,
        sprite: &DrawSprite,
        image: &SpriteImage,
        tex_x: u32,
        x: u32,
        y: i32,
        height: u32,
        tex_y_step: f32,
        tex_y_subpixel_adjust: f32,
        fb: &mut FrameBuffer,
    ) {
        debug_assert!(x < self.metrics.width);

        let (clip_top, clip_bottom) =
            self.sprite_clip_bounds(level, x, sprite.depth, sprite.world_x, sprite.world_y);
        if clip_top >= clip_bottom {
            return;
        }

        let mut src_tex_y = 0.0f32;
        let mut sub_adjust = tex_y_subpixel_adjust;
        let mut dst_y = y;
        let mut dst_count = height as i32;

        // Clip against the occluded top...
        if dst_y <= clip_top as i32 {
            let hidden = clip_top as i32 - dst_y + 1;
            if hidden >= dst_count {
                return;
            }
            src_tex_y = tex_y_step * hidden as f32 + sub_adjust;
            sub_adjust = 0.0;
            dst_y += hidden;
            dst_count -= hidden;
        }

        // ...and the occluded bottom.
        let end_y = dst_y + dst_count;
        if end_y > clip_bottom as i32 {
            let hidden = end_y - clip_bottom as i32;
            if hidden >= dst_count {
                return;
            }
            dst_count -= hidden;
        }

        // One column of the column-major image.
        let col_start = tex_x as usize * image.height as usize;
        let col_pixels = &image.pixels[col_start..col_start + image.height as usize];

        let (view_w, view_h) = (self.metrics.width, self.metrics.height);
        let base =
            self.metrics.y_offset as usize * fb.width() + self.metrics.x_offset as usize;
        let pitch = fb.width() as u32;
        let dst = &mut fb.pixels_mut()[base..];

        if !sprite.transparent {
            blit::blit_column::<{ SPRITE_COLUMN_FLAGS }, u16>(
                col_pixels,
                1,
                image.height as u32,
                0.0,
                src_tex_y,
                0.0,
                sub_adjust,
                dst,
                view_w,
                view_h,
                pitch,
                x as i32,
                dst_y,
                dst_count as u32,
                0.0,
                tex_y_step,
                sprite.light_mul,
                sprite.light_mul,
                sprite.light_mul,
                1.0,
            );
        } else {
            // Spectres and invisible things: fixed 50% blend with a
            // strong darkening.
            let shadow_mul = sprite.light_mul * MF_SHADOW_COLOR_MULT;
            blit::blit_column::<{ SPRITE_COLUMN_BLEND_FLAGS }, u16>(
                col_pixels,
                1,
                image.height as u32,
                0.0,
                src_tex_y,
                0.0,
                sub_adjust,
                dst,
                view_w,
                view_h,
                pitch,
                x as i32,
                dst_y,
                dst_count as u32,
                0.0,
                tex_y_step,
                shadow_mul,
                shadow_mul,
                shadow_mul,
                MF_SHADOW_ALPHA,
            );
        }
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
