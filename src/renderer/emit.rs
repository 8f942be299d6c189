//! Seg emission: per-column perspective-correct interpolation producing
//! wall, floor, ceiling and sky fragments plus sprite occluder entries,
//! while maintaining the per-column seg clip bounds.
//!
//! What a seg emits is selected at compile time through a `const FLAGS`
//! parameter; `add_seg_to_frame` instantiates the three combinations
//! that occur (solid, two sided, two sided with a sky back sector).

use crate::base::fixed::fixed_to_float;
use crate::renderer::seg::{
    self, ClipPlane, DrawSeg, clip_seg_against_plane, is_screen_space_seg_back_facing,
};
use crate::renderer::tables::LightParams;
use crate::renderer::{
    FlatFragment, MAX_OCCLUDER_ENTRIES, OccluderEntry, Renderer, SegClip, SkyFragment,
    WallFragment,
};
use crate::world::geometry::{Level, LineFlags, Seg, SegId, SKY_CEILING_PIC};
use crate::world::texture::TextureBank;

/// Minimum depth at which the first pixel of a flat column is clamped
/// to the fragment's world position. Close up, the back-projection is
/// accurate and clamping would cause temporal aliasing; far away it
/// stops textures overstepping their bounds at shallow angles.
const MIN_DEPTH_FOR_FLAT_PIXEL_CLAMP: f32 = 128.0;

/// Move bottom texture coords up a little so the last pixel is never
/// skipped past.
const BOTTOM_TEX_Y_ADJUST: f32 = -0.0001;

/// What a seg emits per column.
pub mod frag {
    pub const MID_WALL: u16 = 0x0001;
    pub const UPPER_WALL: u16 = 0x0002;
    pub const LOWER_WALL: u16 = 0x0004;
    pub const FLOOR: u16 = 0x0008;
    pub const CEILING: u16 = 0x0010;
    pub const SKY: u16 = 0x0020;
    pub const MID_WALL_OCCLUDER: u16 = 0x0040;
    pub const UPPER_WALL_OCCLUDER: u16 = 0x0080;
    pub const LOWER_WALL_OCCLUDER: u16 = 0x0100;
}

#[inline(always)]
const fn has(flags: u16, bit: u16) -> bool {
    flags & bit != 0
}

const SOLID_SEG_FLAGS: u16 =
    frag::MID_WALL | frag::MID_WALL_OCCLUDER | frag::FLOOR | frag::CEILING | frag::SKY;

const TWO_SIDED_SEG_FLAGS: u16 = frag::LOWER_WALL
    | frag::UPPER_WALL
    | frag::LOWER_WALL_OCCLUDER
    | frag::UPPER_WALL_OCCLUDER
    | frag::FLOOR
    | frag::CEILING
    | frag::SKY;

/// Upper walls are skipped against a sky back sector so the sky shows
/// through, but the occluders still apply.
const TWO_SIDED_SKY_BACK_SEG_FLAGS: u16 = frag::LOWER_WALL
    | frag::LOWER_WALL_OCCLUDER
    | frag::UPPER_WALL_OCCLUDER
    | frag::FLOOR
    | frag::CEILING;

impl Renderer {
    /// Run one seg through the whole pipeline: transform, clip,
    /// classify, then emit its columns.
    pub(crate) fn add_seg_to_frame(&mut self, level: &Level, textures: &TextureBank, seg_id: SegId) {
        let seg = &level.segs[seg_id as usize];
        let side = &level.sides[seg.side as usize];

        let mut ds = DrawSeg::default();
        seg::populate_seg_vertex_attribs(seg, side.tex_x_offset, &mut ds);
        seg::transform_seg_xy_to_view_space(
            seg,
            self.view_x,
            self.view_y,
            self.view_sin,
            self.view_cos,
            &mut ds,
        );
        seg::transform_seg_xyw_to_clip_space(&self.proj, &mut ds);

        if !clip_seg_against_plane(&mut ds, ClipPlane::Front)
            || !clip_seg_against_plane(&mut ds, ClipPlane::Left)
            || !clip_seg_against_plane(&mut ds, ClipPlane::Right)
        {
            return;
        }

        seg::add_clip_space_z_values(&mut ds, seg, level, self.view_z, &self.proj);
        seg::do_perspective_division(&mut ds);
        seg::transform_seg_xz_to_screen_space(&mut ds, self.metrics.width, self.metrics.height);

        if is_screen_space_seg_back_facing(&ds) {
            return;
        }

        // Remember the depths this line was drawn at and which side
        // faced the view; the sprite clipper keys its in-front test off
        // these.
        let line_state = &mut self.line_state[seg.line as usize];
        line_state.v1_draw_depth = ds.p1w;
        line_state.v2_draw_depth = ds.p2w;
        line_state.drawn_side = seg.line_side;

        let num_cols = match seg.back_sector {
            None => self.emit_seg_columns::<{ SOLID_SEG_FLAGS }>(&ds, seg, level, textures),
            Some(back) => {
                if level.sectors[back as usize].ceiling_pic != SKY_CEILING_PIC {
                    self.emit_seg_columns::<{ TWO_SIDED_SEG_FLAGS }>(&ds, seg, level, textures)
                } else {
                    self.emit_seg_columns::<{ TWO_SIDED_SKY_BACK_SEG_FLAGS }>(&ds, seg, level, textures)
                }
            }
        };

        // Any emitted wall or flat column makes the line visible to the
        // automap.
        if num_cols > 0 {
            self.line_mapped[seg.line as usize] = true;
        }
    }

    /// Emit fragments and occluder entries for each column of the seg.
    /// Returns the number of wall and flat columns emitted.
    fn emit_seg_columns<const FLAGS: u16>(
        &mut self,
        ds: &DrawSeg,
        seg: &Seg,
        level: &Level,
        textures: &TextureBank,
    ) -> u32 {
        debug_assert!(ds.p1x <= ds.p2x);

        let x1 = ds.p1x as i32;
        let x2 = ds.p2x as i32;
        debug_assert!(x1 >= 0 && x2 >= x1);
        debug_assert!((x2 as u32) < self.metrics.width);

        let front = &level.sectors[seg.front_sector as usize];
        let side = &level.sides[seg.side as usize];
        let line = &level.lines[seg.line as usize];

        /*--------------------------------------------------------------*/
        /* First-pixel clamping for flats: only when the adjacent       */
        /* subsector actually changes height or texture, so contiguous  */
        /* flats keep sampling continuously.                            */
        /*--------------------------------------------------------------*/
        let (can_clamp_floor, can_clamp_ceiling) = match seg.back_sector {
            Some(back_id) => {
                let back = &level.sectors[back_id as usize];
                (
                    front.floor_h != back.floor_h || front.floor_pic != back.floor_pic,
                    front.ceil_h != back.ceil_h || front.ceiling_pic != back.ceiling_pic,
                )
            }
            None => (true, true),
        };

        /*--------------------------------------------------------------*/
        /* Light params for the effective sector light level            */
        /*--------------------------------------------------------------*/
        let sector_light = self.effective_light_level(front.light_level);
        let light_params = self.metrics.light_params(sector_light);

        /*--------------------------------------------------------------*/
        /* Textures (animation redirects resolved now). Only the pieces */
        /* this instantiation emits may be dereferenced: a side that    */
        /* never draws a part can carry a junk texture number there.    */
        /*--------------------------------------------------------------*/
        let mid_tex = if has(FLAGS, frag::MID_WALL) {
            textures.wall(side.mid_texture).anim_tex_num
        } else {
            0
        };
        let upper_tex = if has(FLAGS, frag::UPPER_WALL) {
            textures.wall(side.top_texture).anim_tex_num
        } else {
            0
        };
        let lower_tex = if has(FLAGS, frag::LOWER_WALL) {
            textures.wall(side.bottom_texture).anim_tex_num
        } else {
            0
        };
        let floor_tex = textures.flat(front.floor_pic).anim_tex_num;
        let ceiling_tex: Option<u32> = if front.ceiling_pic != SKY_CEILING_PIC {
            Some(textures.flat(front.ceiling_pic).anim_tex_num)
        } else {
            None
        };

        /*--------------------------------------------------------------*/
        /* World z of the wall pieces and the texture y anchors         */
        /*--------------------------------------------------------------*/
        let front_floor_z = fixed_to_float(front.floor_h);
        let front_ceil_z = fixed_to_float(front.ceil_h);
        let (back_floor_z, back_ceil_z) = match seg.back_sector {
            Some(b) => {
                let back = &level.sectors[b as usize];
                (fixed_to_float(back.floor_h), fixed_to_float(back.ceil_h))
            }
            None => (0.0, 0.0),
        };

        let upper_world_tz = front_ceil_z;
        let upper_world_bz = back_ceil_z;
        let lower_world_tz = back_floor_z;
        let lower_world_bz = front_floor_z;

        let row_offset = side.tex_y_offset;
        let bottom_unpegged = line.flags.contains(LineFlags::DONT_PEG_BOTTOM);
        let top_unpegged = line.flags.contains(LineFlags::DONT_PEG_TOP);

        // Anchor each wall piece's top texture coordinate; a negative
        // result is wrapped up by one texture height for correct
        // vertical alignment.
        let anchor_ty = |anchor: f32, piece_top_z: f32, tex_h: f32| -> f32 {
            let ty = anchor + row_offset - piece_top_z;
            if ty < 0.0 { ty + tex_h } else { ty }
        };

        let mut mid_tex_ty = 0.0;
        let mut mid_tex_by = 0.0;
        if has(FLAGS, frag::MID_WALL) {
            let tex_h = textures.wall(mid_tex).height as f32;
            let anchor = if bottom_unpegged {
                front_floor_z + tex_h
            } else {
                front_ceil_z
            };
            mid_tex_ty = anchor_ty(anchor, front_ceil_z, tex_h);
            mid_tex_by = mid_tex_ty + (upper_world_tz - lower_world_bz) + BOTTOM_TEX_Y_ADJUST;
        }

        let mut upper_tex_ty = 0.0;
        let mut upper_tex_by = 0.0;
        if has(FLAGS, frag::UPPER_WALL) {
            let tex_h = textures.wall(upper_tex).height as f32;
            let anchor = if top_unpegged {
                front_ceil_z
            } else {
                back_ceil_z + tex_h
            };
            upper_tex_ty = anchor_ty(anchor, front_ceil_z, tex_h);
            upper_tex_by = upper_tex_ty + (upper_world_tz - upper_world_bz) + BOTTOM_TEX_Y_ADJUST;
        }

        let mut lower_tex_ty = 0.0;
        let mut lower_tex_by = 0.0;
        if has(FLAGS, frag::LOWER_WALL) {
            let tex_h = textures.wall(lower_tex).height as f32;
            let anchor = if bottom_unpegged { front_ceil_z } else { back_floor_z };
            lower_tex_ty = anchor_ty(anchor, back_floor_z, tex_h);
            lower_tex_by = lower_tex_ty + (lower_world_tz - lower_world_bz) + BOTTOM_TEX_Y_ADJUST;
        }

        /*--------------------------------------------------------------*/
        /* Column interpolation setup. 1/w and the z edges interpolate  */
        /* linearly in screen space; texture x and world xy must be     */
        /* divided by w first and recovered per column.                 */
        /*--------------------------------------------------------------*/
        let x_range_div = 1.0 / (ds.p2x - ds.p1x);

        let p1_inv_w = 1.0 / ds.p1w;
        let p2_inv_w = 1.0 / ds.p2w;
        let inv_w_step = (p2_inv_w - p1_inv_w) * x_range_div;

        let p1_tex_x = ds.p1_tex_x * p1_inv_w;
        let tex_x_step = (ds.p2_tex_x * p2_inv_w - p1_tex_x) * x_range_div;

        let p1_world_x = ds.p1_world_x * p1_inv_w;
        let p1_world_y = ds.p1_world_y * p1_inv_w;
        let world_x_step = (ds.p2_world_x * p2_inv_w - p1_world_x) * x_range_div;
        let world_y_step = (ds.p2_world_y * p2_inv_w - p1_world_y) * x_range_div;

        let upper_tz_step = (ds.p2tz - ds.p1tz) * x_range_div;
        let upper_bz_step = (ds.p2tz_back - ds.p1tz_back) * x_range_div;
        let lower_tz_step = (ds.p2bz_back - ds.p1bz_back) * x_range_div;
        let lower_bz_step = (ds.p2bz - ds.p1bz) * x_range_div;

        // The x step counter advances by one per column; it carries a
        // negative sub-pixel offset (applied after the first column) so
        // interpolated values stay stable as the camera moves.
        let mut cur_step = 0.0f32;
        let mut next_step = -(ds.p1x - x1 as f32);

        let view_h = self.metrics.height as f32;
        let mut num_wall_and_flat_cols = 0u32;

        for x in x1..=x2 {
            let mut clip = self.seg_clip[x as usize];

            // Fully occluded columns only advance the stepping.
            if clip.top >= clip.bottom {
                next_step += 1.0;
                cur_step = next_step;
                continue;
            }

            let w_inv = if x < x2 {
                p1_inv_w + inv_w_step * cur_step
            } else {
                p2_inv_w
            };
            let w = 1.0 / w_inv;
            let depth = w;

            let tex_x = (p1_tex_x + tex_x_step * cur_step) * w;
            let world_x = (p1_world_x + world_x_step * cur_step) * w;
            let world_y = (p1_world_y + world_y_step * cur_step) * w;

            let upper_tz = ds.p1tz + upper_tz_step * cur_step;
            let upper_bz = ds.p1tz_back + upper_bz_step * cur_step;
            let lower_tz = ds.p1bz_back + lower_tz_step * cur_step;
            let lower_bz = ds.p1bz + lower_bz_step * cur_step;

            next_step += 1.0;
            cur_step = next_step;

            /*----------------------------------------------------------*/
            /* Flats, sky, then walls; each may tighten the clip bounds */
            /*----------------------------------------------------------*/
            if has(FLAGS, frag::FLOOR) && ds.emit_floor {
                let clamp = can_clamp_floor && depth >= MIN_DEPTH_FOR_FLAT_PIXEL_CLAMP;
                num_wall_and_flat_cols += self.clip_and_emit_flat_column::<true>(
                    x as u16,
                    lower_bz,
                    view_h,
                    &mut clip,
                    depth,
                    world_x,
                    world_y,
                    lower_world_bz,
                    clamp,
                    sector_light as u8,
                    floor_tex,
                );
            }

            if has(FLAGS, frag::CEILING) {
                if let Some(ceiling_tex) = ceiling_tex {
                    if ds.emit_ceiling {
                        let clamp = can_clamp_ceiling && depth >= MIN_DEPTH_FOR_FLAT_PIXEL_CLAMP;
                        num_wall_and_flat_cols += self.clip_and_emit_flat_column::<false>(
                            x as u16,
                            0.0,
                            upper_tz,
                            &mut clip,
                            depth,
                            world_x,
                            world_y,
                            upper_world_tz,
                            clamp,
                            sector_light as u8,
                            ceiling_tex,
                        );
                    }
                }
            }

            if has(FLAGS, frag::SKY) && ceiling_tex.is_none() && upper_tz > 0.0 {
                self.sky_fragments.push(SkyFragment {
                    x: x as u16,
                    height: upper_tz.ceil() as u16,
                });
            }

            if has(FLAGS, frag::MID_WALL) {
                num_wall_and_flat_cols += self.clip_and_emit_wall_column::<{ frag::MID_WALL }>(
                    x as u16,
                    upper_tz,
                    lower_bz,
                    tex_x,
                    mid_tex_ty,
                    mid_tex_by,
                    depth,
                    &mut clip,
                    &light_params,
                    seg.light_mul,
                    mid_tex,
                );
            }

            if has(FLAGS, frag::LOWER_WALL) {
                num_wall_and_flat_cols += self.clip_and_emit_wall_column::<{ frag::LOWER_WALL }>(
                    x as u16,
                    lower_tz,
                    lower_bz,
                    tex_x,
                    lower_tex_ty,
                    lower_tex_by,
                    depth,
                    &mut clip,
                    &light_params,
                    seg.light_mul,
                    lower_tex,
                );
            }

            if has(FLAGS, frag::UPPER_WALL) {
                num_wall_and_flat_cols += self.clip_and_emit_wall_column::<{ frag::UPPER_WALL }>(
                    x as u16,
                    upper_tz,
                    upper_bz,
                    tex_x,
                    upper_tex_ty,
                    upper_tex_by,
                    depth,
                    &mut clip,
                    &light_params,
                    seg.light_mul,
                    upper_tex,
                );
            }

            /*----------------------------------------------------------*/
            /* Occluders                                                */
            /*----------------------------------------------------------*/
            if has(FLAGS, frag::MID_WALL_OCCLUDER) {
                // A solid wall gobbles up the entire column.
                self.emit_occluder_column::<true>(
                    x as usize,
                    self.metrics.height as i32,
                    depth,
                    seg.line,
                );
            } else if clip.top >= clip.bottom {
                // The column filled up during this seg: also occlude
                // sprites behind it from here on.
                self.emit_occluder_column::<true>(
                    x as usize,
                    self.metrics.height as i32,
                    depth,
                    seg.line,
                );
                self.seg_clip[x as usize] = clip;
                continue;
            }

            if has(FLAGS, frag::LOWER_WALL_OCCLUDER) && ds.emit_lower_occluder {
                let z = if ds.lower_occluder_uses_back_z {
                    lower_tz
                } else {
                    lower_bz
                };
                self.emit_occluder_column::<false>(x as usize, z as i32, depth, seg.line);
            }

            if has(FLAGS, frag::UPPER_WALL_OCCLUDER) && ds.emit_upper_occluder {
                let z = if ds.upper_occluder_uses_back_z {
                    upper_bz
                } else {
                    upper_tz
                };
                self.emit_occluder_column::<true>(x as usize, z as i32, depth, seg.line);
            }

            self.seg_clip[x as usize] = clip;
        }

        num_wall_and_flat_cols
    }

    /// Merge an emitted wall part into the column clip bounds. Bounds
    /// only ever grow; a consumed column bumps the full-column counter.
    fn add_wall_part_to_clip_bounds<const PART: u16>(&mut self, clip: &mut SegClip, zt: i32, zb: i32) {
        if clip.top + 1 >= clip.bottom {
            return;
        }

        if PART == frag::MID_WALL {
            *clip = SegClip { top: 0, bottom: 0 };
            self.num_full_seg_cols += 1;
            return;
        }

        if PART == frag::UPPER_WALL {
            clip.top = clip.top.max(zb as i16);
        } else {
            clip.bottom = clip.bottom.min(zt as i16);
        }

        if clip.top + 1 >= clip.bottom {
            *clip = SegClip { top: 0, bottom: 0 };
            self.num_full_seg_cols += 1;
        }
    }

    /// Clip one wall column against the seg clip bounds and emit a
    /// fragment for whatever survives. Returns 1 if a fragment was
    /// emitted.
    #[allow(clippy::too_many_arguments)]
    fn clip_and_emit_wall_column<const PART: u16>(
        &mut self,
        x: u16,
        zt: f32,
        zb: f32,
        tex_x: f32,
        tex_ty: f32,
        tex_by: f32,
        depth: f32,
        clip: &mut SegClip,
        light_params: &LightParams,
        seg_light_mul: f32,
        wall_tex: u32,
    ) -> u32 {
        debug_assert!((x as u32) < self.metrics.width);

        let mut emitted = 0u32;

        'emit: {
            // Zero/negative size emits nothing, but a mid wall still
            // occludes the column below.
            if zt >= zb || zb < 0.0 || zt >= self.metrics.height as f32 {
                if PART == frag::MID_WALL {
                    break 'emit;
                }
                return 0;
            }

            let tex_y_step = (tex_by - tex_ty) / (zb - zt);

            let mut cur_zt = zt;
            let mut cur_zb = zb;
            let mut cur_zt_int = zt as i32;
            let mut cur_zb_int = zb as i32;
            let mut cur_tex_ty = tex_ty;
            let tex_y_subpixel_adjust;

            if cur_zt_int <= clip.top as i32 {
                // Clipped at the top; the clamp absorbs sub-pixel motion.
                cur_zt = clip.top as f32 + 1.0;
                cur_zt_int = cur_zt as i32;
                cur_tex_ty += tex_y_step * (cur_zt - zt);
                if cur_zt >= cur_zb {
                    break 'emit;
                }
                tex_y_subpixel_adjust = 0.0;
            } else {
                // Count the fractional part of the true top as already
                // stepped so the first texel lines up with it.
                tex_y_subpixel_adjust = -(cur_zt - cur_zt.trunc()) * tex_y_step;
            }

            if cur_zb_int >= clip.bottom as i32 {
                // Nudge a hair below the bound so integer conversion
                // cannot overshoot it.
                cur_zb = (clip.bottom as f32).next_down();
                cur_zb_int = cur_zb as i32;
                if cur_zt >= cur_zb {
                    break 'emit;
                }
            }

            debug_assert!(cur_zt_int <= cur_zb_int);
            debug_assert!(cur_zt_int >= 0 && (cur_zt_int as u32) < self.metrics.height);
            debug_assert!(cur_zb_int >= 0 && (cur_zb_int as u32) < self.metrics.height);

            self.wall_fragments.push(WallFragment {
                x,
                y: cur_zt_int as u16,
                height: (cur_zb_int - cur_zt_int + 1) as u16,
                texcoord_x: tex_x as i32,
                texcoord_y: cur_tex_ty,
                texcoord_y_subpixel_adjust: tex_y_subpixel_adjust,
                texcoord_y_step: tex_y_step,
                light_mul: light_params.light_mul_for_dist(depth) * seg_light_mul,
                wall_tex,
            });
            emitted = 1;
        }

        self.add_wall_part_to_clip_bounds::<PART>(clip, zt as i32, zb.floor() as i32);
        emitted
    }

    /// Clip one floor/ceiling column and emit a fragment for whatever
    /// survives. Returns 1 if a fragment was emitted.
    #[allow(clippy::too_many_arguments)]
    fn clip_and_emit_flat_column<const IS_FLOOR: bool>(
        &mut self,
        x: u16,
        zt: f32,
        zb: f32,
        clip: &mut SegClip,
        depth: f32,
        world_x: f32,
        world_y: f32,
        world_z: f32,
        clamp_first_pixel: bool,
        sector_light_level: u8,
        flat_tex: u32,
    ) -> u32 {
        debug_assert!((x as u32) < self.metrics.width);

        if zt >= zb {
            return 0;
        }

        let mut zt_int = zt as i32;
        let mut zb_int = zb as i32;

        if zt_int <= clip.top as i32 {
            zt_int = clip.top as i32 + 1;
            if zt_int > zb_int {
                return 0;
            }
        }
        if zb_int >= clip.bottom as i32 {
            zb_int = clip.bottom as i32 - 1;
            if zt_int > zb_int {
                return 0;
            }
        }

        let fragment = FlatFragment {
            x,
            y: zt_int as u16,
            height: (zb_int - zt_int + 1) as u16,
            sector_light_level,
            clamp_first_pixel,
            depth,
            world_x,
            world_y,
            world_z,
            flat_tex,
        };
        if IS_FLOOR {
            self.floor_fragments.push(fragment);
        } else {
            self.ceil_fragments.push(fragment);
        }

        // Tighten the clip bounds; a ceiling grows the top downward and
        // a floor grows the bottom upward.
        if IS_FLOOR {
            if zt_int - 1 >= clip.top as i32 {
                clip.bottom = zt_int as i16;
            } else {
                *clip = SegClip { top: 0, bottom: 0 };
                self.num_full_seg_cols += 1;
            }
        } else if zb_int + 1 < clip.bottom as i32 {
            clip.top = zb_int as i16;
        } else {
            *clip = SegClip { top: 0, bottom: 0 };
            self.num_full_seg_cols += 1;
        }

        1
    }

    /// Add an occluder entry for sprites at one screen column. `TOP`
    /// occludes at the given coordinate and above, otherwise at the
    /// coordinate and below.
    ///
    /// BSP order means depths only grow, so entries stay sorted by
    /// construction; a deeper entry is only appended when it actually
    /// hides more pixels than the previous one, and an equal-depth (or,
    /// rarely, shallower) request merges into the previous entry.
    pub(crate) fn emit_occluder_column<const TOP: bool>(
        &mut self,
        x: usize,
        screen_y: i32,
        depth: f32,
        line: u16,
    ) {
        debug_assert!(x < self.metrics.width as usize);

        if TOP {
            if screen_y < 0 {
                return;
            }
        } else if screen_y >= self.metrics.height as i32 {
            return;
        }

        let view_h = self.metrics.height as i16;
        let cols = &mut self.occluding_cols[x];

        let Some(prev) = cols.last_mut() else {
            cols.push(if TOP {
                OccluderEntry {
                    line,
                    depth,
                    top: screen_y as i16,
                    bottom: view_h,
                }
            } else {
                OccluderEntry {
                    line,
                    depth,
                    top: -1,
                    bottom: screen_y as i16,
                }
            });
            return;
        };

        if prev.depth < depth {
            // A deeper occluder only helps if it shrinks the visible gap.
            let num_visible = (prev.bottom as i32 - prev.top as i32 - 1).max(0);
            let new_bound = screen_y as i16;
            let new_num_visible = if TOP {
                (prev.bottom as i32 - new_bound as i32 - 1).max(0)
            } else {
                (new_bound as i32 - prev.top as i32 - 1).max(0)
            };

            if new_num_visible < num_visible && cols.len() < MAX_OCCLUDER_ENTRIES {
                let entry = if TOP {
                    OccluderEntry {
                        line,
                        depth,
                        top: new_bound,
                        bottom: cols.last().unwrap().bottom,
                    }
                } else {
                    OccluderEntry {
                        line,
                        depth,
                        top: cols.last().unwrap().top,
                        bottom: new_bound,
                    }
                };
                cols.push(entry);
            }
        } else {
            // Same depth (or a stray shallower one from an imperfect
            // BSP split): tighten the existing entry instead.
            if TOP {
                prev.top = prev.top.max(screen_y as i16);
            } else {
                prev.bottom = prev.bottom.min(screen_y as i16);
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
    use crate::base::angle::ANG90;
    use crate::base::fixed::int_to_fixed;
    use crate::renderer::ViewParams;
    use crate::world::geometry::Sector;

    fn renderer_with_frame() -> Renderer {
        let mut r = Renderer::new(0);
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
    fn occluders_append_in_depth_order() {
        let mut r = renderer_with_frame();
        r.emit_occluder_column::<true>(5, 50, 100.0, 1);
        r.emit_occluder_column::<true>(5, 70, 200.0, 2);
        let cols = &r.occluding_cols[5];
        assert_eq!(cols.len(), 2);
        assert!(cols[0].depth < cols[1].depth);
        assert_eq!(cols[0].top, 50);
        assert_eq!(cols[1].top, 70);
        assert_eq!(cols[1].bottom, cols[0].bottom);
    }

    #[test]
    fn deeper_occluder_that_hides_less_is_skipped() {
        let mut r = renderer_with_frame();
        r.emit_occluder_column::<true>(3, 80, 100.0, 1);
        // Deeper but with a smaller occluded area: dropped.
        r.emit_occluder_column::<true>(3, 40, 200.0, 2);
        assert_eq!(r.occluding_cols[3].len(), 1);
        assert_eq!(r.occluding_cols[3][0].top, 80);
    }

    #[test]
    fn equal_depth_merges_into_last_entry() {
        let mut r = renderer_with_frame();
        r.emit_occluder_column::<true>(9, 30, 100.0, 1);
        r.emit_occluder_column::<false>(9, 120, 100.0, 1);
        let cols = &r.occluding_cols[9];
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].top, 30);
        assert_eq!(cols[0].bottom, 120);
    }

    #[test]
    fn occluder_capacity_clamps_at_sixteen() {
        let mut r = renderer_with_frame();
        for i in 0..40 {
            // Strictly deeper and strictly tighter every time so each
            // would otherwise append.
            r.emit_occluder_column::<true>(0, 40 + i, 100.0 + i as f32, i as u16);
        }
        assert_eq!(r.occluding_cols[0].len(), MAX_OCCLUDER_ENTRIES);
    }

    #[test]
    fn offscreen_occluder_requests_are_ignored() {
        let mut r = renderer_with_frame();
        r.emit_occluder_column::<true>(0, -5, 100.0, 0);
        r.emit_occluder_column::<false>(0, 160, 100.0, 0);
        assert!(r.occluding_cols[0].is_empty());
    }

    #[test]
    fn mid_wall_consumes_the_column() {
        let mut r = renderer_with_frame();
        let mut clip = SegClip { top: -1, bottom: 160 };
        let lp = r.metrics.light_params(160);
        let n = r.clip_and_emit_wall_column::<{ frag::MID_WALL }>(
            10, 40.0, 120.0, 3.0, 0.0, 80.0, 50.0, &mut clip, &lp, 1.0, 0,
        );
        assert_eq!(n, 1);
        assert_eq!(clip, SegClip { top: 0, bottom: 0 });
        assert_eq!(r.num_full_seg_cols, 1);

        let f = &r.wall_fragments[0];
        assert_eq!(f.y, 40);
        assert_eq!(f.height, 81);
        assert_eq!(f.texcoord_x, 3);
        // Sub-pixel adjust is zero at an exact integer top.
        assert_eq!(f.texcoord_y_subpixel_adjust, 0.0);
    }

    #[test]
    fn upper_wall_raises_top_lower_wall_raises_bottom() {
        let mut r = renderer_with_frame();
        let lp = r.metrics.light_params(160);

        let mut clip = SegClip { top: -1, bottom: 160 };
        r.clip_and_emit_wall_column::<{ frag::UPPER_WALL }>(
            0, 0.0, 30.0, 0.0, 0.0, 30.0, 50.0, &mut clip, &lp, 1.0, 0,
        );
        assert_eq!(clip.top, 30);
        assert_eq!(clip.bottom, 160);

        r.clip_and_emit_wall_column::<{ frag::LOWER_WALL }>(
            0, 120.0, 159.0, 0.0, 0.0, 39.0, 50.0, &mut clip, &lp, 1.0, 0,
        );
        assert_eq!(clip.top, 30);
        assert_eq!(clip.bottom, 120);
        assert_eq!(r.num_full_seg_cols, 0);
    }

    #[test]
    fn wall_clipped_against_tightened_top_starts_lower() {
        let mut r = renderer_with_frame();
        let lp = r.metrics.light_params(160);
        let mut clip = SegClip { top: 49, bottom: 160 };
        r.clip_and_emit_wall_column::<{ frag::MID_WALL }>(
            0, 20.0, 120.0, 0.0, 0.0, 100.0, 50.0, &mut clip, &lp, 1.0, 0,
        );
        let f = &r.wall_fragments[0];
        assert_eq!(f.y, 50);
        // The clipped pixels advanced the texture coordinate.
        let step = 100.0 / 100.0;
        assert!((f.texcoord_y - step * 30.0).abs() < 1e-4);
        assert_eq!(f.texcoord_y_subpixel_adjust, 0.0);
    }

    #[test]
    fn flat_column_tightens_bounds_and_fills() {
        let mut r = renderer_with_frame();
        let mut clip = SegClip { top: -1, bottom: 160 };

        // Ceiling band from 0 to 40 tightens the top.
        let n = r.clip_and_emit_flat_column::<false>(
            0, 0.0, 40.0, &mut clip, 200.0, 0.0, 0.0, 128.0, false, 160, 0,
        );
        assert_eq!(n, 1);
        assert_eq!(clip.top, 40);

        // Floor band to the bottom of the screen tightens the bottom.
        let n = r.clip_and_emit_flat_column::<true>(
            0, 100.0, 160.0, &mut clip, 200.0, 0.0, 0.0, 0.0, true, 160, 0,
        );
        assert_eq!(n, 1);
        assert_eq!(clip.bottom, 100);
        assert_eq!(r.floor_fragments.len(), 1);
        assert!(r.floor_fragments[0].clamp_first_pixel);

        // A ceiling that reaches the clip bottom consumes the column.
        let mut tight = SegClip { top: -1, bottom: 41 };
        r.clip_and_emit_flat_column::<false>(
            1, 0.0, 40.0, &mut tight, 200.0, 0.0, 0.0, 128.0, false, 160, 0,
        );
        assert_eq!(tight, SegClip { top: 0, bottom: 0 });
        assert_eq!(r.num_full_seg_cols, 1);
    }

    #[test]
    fn zero_height_flat_emits_nothing() {
        let mut r = renderer_with_frame();
        let mut clip = SegClip { top: -1, bottom: 160 };
        let n = r.clip_and_emit_flat_column::<true>(
            0, 80.0, 80.0, &mut clip, 200.0, 0.0, 0.0, 0.0, false, 160, 0,
        );
        assert_eq!(n, 0);
        assert_eq!(clip, SegClip { top: -1, bottom: 160 });
    }
}
