//! Wall and flat texture tables.
//!
//! A single "texture info" resource declares every wall texture's size
//! and where the wall and flat resources start. Pixels are decoded
//! lazily on first use and freed on level exit. Every texture carries an
//! `anim_tex_num` redirect which gameplay rewrites to advance animated
//! textures; rendering always dereferences through it.

use thiserror::Error;

use crate::base::stream::{ByteStream, StreamError};
use crate::rez::archive::ResourceFile;

/// Flats are always 64x64 in this engine.
pub const FLAT_SIZE: u32 = 64;

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("texture resource {0} missing from archive")]
    NoSuchResource(u32),

    #[error("texture {num}: expected {expected} bytes of pixel data, got {actual}")]
    BadPixelDataSize {
        num: u32,
        expected: usize,
        actual: usize,
    },

    #[error("wall texture {0} has an odd width")]
    OddWidth(u32),

    #[error("texture index {0} out of range")]
    BadIndex(u32),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// One wall or flat texture.
///
/// Wall pixels are stored column major (as authored), flat pixels row
/// major; the drawers pick the matching blit mode.
#[derive(Clone, Debug, Default)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub resource_num: u32,
    /// Texture index to substitute when this texture is rendered.
    /// Points at itself when not animated.
    pub anim_tex_num: u32,
    /// ARGB1555; empty until decoded.
    pub pixels: Vec<u16>,
}

impl Texture {
    pub fn is_loaded(&self) -> bool {
        !self.pixels.is_empty()
    }
}

pub struct TextureBank {
    walls: Vec<Texture>,
    flats: Vec<Texture>,
    first_wall_rez: u32,
    first_flat_rez: u32,
    /// Wall texture index of the active sky.
    sky_tex_num: u32,
}

impl TextureBank {
    /// Parse the texture info resource:
    /// `{numWalls, firstWallRez, numFlats, firstFlatRez}` then one
    /// `{width, height, unused}` entry per wall. Flats carry no entries;
    /// they are all 64x64.
    pub fn init(rez: &ResourceFile, texture_info_rez: u32) -> Result<Self, TextureError> {
        let data = rez
            .data(texture_info_rez)
            .ok_or(TextureError::NoSuchResource(texture_info_rez))?;
        let mut s = ByteStream::new(data);

        let num_walls = s.read_u32()?;
        let first_wall_rez = s.read_u32()?;
        let num_flats = s.read_u32()?;
        let first_flat_rez = s.read_u32()?;

        let mut walls = Vec::with_capacity(num_walls as usize);
        for i in 0..num_walls {
            let width = s.read_u32()?;
            let height = s.read_u32()?;
            let _unused = s.read_u32()?;
            walls.push(Texture {
                width,
                height,
                resource_num: first_wall_rez + i,
                anim_tex_num: i,
                pixels: Vec::new(),
            });
        }

        let flats = (0..num_flats)
            .map(|i| Texture {
                width: FLAT_SIZE,
                height: FLAT_SIZE,
                resource_num: first_flat_rez + i,
                anim_tex_num: i,
                pixels: Vec::new(),
            })
            .collect();

        Ok(Self {
            walls,
            flats,
            first_wall_rez,
            first_flat_rez,
            sky_tex_num: 0,
        })
    }

    pub fn num_walls(&self) -> u32 {
        self.walls.len() as u32
    }

    pub fn num_flats(&self) -> u32 {
        self.flats.len() as u32
    }

    // ------------------------------------------------------------------ //
    // Sky selection
    // ------------------------------------------------------------------ //

    /// Pick the active sky wall texture for a map. `sky_rez_nums` are
    /// the resource numbers of the three sky textures.
    pub fn select_sky_for_map(&mut self, map_num: u32, sky_rez_nums: [u32; 3]) {
        let rez = if map_num < 9 || map_num == 24 {
            sky_rez_nums[0]
        } else if map_num < 18 {
            sky_rez_nums[1]
        } else {
            sky_rez_nums[2]
        };
        self.sky_tex_num = rez - self.first_wall_rez;
    }

    pub fn sky_tex_num(&self) -> u32 {
        self.sky_tex_num
    }

    // ------------------------------------------------------------------ //
    // Lazy loading
    // ------------------------------------------------------------------ //

    /// Decode a wall texture: 16-entry ARGB1555 palette (32 bytes)
    /// followed by 4-bit indices packed two per byte.
    pub fn load_wall(&mut self, rez: &ResourceFile, num: u32) -> Result<(), TextureError> {
        let tex = self
            .walls
            .get_mut(num as usize)
            .ok_or(TextureError::BadIndex(num))?;
        if tex.is_loaded() {
            return Ok(());
        }
        if tex.width % 2 != 0 {
            return Err(TextureError::OddWidth(num));
        }

        let data = rez
            .data(tex.resource_num)
            .ok_or(TextureError::NoSuchResource(tex.resource_num))?;
        let num_pixels = (tex.width * tex.height) as usize;
        let expected = 32 + num_pixels / 2;
        if data.len() < expected {
            return Err(TextureError::BadPixelDataSize {
                num: tex.resource_num,
                expected,
                actual: data.len(),
            });
        }

        let plut = &data[0..32];
        let color = |idx: usize| u16::from_be_bytes([plut[idx * 2], plut[idx * 2 + 1]]);

        let mut pixels = Vec::with_capacity(num_pixels);
        for &byte in &data[32..32 + num_pixels / 2] {
            pixels.push(color((byte >> 4) as usize));
            pixels.push(color((byte & 0x0F) as usize));
        }
        tex.pixels = pixels;
        Ok(())
    }

    /// Decode a flat: 32-entry ARGB1555 palette (64 bytes) followed by
    /// 5-bit indices stored one per byte.
    pub fn load_flat(&mut self, rez: &ResourceFile, num: u32) -> Result<(), TextureError> {
        let tex = self
            .flats
            .get_mut(num as usize)
            .ok_or(TextureError::BadIndex(num))?;
        if tex.is_loaded() {
            return Ok(());
        }

        let data = rez
            .data(tex.resource_num)
            .ok_or(TextureError::NoSuchResource(tex.resource_num))?;
        let num_pixels = (FLAT_SIZE * FLAT_SIZE) as usize;
        let expected = 64 + num_pixels;
        if data.len() < expected {
            return Err(TextureError::BadPixelDataSize {
                num: tex.resource_num,
                expected,
                actual: data.len(),
            });
        }

        let plut = &data[0..64];
        let mut pixels = Vec::with_capacity(num_pixels);
        for &byte in &data[64..64 + num_pixels] {
            let idx = (byte & 0x1F) as usize;
            pixels.push(u16::from_be_bytes([plut[idx * 2], plut[idx * 2 + 1]]));
        }
        tex.pixels = pixels;
        Ok(())
    }

    /// Decode every texture a level references (and the sky) up front so
    /// the render path never encounters a missing image.
    pub fn load_for_level(
        &mut self,
        rez: &ResourceFile,
        level: &crate::world::geometry::Level,
    ) -> Result<(), TextureError> {
        for side in &level.sides {
            for num in [side.top_texture, side.bottom_texture, side.mid_texture] {
                if (num as usize) < self.walls.len() {
                    self.load_wall(rez, num)?;
                }
            }
        }
        for sector in &level.sectors {
            if (sector.floor_pic as usize) < self.flats.len() {
                self.load_flat(rez, sector.floor_pic)?;
            }
            if sector.ceiling_pic != crate::world::geometry::SKY_CEILING_PIC
                && (sector.ceiling_pic as usize) < self.flats.len()
            {
                self.load_flat(rez, sector.ceiling_pic)?;
            }
        }
        self.load_wall(rez, self.sky_tex_num)
    }

    /// Free all decoded pixels (level exit); the size tables remain.
    pub fn free_all(&mut self) {
        for tex in self.walls.iter_mut().chain(self.flats.iter_mut()) {
            tex.pixels = Vec::new();
        }
    }

    // ------------------------------------------------------------------ //
    // Queries (render path: indices assumed valid)
    // ------------------------------------------------------------------ //

    pub fn wall(&self, num: u32) -> &Texture {
        &self.walls[num as usize]
    }

    pub fn flat(&self, num: u32) -> &Texture {
        &self.flats[num as usize]
    }

    /// Wall texture with the animation redirect applied.
    pub fn wall_anim(&self, num: u32) -> &Texture {
        self.wall(self.wall(num).anim_tex_num)
    }

    /// Flat texture with the animation redirect applied.
    pub fn flat_anim(&self, num: u32) -> &Texture {
        self.flat(self.flat(num).anim_tex_num)
    }

    /// Gameplay writes these to advance texture animations.
    pub fn set_wall_anim(&mut self, num: u32, anim_tex_num: u32) {
        debug_assert!((anim_tex_num as usize) < self.walls.len());
        self.walls[num as usize].anim_tex_num = anim_tex_num;
    }

    pub fn set_flat_anim(&mut self, num: u32, anim_tex_num: u32) {
        debug_assert!((anim_tex_num as usize) < self.flats.len());
        self.flats[num as usize].anim_tex_num = anim_tex_num;
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
