//! Actor sprite bank.
//!
//! A sprite resource is an array of frames; each frame either shares one
//! pixel block across all 8 view angles or carries 8 per-angle blocks.
//! Offsets into the resource encode two flags in their top bits:
//! rendered-flipped and has-rotations. Pixel blocks are Cel images in
//! column-major order, so the decoded width/height are swapped when
//! stored. Blocks shared between angles are decoded once.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::rez::archive::ResourceFile;
use crate::rez::cel::{self, CelError, CelLoadFlags};

pub const NUM_SPRITE_DIRECTIONS: usize = 8;

/// Offset flag: render this angle horizontally mirrored.
const SPR_OFFSET_FLAG_FLIP: u32 = 0x8000_0000;

/// Offset flag: 8 per-angle sub-offsets follow at the target.
const SPR_OFFSET_FLAG_ROTATED: u32 = 0x4000_0000;

const SPR_OFFSET_MASK: u32 = 0x3FFF_FFFF;

#[derive(Error, Debug)]
pub enum SpriteError {
    #[error("sprite resource {0} missing from archive")]
    NoSuchResource(u32),

    #[error("sprite resource {0} is truncated")]
    Truncated(u32),

    #[error("sprite resource {num} has an out-of-range offset {offset}")]
    BadOffset { num: u32, offset: u32 },

    #[error("sprite resource {num}: {source}")]
    Cel { num: u32, source: CelError },
}

/// One decoded pixel block, shared by any angles that reference it.
/// Pixels are column major: `pixels[x * height + y]`.
#[derive(Clone, Debug)]
pub struct SpriteImage {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u16>,
}

/// One view angle of a frame.
#[derive(Clone, Copy, Debug)]
pub struct SpriteFrameAngle {
    /// Index into the owning sprite's image list.
    pub image: u16,
    pub flipped: bool,
    /// Pivot: pixels to the left of / above the actor position.
    pub left_offset: i16,
    pub top_offset: i16,
}

#[derive(Clone, Debug)]
pub struct SpriteFrame {
    pub angles: [SpriteFrameAngle; NUM_SPRITE_DIRECTIONS],
}

pub struct Sprite {
    pub resource_num: u32,
    pub frames: Vec<SpriteFrame>,
    pub images: Vec<SpriteImage>,
}

impl Sprite {
    pub fn image(&self, angle: &SpriteFrameAngle) -> &SpriteImage {
        &self.images[angle.image as usize]
    }
}

/// All actor sprites, indexed by resource number. Entries load on first
/// use and are cleared between levels.
pub struct SpriteBank {
    first_rez: u32,
    sprites: Vec<Option<Sprite>>,
}

impl SpriteBank {
    pub fn new(first_rez: u32, count: u32) -> Self {
        Self {
            first_rez,
            sprites: (0..count).map(|_| None).collect(),
        }
    }

    fn slot(&self, resource_num: u32) -> Option<usize> {
        resource_num
            .checked_sub(self.first_rez)
            .map(|i| i as usize)
            .filter(|&i| i < self.sprites.len())
    }

    /// Borrow a sprite if it is resident.
    pub fn get(&self, resource_num: u32) -> Option<&Sprite> {
        self.slot(resource_num)
            .and_then(|i| self.sprites[i].as_ref())
    }

    /// Load (or fetch the already loaded) sprite for a resource.
    pub fn load(&mut self, rez: &ResourceFile, resource_num: u32) -> Result<&Sprite, SpriteError> {
        let slot = self
            .slot(resource_num)
            .ok_or(SpriteError::NoSuchResource(resource_num))?;
        if self.sprites[slot].is_none() {
            let data = rez
                .data(resource_num)
                .ok_or(SpriteError::NoSuchResource(resource_num))?;
            self.sprites[slot] = Some(decode_sprite(resource_num, data)?);
        }
        Ok(self.sprites[slot].as_ref().unwrap())
    }

    pub fn free(&mut self, resource_num: u32) {
        if let Some(i) = self.slot(resource_num) {
            self.sprites[i] = None;
        }
    }

    pub fn free_all(&mut self) {
        for s in self.sprites.iter_mut() {
            *s = None;
        }
    }
}

fn read_u32(num: u32, data: &[u8], offset: usize) -> Result<u32, SpriteError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
        .ok_or(SpriteError::Truncated(num))
}

fn read_i16(num: u32, data: &[u8], offset: usize) -> Result<i16, SpriteError> {
    data.get(offset..offset + 2)
        .map(|b| i16::from_be_bytes(b.try_into().unwrap()))
        .ok_or(SpriteError::Truncated(num))
}

/// Angle descriptor before images are decoded: which pixel block offset
/// it wants plus its render attributes.
#[derive(Clone, Copy)]
struct PendingAngle {
    image_offset: u32,
    flipped: bool,
    left_offset: i16,
    top_offset: i16,
}

fn read_pending_angle(
    num: u32,
    data: &[u8],
    offset_with_flags: u32,
) -> Result<PendingAngle, SpriteError> {
    let offset = offset_with_flags & SPR_OFFSET_MASK;
    if offset as usize + 4 > data.len() {
        return Err(SpriteError::BadOffset { num, offset });
    }
    Ok(PendingAngle {
        // The pixel block follows the two 16-bit pivot offsets.
        image_offset: offset + 4,
        flipped: (offset_with_flags & SPR_OFFSET_FLAG_FLIP) != 0,
        left_offset: read_i16(num, data, offset as usize)?,
        top_offset: read_i16(num, data, offset as usize + 2)?,
    })
}

fn decode_sprite(num: u32, data: &[u8]) -> Result<Sprite, SpriteError> {
    // The offset of the first frame tells the size of the offset table
    // and therefore the frame count.
    let first_offset = read_u32(num, data, 0)?;
    let num_frames = ((first_offset & SPR_OFFSET_MASK) / 4) as usize;
    if num_frames == 0 || num_frames * 4 > data.len() {
        return Err(SpriteError::Truncated(num));
    }

    // Gather every angle of every frame, noting which image offsets are
    // actually distinct.
    let mut pending: Vec<[PendingAngle; NUM_SPRITE_DIRECTIONS]> = Vec::with_capacity(num_frames);
    let mut wanted_offsets: BTreeMap<u32, u16> = BTreeMap::new();

    for frame_idx in 0..num_frames {
        let frame_offset_with_flags = read_u32(num, data, frame_idx * 4)?;
        let frame_offset = frame_offset_with_flags & SPR_OFFSET_MASK;

        let angles = if frame_offset_with_flags & SPR_OFFSET_FLAG_ROTATED != 0 {
            // Eight per-angle sub-offsets, relative to the frame offset.
            let mut angles = [PendingAngle {
                image_offset: 0,
                flipped: false,
                left_offset: 0,
                top_offset: 0,
            }; NUM_SPRITE_DIRECTIONS];
            for (i, slot) in angles.iter_mut().enumerate() {
                let sub = read_u32(num, data, frame_offset as usize + i * 4)?;
                *slot = read_pending_angle(num, data, frame_offset.wrapping_add(sub))?;
            }
            angles
        } else {
            // One pixel block shared by all 8 angles.
            let angle = read_pending_angle(num, data, frame_offset_with_flags)?;
            [angle; NUM_SPRITE_DIRECTIONS]
        };

        for a in &angles {
            wanted_offsets.entry(a.image_offset).or_insert(0);
        }
        pending.push(angles);
    }

    // Decode each unique pixel block once. The block's extent runs to
    // the next block's offset (or the end of the resource).
    let offsets: Vec<u32> = wanted_offsets.keys().copied().collect();
    let mut images = Vec::with_capacity(offsets.len());

    for (i, &start) in offsets.iter().enumerate() {
        let end = if i + 1 < offsets.len() {
            offsets[i + 1] as usize
        } else {
            data.len()
        };
        if start as usize >= end || end > data.len() {
            return Err(SpriteError::BadOffset { num, offset: start });
        }

        let img = cel::load_cel_image(&data[start as usize..end], CelLoadFlags::empty())
            .map_err(|source| SpriteError::Cel { num, source })?;

        // Cel pixel blocks for sprites are column major: the decoded
        // "width" is the column height. Swap on store.
        *wanted_offsets.get_mut(&start).unwrap() = images.len() as u16;
        images.push(SpriteImage {
            width: img.height,
            height: img.width,
            pixels: img.pixels,
        });
    }

    // Resolve the pending angles to image indices.
    let frames = pending
        .into_iter()
        .map(|angles| SpriteFrame {
            angles: angles.map(|a| SpriteFrameAngle {
                image: wanted_offsets[&a.image_offset],
                flipped: a.flipped,
                left_offset: a.left_offset,
                top_offset: a.top_offset,
            }),
        })
        .collect();

    Ok(Sprite {
        resource_num: num,
        frames,
        images,
    })
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
