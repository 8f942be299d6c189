//! Cel image decoder.
//!
//! A Cel blob is a 60-byte control block prefix (CCB), an optional
//! palette (PLUT) at byte 60, and packed or raw pixel bits addressed by
//! the CCB's source pointer. Everything is big endian. Decoded output is
//! always a fresh ARGB1555 buffer owned by the image.

use bitflags::bitflags;
use thiserror::Error;

use crate::base::bits::BitStream;
use crate::base::stream::{ByteStream, StreamError};

/// CCB flag: pixel data is in the packed (run-length) format.
const CCB_FLAG_PACKED: u32 = 0x0000_0200;

/// CCB flag: pixel data is NOT color indexed.
const CCB_FLAG_LINEAR: u32 = 0x0000_0010;

/// OR-ed into decoded colors to force an opaque pixel.
const OPAQUE_PIXEL_BITS: u16 = 0x8000;

/// Byte offset of the PLUT within a Cel blob.
const PLUT_OFFSET: usize = 60;

/// Size of the full control block record.
const CCB_SIZE: usize = 68;

bitflags! {
    /// How a Cel resource is to be interpreted on load.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CelLoadFlags: u32 {
        /// Colors whose low 15 bits are zero become fully transparent.
        const MASKED = 0x0000_0001;
        /// Two 16-bit signed render offsets precede each image.
        const HAS_OFFSETS = 0x0000_0002;
    }
}

/// A decoded Cel image: ARGB1555 pixels plus optional render offsets.
#[derive(Clone, Debug, Default)]
pub struct CelImage {
    pub width: u16,
    pub height: u16,
    /// Offset applied to the image position when rendering.
    pub offset_x: i16,
    pub offset_y: i16,
    /// Row-major ARGB1555 pixels, `width * height` entries.
    pub pixels: Vec<u16>,
}

/// Errors from decoding a Cel blob. Recoverable at the load boundary:
/// the caller substitutes a placeholder or aborts the level load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CelError {
    #[error("cel data too small ({0} bytes)")]
    TooSmall(usize),

    #[error("invalid bits-per-pixel mode {0}")]
    BadBitsPerPixel(u8),

    #[error("non color-indexed cel images must be 16 bpp")]
    UnsupportedFormat,

    #[error("cel image has invalid dimensions")]
    BadDimensions,

    #[error("cel image data offset out of range")]
    BadImageDataOffset,

    #[error("packed cel row has a bad pixel count")]
    BadPackCount,

    #[error("cel image array offset out of range")]
    BadArrayOffset,

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// The CCB fields the decoder cares about.
struct ControlBlock {
    flags: u32,
    source_ptr: u32,
    pre0: u32,
    pre1: u32,
}

impl ControlBlock {
    fn parse(data: &[u8]) -> Result<Self, CelError> {
        let mut s = ByteStream::new(data);
        let flags = s.read_u32()?;
        s.skip(4)?; // next ptr
        let source_ptr = s.read_u32()?;
        s.skip(4 * 10)?; // plut ptr, x/y pos, h/v deltas, pixc
        let pre0 = s.read_u32()?;
        let pre1 = s.read_u32()?;
        Ok(Self {
            flags,
            source_ptr,
            pre0,
            pre1,
        })
    }

    /// The low 3 bits of `pre0` select the pixel format.
    fn bits_per_pixel(&self) -> Result<u8, CelError> {
        match self.pre0 & 0x07 {
            1 => Ok(1),
            2 => Ok(2),
            3 => Ok(4),
            4 => Ok(6),
            5 => Ok(8),
            6 => Ok(16),
            mode => Err(CelError::BadBitsPerPixel(mode as u8)),
        }
    }

    fn width(&self) -> u16 {
        ((self.pre1 & 0x7FF) + 1) as u16
    }

    fn height(&self) -> u16 {
        (((self.pre0 >> 6) & 0x3FF) + 1) as u16
    }

    fn is_packed(&self) -> bool {
        (self.flags & CCB_FLAG_PACKED) != 0
    }

    /// The linear flag sometimes lies for this game's resources: low
    /// bit depths are always indexed, 16 bpp never is.
    fn is_color_indexed(&self, bpp: u8) -> bool {
        if bpp < 8 {
            true
        } else if bpp >= 16 {
            false
        } else {
            (self.flags & CCB_FLAG_LINEAR) == 0
        }
    }
}

/// Palette access with the index masked to the table size.
struct Plut<'a> {
    entries: &'a [u8],
    mask: u16,
}

impl<'a> Plut<'a> {
    fn new(data: &'a [u8], bpp: u8) -> Result<Self, CelError> {
        let num_entries = if bpp >= 6 { 32 } else { 16 };
        let end = PLUT_OFFSET + num_entries * 2;
        if data.len() < end {
            return Err(CelError::TooSmall(data.len()));
        }
        Ok(Self {
            entries: &data[PLUT_OFFSET..end],
            mask: (num_entries - 1) as u16,
        })
    }

    #[inline]
    fn color(&self, idx: u16) -> u16 {
        let i = (idx & self.mask) as usize * 2;
        u16::from_be_bytes([self.entries[i], self.entries[i + 1]])
    }
}

/// Read one pixel from the bit stream, either as a palette index or as
/// a raw ARGB1555 value. Every pixel actually read is forced opaque;
/// only transparent run fills stay zero.
#[inline]
fn read_pixel(
    bits: &mut BitStream,
    plut: Option<&Plut>,
    bpp: u8,
) -> Result<u16, StreamError> {
    match plut {
        Some(plut) => {
            let idx = bits.read_bits(bpp)? as u16;
            Ok(plut.color(idx) | OPAQUE_PIXEL_BITS)
        }
        None => Ok(bits.read_bits(16)? as u16 | OPAQUE_PIXEL_BITS),
    }
}

/// Decode unpacked (raw) pixel data.
///
/// Most images pad each row to a 64-bit boundary, but a handful cannot
/// tolerate that padding. Apply the alignment only when the fully
/// aligned image still fits within the input.
fn decode_unpacked(
    image_data: &[u8],
    plut: Option<&Plut>,
    width: u16,
    height: u16,
    bpp: u8,
    out: &mut Vec<u16>,
) -> Result<(), CelError> {
    let row_bits = bpp as u32 * width as u32;
    let aligned_row_bytes = ((row_bits + 63) & !63) / 8;
    let do_align = (aligned_row_bytes as usize * height as usize) <= image_data.len();

    let mut bits = BitStream::new(image_data);
    for _y in 0..height {
        if do_align {
            bits.align64();
        }
        for _x in 0..width {
            out.push(read_pixel(&mut bits, plut, bpp)?);
        }
    }
    Ok(())
}

/// Run-length pack modes for rows of packed pixel data.
mod pack_mode {
    pub const END: u64 = 0;
    pub const LITERAL: u64 = 1;
    pub const TRANSPARENT: u64 = 2;
    pub const REPEAT: u64 = 3;
}

/// Decode packed (run-length) pixel data, row by row.
fn decode_packed(
    image_data: &[u8],
    plut: Option<&Plut>,
    width: u16,
    height: u16,
    bpp: u8,
    out: &mut Vec<u16>,
) -> Result<(), CelError> {
    let mut row_start = 0usize;

    for _y in 0..height {
        if row_start >= image_data.len() {
            return Err(StreamError::Exhausted.into());
        }
        let mut bits = BitStream::new(&image_data[row_start..]);

        // The first field of every row is the offset to the next row:
        // 16 bits for 8/16 bpp images, 8 bits otherwise, then +2 and *4
        // to get the final byte count (which is also this row's size).
        let raw_offset = if bpp >= 8 {
            bits.read_bits(16)? & 0x3FF
        } else {
            bits.read_bits(8)?
        };
        let row_size = ((raw_offset + 2) * 4) as usize;

        let row_base = out.len();
        out.resize(row_base + width as usize, 0);
        let mut x: u16 = 0;

        loop {
            let mode = bits.read_bits(2)?;

            if mode == pack_mode::END {
                // Remaining pixels stay transparent (zero filled above).
                break;
            }

            // Lowest possible count is 1, hence it is implicit.
            let count = bits.read_bits(6)? as u16 + 1;
            if count > width {
                return Err(CelError::BadPackCount);
            }
            let run_end = (x + count).min(width);

            match mode {
                pack_mode::LITERAL => {
                    while x < run_end {
                        out[row_base + x as usize] = read_pixel(&mut bits, plut, bpp)?;
                        x += 1;
                    }
                }
                pack_mode::TRANSPARENT => {
                    x = run_end;
                }
                _ => {
                    debug_assert_eq!(mode, pack_mode::REPEAT);
                    let color = read_pixel(&mut bits, plut, bpp)?;
                    while x < run_end {
                        out[row_base + x as usize] = color;
                        x += 1;
                    }
                }
            }

            if bits.cur_byte_index() >= row_size || x >= width {
                break;
            }
        }

        row_start += row_size;
    }
    Ok(())
}

/// Colors whose low 15 bits are zero become fully transparent; every
/// other pixel is forced opaque.
fn transform_masked_to_alpha(pixels: &mut [u16]) {
    for p in pixels.iter_mut() {
        *p = if (*p & 0x7FFF) == 0 {
            0
        } else {
            *p | OPAQUE_PIXEL_BITS
        };
    }
}

/// Decode one Cel image from the given blob.
pub fn load_cel_image(data: &[u8], load_flags: CelLoadFlags) -> Result<CelImage, CelError> {
    // Optional render offsets precede the actual Cel data.
    let (offset_x, offset_y, cel_data) = if load_flags.contains(CelLoadFlags::HAS_OFFSETS) {
        if data.len() <= 4 {
            return Err(CelError::TooSmall(data.len()));
        }
        let mut s = ByteStream::new(data);
        let ox = s.read_i16()?;
        let oy = s.read_i16()?;
        (ox, oy, &data[4..])
    } else {
        (0, 0, data)
    };

    if cel_data.len() <= CCB_SIZE {
        return Err(CelError::TooSmall(cel_data.len()));
    }

    let ccb = ControlBlock::parse(cel_data)?;
    let width = ccb.width();
    let height = ccb.height();
    if width == 0 || height == 0 {
        return Err(CelError::BadDimensions);
    }

    let bpp = ccb.bits_per_pixel()?;
    let indexed = ccb.is_color_indexed(bpp);
    if !indexed && bpp != 16 {
        return Err(CelError::UnsupportedFormat);
    }

    let plut = if indexed {
        Some(Plut::new(cel_data, bpp)?)
    } else {
        None
    };

    let image_data_offset = ccb.source_ptr as usize + 12;
    if image_data_offset >= cel_data.len() {
        return Err(CelError::BadImageDataOffset);
    }
    let image_data = &cel_data[image_data_offset..];

    let mut pixels = Vec::with_capacity(width as usize * height as usize);

    if ccb.is_packed() {
        decode_packed(image_data, plut.as_ref(), width, height, bpp, &mut pixels)?;
    } else {
        decode_unpacked(image_data, plut.as_ref(), width, height, bpp, &mut pixels)?;
    }

    if load_flags.contains(CelLoadFlags::MASKED) {
        transform_masked_to_alpha(&mut pixels);
    }

    Ok(CelImage {
        width,
        height,
        offset_x,
        offset_y,
        pixels,
    })
}

/// Decode an array of Cel images.
///
/// The data begins with a table of 32-bit big-endian offsets, one per
/// image; the first offset divided by 4 gives the image count.
pub fn load_cel_image_array(
    data: &[u8],
    load_flags: CelLoadFlags,
) -> Result<Vec<CelImage>, CelError> {
    if data.len() <= 4 {
        return Err(CelError::TooSmall(data.len()));
    }

    let mut s = ByteStream::new(data);
    let first_offset = s.read_u32()?;
    let num_images = (first_offset / 4) as usize;
    if num_images == 0 || data.len() <= num_images * 4 {
        return Err(CelError::BadArrayOffset);
    }

    let mut offsets = Vec::with_capacity(num_images);
    offsets.push(first_offset as usize);
    for _ in 1..num_images {
        offsets.push(s.read_u32()? as usize);
    }

    let mut images = Vec::with_capacity(num_images);
    for (i, &start) in offsets.iter().enumerate() {
        let end = if i + 1 < num_images {
            offsets[i + 1]
        } else {
            data.len()
        };
        if start >= data.len() || end > data.len() || start >= end {
            return Err(CelError::BadArrayOffset);
        }
        images.push(load_cel_image(&data[start..end], load_flags)?);
    }
    Ok(images)
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
