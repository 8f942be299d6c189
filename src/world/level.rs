//! Map lump loading.
//!
//! Each map owns nine consecutive resources in a fixed order. Every
//! lump starts with a big-endian entity count followed by packed
//! records (all multi-byte fields big endian, fixed point where
//! appropriate), which are decoded into raw on-disk structs with
//! **bincode 2** and then converted to the runtime tables.

use bincode::{Decode, config, decode_from_slice};
use glam::vec2;
use thiserror::Error;

use crate::base::angle::ANGLE_TO_FINE_SHIFT;
use crate::base::fixed::fixed_to_float;
use crate::base::stream::{ByteStream, StreamError};
use crate::rez::archive::ResourceFile;
use crate::world::geometry::{
    BOX_BOTTOM, BOX_LEFT, BOX_RIGHT, BOX_TOP, BlockMap, BspChild, Level, Line, LineFlags, Node,
    Sector, Seg, Side, SlopeType, SubSector, Vertex,
};

/// Offsets of the per-map lumps from the map's first resource number.
#[derive(Clone, Copy, Debug)]
#[repr(u32)]
pub enum MapLump {
    Vertexes = 0,
    Sectors = 1,
    SideDefs = 2,
    LineDefs = 3,
    Segs = 4,
    SubSectors = 5,
    Nodes = 6,
    Reject = 7,
    BlockMap = 8,
}

/// Node children carry this bit when the child is a subsector index.
const NF_SUBSECTOR: u32 = 0x8000;

/// Fake contrast bounds for the per-seg light multiplier.
const CONTRAST_MIN_LIGHT_MUL: f32 = 0.75;
const CONTRAST_MAX_LIGHT_MUL: f32 = 1.05;

#[derive(Error, Debug)]
pub enum LevelError {
    #[error("map lump resource {0} missing from archive")]
    NoSuchResource(u32),

    #[error("{lump} lump too small for its entity count")]
    ShortLump { lump: &'static str },

    #[error("{lump} lump element {elem}: {source}")]
    BadElement {
        lump: &'static str,
        elem: usize,
        source: bincode::error::DecodeError,
    },

    #[error("{lump} lump references out-of-range index {index}")]
    BadIndex { lump: &'static str, index: u32 },

    #[error("seg {0} references the missing side of its line")]
    MissingSide(usize),

    #[error("blockmap offset {0} out of range")]
    BadBlockMapOffset(u32),

    #[error("reject matrix too small: {size} bytes for {sectors} sectors")]
    BadRejectSize { size: usize, sectors: usize },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/*====================================================================*/
/*                     On-disk record layouts                         */
/*====================================================================*/

#[derive(Decode)]
struct RawVertex {
    x: i32,
    y: i32,
}

#[derive(Decode)]
struct RawSector {
    floor_h: i32,
    ceil_h: i32,
    floor_pic: u32,
    ceiling_pic: u32,
    light_level: u32,
    special: u32,
    tag: u32,
}

#[derive(Decode)]
struct RawSide {
    tex_x_offset: i32,
    tex_y_offset: i32,
    top_texture: u32,
    bottom_texture: u32,
    mid_texture: u32,
    sector: u32,
}

#[derive(Decode)]
struct RawLine {
    v1: u32,
    v2: u32,
    flags: u32,
    special: u32,
    tag: u32,
    sides: [u32; 2],
}

#[derive(Decode)]
struct RawSeg {
    v1: u32,
    v2: u32,
    angle: u32,
    tex_x_offset: i32,
    line: u32,
    side: u32,
}

#[derive(Decode)]
struct RawSubSector {
    num_segs: u32,
    first_seg: u32,
}

#[derive(Decode)]
struct RawNode {
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
    bbox: [[i32; 4]; 2],
    children: [u32; 2],
}

/// Decode a count-prefixed lump into raw records.
fn lump_records<T: Decode<()>>(
    rez: &ResourceFile,
    num: u32,
    lump: &'static str,
) -> Result<Vec<T>, LevelError> {
    let data = rez.data(num).ok_or(LevelError::NoSuchResource(num))?;
    if data.len() < 4 {
        return Err(LevelError::ShortLump { lump });
    }
    let count = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;

    let cfg = config::standard()
        .with_big_endian()
        .with_fixed_int_encoding();

    let mut out = Vec::with_capacity(count);
    let mut slice = &data[4..];
    for elem in 0..count {
        let (val, read) = decode_from_slice::<T, _>(slice, cfg)
            .map_err(|source| LevelError::BadElement { lump, elem, source })?;
        out.push(val);
        slice = &slice[read..];
    }
    Ok(out)
}

/*====================================================================*/
/*                       Raw -> runtime tables                        */
/*====================================================================*/

fn build_lines(
    raw: Vec<RawLine>,
    vertices: &[Vertex],
    sides: &[Side],
) -> Result<Vec<Line>, LevelError> {
    let vertex = |idx: u32| -> Result<Vertex, LevelError> {
        vertices
            .get(idx as usize)
            .copied()
            .ok_or(LevelError::BadIndex {
                lump: "linedefs",
                index: idx,
            })
    };

    raw.into_iter()
        .map(|r| {
            let v1 = vertex(r.v1)?;
            let v2 = vertex(r.v2)?;
            let dx = v2.x - v1.x;
            let dy = v2.y - v1.y;

            let slope = if dx == 0 {
                SlopeType::Vertical
            } else if dy == 0 {
                SlopeType::Horizontal
            } else if (dx ^ dy) >= 0 {
                SlopeType::Positive
            } else {
                SlopeType::Negative
            };

            let mut bbox = [0; 4];
            if dx >= 0 {
                bbox[BOX_LEFT] = v1.x;
                bbox[BOX_RIGHT] = v2.x;
            } else {
                bbox[BOX_LEFT] = v2.x;
                bbox[BOX_RIGHT] = v1.x;
            }
            if dy >= 0 {
                bbox[BOX_BOTTOM] = v1.y;
                bbox[BOX_TOP] = v2.y;
            } else {
                bbox[BOX_BOTTOM] = v2.y;
                bbox[BOX_TOP] = v1.y;
            }

            // All lines have a front side; the back is optional.
            let side_idx = |idx: u32| -> Result<Option<u16>, LevelError> {
                if idx == u32::MAX {
                    return Ok(None);
                }
                if idx as usize >= sides.len() {
                    return Err(LevelError::BadIndex {
                        lump: "linedefs",
                        index: idx,
                    });
                }
                Ok(Some(idx as u16))
            };
            let front = side_idx(r.sides[0])?.ok_or(LevelError::BadIndex {
                lump: "linedefs",
                index: u32::MAX,
            })?;
            let back = side_idx(r.sides[1])?;

            Ok(Line {
                v1,
                v2,
                v1f: vec2(fixed_to_float(v1.x), fixed_to_float(v1.y)),
                v2f: vec2(fixed_to_float(v2.x), fixed_to_float(v2.y)),
                flags: LineFlags::from_bits_truncate(r.flags),
                special: r.special,
                tag: r.tag,
                sides: [Some(front), back],
                bbox,
                slope,
                front_sector: sides[front as usize].sector,
                back_sector: back.map(|b| sides[b as usize].sector),
                fine_angle: 0,
            })
        })
        .collect()
}

fn build_segs(
    raw: Vec<RawSeg>,
    vertices: &[Vertex],
    lines: &mut [Line],
    sides: &[Side],
) -> Result<Vec<Seg>, LevelError> {
    raw.into_iter()
        .enumerate()
        .map(|(i, r)| {
            let vertex = |idx: u32| -> Result<Vertex, LevelError> {
                vertices
                    .get(idx as usize)
                    .copied()
                    .ok_or(LevelError::BadIndex {
                        lump: "segs",
                        index: idx,
                    })
            };
            let v1 = vertex(r.v1)?;
            let v2 = vertex(r.v2)?;

            let line = lines
                .get_mut(r.line as usize)
                .ok_or(LevelError::BadIndex {
                    lump: "segs",
                    index: r.line,
                })?;
            let line_side = (r.side & 1) as u8;
            let side = line.sides[line_side as usize].ok_or(LevelError::MissingSide(i))?;

            let front_sector = sides[side as usize].sector;
            let back_sector = if line.flags.contains(LineFlags::TWO_SIDED) {
                line.sides[(line_side ^ 1) as usize].map(|s| sides[s as usize].sector)
            } else {
                None
            };

            // The line remembers the fine angle of the seg that starts
            // at its first vertex (used for sliding movement).
            if line.v1 == v1 {
                line.fine_angle = r.angle >> ANGLE_TO_FINE_SHIFT;
            }

            Ok(Seg {
                v1: vec2(fixed_to_float(v1.x), fixed_to_float(v1.y)),
                v2: vec2(fixed_to_float(v2.x), fixed_to_float(v2.y)),
                angle: r.angle,
                tex_x_offset: fixed_to_float(r.tex_x_offset),
                side,
                line: r.line as u16,
                line_side,
                front_sector,
                back_sector,
                light_mul: 1.0,
            })
        })
        .collect()
}

fn build_subsectors(raw: Vec<RawSubSector>, segs: &[Seg], sides: &[Side]) -> Result<Vec<SubSector>, LevelError> {
    raw.into_iter()
        .map(|r| {
            let first = segs.get(r.first_seg as usize).ok_or(LevelError::BadIndex {
                lump: "subsectors",
                index: r.first_seg,
            })?;
            if (r.first_seg + r.num_segs) as usize > segs.len() {
                return Err(LevelError::BadIndex {
                    lump: "subsectors",
                    index: r.first_seg + r.num_segs,
                });
            }
            Ok(SubSector {
                sector: sides[first.side as usize].sector,
                first_seg: r.first_seg,
                num_segs: r.num_segs,
            })
        })
        .collect()
}

fn build_nodes(raw: Vec<RawNode>, num_subsectors: usize) -> Result<Vec<Node>, LevelError> {
    let num_nodes = raw.len();
    raw.into_iter()
        .map(|r| {
            let child = |c: u32| -> Result<BspChild, LevelError> {
                if c & NF_SUBSECTOR != 0 {
                    let ss = c & !NF_SUBSECTOR;
                    if ss as usize >= num_subsectors {
                        return Err(LevelError::BadIndex {
                            lump: "nodes",
                            index: c,
                        });
                    }
                    Ok(BspChild::SubSector(ss))
                } else {
                    if c as usize >= num_nodes {
                        return Err(LevelError::BadIndex {
                            lump: "nodes",
                            index: c,
                        });
                    }
                    Ok(BspChild::Node(c))
                }
            };
            Ok(Node {
                x: r.x,
                y: r.y,
                dx: r.dx,
                dy: r.dy,
                bbox: r.bbox,
                children: [child(r.children[0])?, child(r.children[1])?],
            })
        })
        .collect()
}

/// Blockmap: `{originX, originY, width, height}` header, then
/// `width*height` offsets (bytes into this lump), then line-index lists
/// each terminated by `u32::MAX`.
fn load_blockmap(rez: &ResourceFile, num: u32, num_lines: usize) -> Result<BlockMap, LevelError> {
    let data = rez.data(num).ok_or(LevelError::NoSuchResource(num))?;
    let mut s = ByteStream::new(data);

    let origin_x = s.read_i32()?;
    let origin_y = s.read_i32()?;
    let width = s.read_u32()?;
    let height = s.read_u32()?;

    let num_blocks = width as usize * height as usize;
    let mut block_lines = Vec::with_capacity(num_blocks);

    for _ in 0..num_blocks {
        let byte_offset = s.read_u32()?;
        if byte_offset % 4 != 0 || byte_offset as usize >= data.len() {
            return Err(LevelError::BadBlockMapOffset(byte_offset));
        }

        let mut list = ByteStream::new(&data[byte_offset as usize..]);
        let mut lines = Vec::new();
        loop {
            let line_num = list.read_u32().map_err(|_| LevelError::BadBlockMapOffset(byte_offset))?;
            if line_num == u32::MAX {
                break;
            }
            if line_num as usize >= num_lines {
                return Err(LevelError::BadIndex {
                    lump: "blockmap",
                    index: line_num,
                });
            }
            lines.push(line_num as u16);
        }
        block_lines.push(lines);
    }

    Ok(BlockMap {
        origin_x,
        origin_y,
        width,
        height,
        block_lines,
    })
}

/// Per-seg light multiplier ("fake contrast"): north/south walls render
/// slightly darker than east/west ones so corners read.
fn calc_seg_light_multipliers(segs: &mut [Seg], fake_contrast: bool) {
    if !fake_contrast {
        for seg in segs.iter_mut() {
            seg.light_mul = 1.0;
        }
        return;
    }

    for seg in segs.iter_mut() {
        let dir = seg.v2 - seg.v1;
        let seg_angle = dir.y.atan2(dir.x) + std::f32::consts::FRAC_PI_2;
        let t = seg_angle.cos().abs();
        seg.light_mul = CONTRAST_MIN_LIGHT_MUL * t + CONTRAST_MAX_LIGHT_MUL * (1.0 - t);
    }
}

/*====================================================================*/
/*                           Public entry                             */
/*====================================================================*/

/// Load one map from its nine lump resources starting at `map_start`.
///
/// Entity order matters: later lumps reference earlier ones by index,
/// and every cross reference is validated here so the renderer can
/// assume a well-formed level.
pub fn load_level(
    rez: &ResourceFile,
    map_start: u32,
    fake_contrast: bool,
) -> Result<Level, LevelError> {
    let lump = |l: MapLump| map_start + l as u32;

    let vertices: Vec<Vertex> = lump_records::<RawVertex>(rez, lump(MapLump::Vertexes), "vertexes")?
        .into_iter()
        .map(|r| Vertex { x: r.x, y: r.y })
        .collect();

    let sectors: Vec<Sector> = lump_records::<RawSector>(rez, lump(MapLump::Sectors), "sectors")?
        .into_iter()
        .map(|r| Sector {
            floor_h: r.floor_h,
            ceil_h: r.ceil_h,
            floor_pic: r.floor_pic,
            ceiling_pic: r.ceiling_pic,
            light_level: r.light_level.min(255),
            special: r.special,
            tag: r.tag,
        })
        .collect();

    let sides: Vec<Side> = lump_records::<RawSide>(rez, lump(MapLump::SideDefs), "sidedefs")?
        .into_iter()
        .map(|r| {
            if r.sector as usize >= sectors.len() {
                return Err(LevelError::BadIndex {
                    lump: "sidedefs",
                    index: r.sector,
                });
            }
            Ok(Side {
                tex_x_offset: fixed_to_float(r.tex_x_offset),
                tex_y_offset: fixed_to_float(r.tex_y_offset),
                top_texture: r.top_texture,
                bottom_texture: r.bottom_texture,
                mid_texture: r.mid_texture,
                sector: r.sector as u16,
            })
        })
        .collect::<Result<_, _>>()?;

    let mut lines = build_lines(
        lump_records::<RawLine>(rez, lump(MapLump::LineDefs), "linedefs")?,
        &vertices,
        &sides,
    )?;

    let mut segs = build_segs(
        lump_records::<RawSeg>(rez, lump(MapLump::Segs), "segs")?,
        &vertices,
        &mut lines,
        &sides,
    )?;
    calc_seg_light_multipliers(&mut segs, fake_contrast);

    let subsectors = build_subsectors(
        lump_records::<RawSubSector>(rez, lump(MapLump::SubSectors), "subsectors")?,
        &segs,
        &sides,
    )?;

    let nodes = build_nodes(
        lump_records::<RawNode>(rez, lump(MapLump::Nodes), "nodes")?,
        subsectors.len(),
    )?;

    let reject = rez
        .data(lump(MapLump::Reject))
        .ok_or(LevelError::NoSuchResource(lump(MapLump::Reject)))?
        .to_vec();
    let needed = sectors.len() * sectors.len();
    if reject.len() * 8 < needed {
        return Err(LevelError::BadRejectSize {
            size: reject.len(),
            sectors: sectors.len(),
        });
    }

    let blockmap = load_blockmap(rez, lump(MapLump::BlockMap), lines.len())?;

    let num_sectors = sectors.len();
    Ok(Level {
        vertices,
        sectors,
        sides,
        lines,
        segs,
        subsectors,
        nodes,
        reject,
        blockmap,
        things: Vec::new(),
        sector_things: vec![Vec::new(); num_sectors],
    })
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::fixed::int_to_fixed;

    /// Serialize a count-prefixed lump of big-endian u32/i32 words.
    fn lump(words: &[&[u32]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(&(words.len() as u32).to_be_bytes());
        for record in words {
            for &w in *record {
                out.extend(&w.to_be_bytes());
            }
        }
        out
    }

    fn fx(v: i32) -> u32 {
        int_to_fixed(v) as u32
    }

    /// One square sector: 4 vertices, 1 sector, 1 side, 1 line, 1 seg,
    /// 1 subsector, 1 node, 1-byte reject, 1x1 blockmap.
    fn build_map_archive() -> crate::rez::archive::ResourceFile {
        let vertexes = lump(&[
            &[fx(0), fx(0)],
            &[fx(128), fx(0)],
            &[fx(128), fx(128)],
            &[fx(0), fx(128)],
        ]);
        let sectors = lump(&[&[fx(0), fx(72), 2, 1000, 160, 0, 0]]);
        let sidedefs = lump(&[&[fx(16), fx(0), 4, 5, 6, 0]]);
        let linedefs = lump(&[&[0, 1, 0x0001, 0, 0, 0, u32::MAX]]);
        let segs = lump(&[&[0, 1, 0, fx(8), 0, 0]]);
        let subsectors = lump(&[&[1, 0]]);
        let nodes = lump(&[&[
            fx(64),
            fx(0),
            fx(0),
            fx(1),
            // bbox child 0 then child 1: top, bottom, left, right
            fx(128),
            fx(0),
            fx(0),
            fx(128),
            fx(128),
            fx(0),
            fx(0),
            fx(128),
            NF_SUBSECTOR, // child 0 = subsector 0
            NF_SUBSECTOR,
        ]]);
        let reject = vec![0u8];
        // Blockmap: header (4 u32) + 1 offset + list [0, MAX].
        let mut blockmap = Vec::new();
        blockmap.extend(&fx(0).to_be_bytes());
        blockmap.extend(&fx(0).to_be_bytes());
        blockmap.extend(&1u32.to_be_bytes());
        blockmap.extend(&1u32.to_be_bytes());
        blockmap.extend(&20u32.to_be_bytes()); // list right after this word
        blockmap.extend(&0u32.to_be_bytes());
        blockmap.extend(&u32::MAX.to_be_bytes());

        let lumps: Vec<Vec<u8>> = vec![
            vertexes, sectors, sidedefs, linedefs, segs, subsectors, nodes, reject, blockmap,
        ];

        // Wrap the lumps in a resource archive starting at number 100.
        let mut out = Vec::<u8>::new();
        out.extend_from_slice(b"BRGR");
        out.extend(&1u32.to_be_bytes());
        let headers_size = (12 + 12 * lumps.len()) as u32;
        out.extend(&headers_size.to_be_bytes());
        out.extend(&1u32.to_be_bytes()); // group type
        out.extend(&100u32.to_be_bytes()); // start num
        out.extend(&(lumps.len() as u32).to_be_bytes());

        let mut offset = 12 + headers_size;
        for l in &lumps {
            out.extend(&offset.to_be_bytes());
            out.extend(&(l.len() as u32).to_be_bytes());
            out.extend(&0u32.to_be_bytes());
            offset += l.len() as u32;
        }
        for l in &lumps {
            out.extend(l);
        }
        crate::rez::archive::ResourceFile::from_bytes(out).unwrap()
    }

    #[test]
    fn loads_and_links_a_tiny_map() {
        let rez = build_map_archive();
        let level = load_level(&rez, 100, true).unwrap();

        assert_eq!(level.vertices.len(), 4);
        assert_eq!(level.sectors.len(), 1);
        assert_eq!(level.lines.len(), 1);

        let line = &level.lines[0];
        assert_eq!(line.front_sector, 0);
        assert!(line.back_sector.is_none());
        assert_eq!(line.slope, SlopeType::Horizontal);
        assert_eq!(line.bbox[BOX_LEFT], int_to_fixed(0));
        assert_eq!(line.bbox[BOX_RIGHT], int_to_fixed(128));

        let seg = &level.segs[0];
        assert_eq!(seg.front_sector, 0);
        assert!(seg.back_sector.is_none());
        assert!((seg.tex_x_offset - 8.0).abs() < 1e-6);

        assert_eq!(level.subsectors[0].sector, 0);
        assert_eq!(
            level.nodes[0].children[0],
            BspChild::SubSector(0)
        );

        assert_eq!(level.blockmap.width, 1);
        assert_eq!(level.blockmap.block_lines[0], vec![0]);
    }

    #[test]
    fn single_sided_line_has_no_backsector() {
        let rez = build_map_archive();
        let level = load_level(&rez, 100, true).unwrap();
        // Line flag 0x0001 is BLOCKING, not TWO_SIDED.
        assert!(!level.lines[0].flags.contains(LineFlags::TWO_SIDED));
        assert!(level.lines[0].back_sector.is_none());
    }

    #[test]
    fn fake_contrast_east_west_wall() {
        let rez = build_map_archive();
        // The single seg runs due east: brightest multiplier.
        let bright = load_level(&rez, 100, true).unwrap();
        assert!((bright.segs[0].light_mul - CONTRAST_MAX_LIGHT_MUL).abs() < 1e-3);

        let flat = load_level(&rez, 100, false).unwrap();
        assert_eq!(flat.segs[0].light_mul, 1.0);
    }

    #[test]
    fn missing_lump_is_an_error() {
        let rez = build_map_archive();
        assert!(matches!(
            load_level(&rez, 90, true),
            Err(LevelError::NoSuchResource(_))
        ));
    }
}
