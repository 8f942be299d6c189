//! Game resource archive loader.
//!
//! The archive is one monolithic file: a 12-byte header, a block of
//! group + resource headers, then raw payloads addressed by offset.
//! Resources are identified by number; the table is sorted once at load
//! so every lookup is a binary search.
//!
//! The whole file is read into memory so resource requests are just
//! slice operations.

use byteorder::{BigEndian as BE, ReadBytesExt};
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};
use thiserror::Error;

/// Size of one `{type, startNum, count}` group header on disk.
const GROUP_HEADER_SIZE: usize = 12;

/// Size of one `{offset, size, unused}` resource header on disk.
const RESOURCE_HEADER_SIZE: usize = 12;

/// The upper two bits of a resource offset are reserved (a fixed-handle
/// marker and a spare); everything masks them off.
const OFFSET_MASK: u32 = 0x3FFF_FFFF;

/// One entry in the resource table.
#[derive(Clone, Debug)]
pub struct Resource {
    /// Unique resource number (lookup key).
    pub number: u32,
    /// Type tag from the owning group header.
    pub type_id: u32,
    /// Byte offset of the payload within the archive.
    pub offset: u32,
    /// Payload size in bytes.
    pub size: u32,
}

/// Entire resource archive resident in memory.
#[derive(Debug)]
pub struct ResourceFile {
    /// Resource table, sorted by number.
    resources: Vec<Resource>,
    /// Raw file contents.
    bytes: Vec<u8>,
    /// One past the highest valid resource number.
    end_resource_num: u32,
}

/// Errors encountered while opening/parsing the archive.
///
/// All of these are fatal at startup: there is no recovery path from a
/// corrupt resource file.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a game resource file (bad magic)")]
    BadMagic,

    #[error("corrupt resource file: empty or oversize header block")]
    BadHeader,

    #[error("corrupt resource file: resource {number} slice {offset}+{size} past EOF ({file_size})")]
    BadOffset {
        number: u32,
        offset: u32,
        size: u32,
        file_size: usize,
    },
}

impl ResourceFile {
    // ------------------------------------------------------------------ //
    // Loading
    // ------------------------------------------------------------------ //

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        let mut cur = &bytes[..];

        /*----------- 1. read and validate header ------------------------*/
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        if &magic != b"BRGR" {
            return Err(ArchiveError::BadMagic);
        }

        let num_groups = cur.read_u32::<BE>()?;
        let headers_size = cur.read_u32::<BE>()? as usize;

        if num_groups == 0 || headers_size == 0 || 12 + headers_size > bytes.len() {
            return Err(ArchiveError::BadHeader);
        }

        /*----------- 2. parse group and resource headers ----------------*/
        let mut headers = &bytes[12..12 + headers_size];
        let mut resources = Vec::with_capacity(num_groups as usize * 4);
        let mut end_resource_num = 0u32;

        while headers.len() >= GROUP_HEADER_SIZE {
            let type_id = headers.read_u32::<BE>()?;
            let start_num = headers.read_u32::<BE>()?;
            let count = headers.read_u32::<BE>()?;

            end_resource_num = end_resource_num.max(start_num + count);

            for i in 0..count {
                if headers.len() < RESOURCE_HEADER_SIZE {
                    return Err(ArchiveError::BadHeader);
                }
                let offset = headers.read_u32::<BE>()? & OFFSET_MASK;
                let size = headers.read_u32::<BE>()?;
                let _unused = headers.read_u32::<BE>()?;

                resources.push(Resource {
                    number: start_num + i,
                    type_id,
                    offset,
                    size,
                });
            }
        }

        /*----------- 3. validate payload slices -------------------------*/
        // Payloads are laid out in header order, so offsets must never
        // run backwards; a scrambled table is corruption even when every
        // slice happens to stay in bounds.
        let mut prev_offset = 0u32;
        for r in &resources {
            let end = r.offset as usize + r.size as usize;
            if end > bytes.len() || r.offset < prev_offset {
                return Err(ArchiveError::BadOffset {
                    number: r.number,
                    offset: r.offset,
                    size: r.size,
                    file_size: bytes.len(),
                });
            }
            prev_offset = r.offset;
        }

        /*----------- 4. sort for binary search --------------------------*/
        resources.sort_by_key(|r| r.number);

        Ok(Self {
            resources,
            bytes,
            end_resource_num,
        })
    }

    // ------------------------------------------------------------------ //
    // Lookup
    // ------------------------------------------------------------------ //

    /// One past the highest valid resource number.
    pub fn end_resource_num(&self) -> u32 {
        self.end_resource_num
    }

    /// Look up a resource header by number.
    pub fn resource(&self, number: u32) -> Option<&Resource> {
        self.resources
            .binary_search_by_key(&number, |r| r.number)
            .ok()
            .map(|i| &self.resources[i])
    }

    /// Borrow the payload bytes of a resource, or `None` for an unknown
    /// number. The archive stays resident, so this is always available;
    /// callers that "free" a resource simply drop the borrow.
    pub fn data(&self, number: u32) -> Option<&[u8]> {
        self.resource(number)
            .map(|r| &self.bytes[r.offset as usize..(r.offset + r.size) as usize])
    }

    /// Statement of intent to discard a resource's data. The archive
    /// keeps the whole file resident, so there is nothing to free; the
    /// caller's borrow simply ends.
    pub fn release(&self, _number: u32) {}

    /// Expose the sorted table (mostly for diagnostics/tests).
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-craft an archive: header + one group of three resources with
    /// 4-byte payloads, numbered 10, 20 is absent (group is contiguous),
    /// so use three groups to get sparse numbers 10/20/30.
    fn build_archive() -> Vec<u8> {
        let mut out = Vec::<u8>::new();
        out.extend_from_slice(b"BRGR");
        out.extend(&3u32.to_be_bytes()); // numGroups
        let headers_size = 3 * (12 + 12) as u32; // 3 groups x (group hdr + 1 rez hdr)
        out.extend(&headers_size.to_be_bytes());

        let payload_base = 12 + headers_size;
        for (i, num) in [10u32, 20, 30].iter().enumerate() {
            out.extend(&7u32.to_be_bytes()); // type
            out.extend(&num.to_be_bytes()); // startNum
            out.extend(&1u32.to_be_bytes()); // count
            // Set a reserved high bit on the offset; the loader must mask it.
            let offset = (payload_base + 4 * i as u32) | 0x8000_0000;
            out.extend(&offset.to_be_bytes());
            out.extend(&4u32.to_be_bytes()); // size
            out.extend(&0u32.to_be_bytes()); // unused
        }
        for num in [10u32, 20, 30] {
            out.extend(&num.to_be_bytes()); // payload = its own number
        }
        out
    }

    #[test]
    fn parses_and_sorts_table() {
        let rez = ResourceFile::from_bytes(build_archive()).unwrap();
        let nums: Vec<u32> = rez.resources().iter().map(|r| r.number).collect();
        assert_eq!(nums, vec![10, 20, 30]);
        assert!(nums.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rez.end_resource_num(), 31);
    }

    #[test]
    fn binary_search_lookup() {
        let rez = ResourceFile::from_bytes(build_archive()).unwrap();
        assert_eq!(rez.resource(20).unwrap().number, 20);
        assert!(rez.resource(25).is_none());
        assert!(rez.resource(9).is_none());
        assert!(rez.resource(31).is_none());
    }

    #[test]
    fn payload_bytes_and_offset_mask() {
        let rez = ResourceFile::from_bytes(build_archive()).unwrap();
        assert_eq!(rez.data(30).unwrap(), &30u32.to_be_bytes());
        assert!(rez.data(11).is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let err = ResourceFile::from_bytes(b"WAD2oops".to_vec()).unwrap_err();
        assert!(matches!(err, ArchiveError::BadMagic));
    }

    #[test]
    fn rejects_payload_past_eof() {
        let mut bytes = build_archive();
        let len = bytes.len();
        bytes.truncate(len - 4); // chop the last payload
        let err = ResourceFile::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::BadOffset { number: 30, .. }));
    }

    #[test]
    fn rejects_non_monotone_offsets() {
        // Swap the offsets of the first two resources: both slices stay
        // in bounds but the table runs backwards.
        let mut bytes = build_archive();
        let first = 12 + 12; // first resource header, after its group header
        let second = first + 24;
        let mut a = [0u8; 4];
        a.copy_from_slice(&bytes[first..first + 4]);
        let mut b = [0u8; 4];
        b.copy_from_slice(&bytes[second..second + 4]);
        bytes[first..first + 4].copy_from_slice(&b);
        bytes[second..second + 4].copy_from_slice(&a);

        let err = ResourceFile::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::BadOffset { number: 20, .. }));
    }

    #[test]
    fn loads_from_disk() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(tmp.path(), build_archive()).unwrap();
        let rez = ResourceFile::from_file(tmp.path()).unwrap();
        assert_eq!(rez.data(10).unwrap(), &10u32.to_be_bytes());
    }
}
