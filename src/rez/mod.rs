//! Resource file access and the native image formats.

pub mod archive;
pub mod cel;
pub mod images;

pub use archive::{ArchiveError, Resource, ResourceFile};
pub use cel::{CelError, CelImage, CelLoadFlags};
pub use images::CelImageCache;
