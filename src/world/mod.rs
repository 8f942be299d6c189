//! The static world: map entity tables, BSP helpers, textures, sprites.

pub mod bsp;
pub mod geometry;
pub mod level;
pub mod sprites;
pub mod texture;

pub use geometry::{Level, LineFlags, MapObjFlags, MapObject, SKY_CEILING_PIC};
pub use level::{LevelError, load_level};
pub use sprites::{SpriteBank, SpriteError};
pub use texture::{TextureBank, TextureError};
