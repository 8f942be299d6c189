//! Software-rendered 3DO Doom engine core.
//!
//! The crate decodes the game's monolithic resource file (Cel images,
//! column-major sprites, wall/flat textures, map lumps) and rasterizes a
//! BSP-partitioned 2.5D world plus dynamic actors into an XRGB8888
//! framebuffer, without GPU acceleration.
//!
//! Simulation, audio, input and persistence are external collaborators:
//! the renderer consumes a view position/angle and a list of actors per
//! frame and produces pixels.

pub mod base;
pub mod renderer;
pub mod rez;
pub mod video;
pub mod world;
