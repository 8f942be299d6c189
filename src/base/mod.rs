//! Shared low-level primitives: fixed-point math, binary angles and the
//! trig lookup tables, plus bounds-checked byte/bit input streams.

pub mod angle;
pub mod bits;
pub mod fixed;
pub mod stream;

pub use angle::{ANG45, ANG90, ANG180, ANG270, Angle};
pub use fixed::{FRACBITS, FRACUNIT, Fixed};
pub use stream::StreamError;
