//! Object storage, held in memory.

mod objects;

pub use objects::*;
