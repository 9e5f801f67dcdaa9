//! Request handlers for object operations.

mod objects;

pub use objects::*;
