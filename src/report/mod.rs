//! Report rendering and result emission.

pub mod generator;

pub use generator::*;
