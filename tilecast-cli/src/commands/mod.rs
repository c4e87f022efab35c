//! CLI command implementations.

pub mod mosaic;
pub mod predict;
