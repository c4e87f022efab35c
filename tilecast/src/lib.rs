//! Tilecast - tiled segmentation of large rasters
//!
//! Cuts a large georeferenced raster into overlapping tiles, runs a
//! segmentation model on every tile with valid data, writes one
//! georeferenced mask per tile, and optionally mosaics the masks back into
//! a single raster. Runs are resumable: finished tiles and known-invalid
//! tiles are skipped on restart.
//!
//! # Architecture
//!
//! ```text
//! raster ──► grid ──► loader ──► preprocess ──► predict ──► output
//!   ▲          │         │                                    │
//!   │          └─────────┴──────── progress ◄─────────────────┘
//!   │                                 │
//!   └──────────── pipeline (BatchOrchestrator) ──────► mosaic
//! ```

pub mod config;
pub mod geo;
pub mod grid;
pub mod imaging;
pub mod loader;
pub mod logging;
pub mod mosaic;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod predict;
pub mod preprocess;
pub mod progress;
pub mod raster;

/// Crate version, shown by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
