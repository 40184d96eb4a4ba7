//! # HCS Engine - Pipeline Execution
//!
//! The write path of the analysis engine: enumerates and groups images,
//! decomposes each image into tiles and planes, runs the pipeline command
//! sequence per tile, and bulk-appends detected objects and measurements
//! into the store at tile completion.
//!
//! Parallelism follows a single-axis model (images, tiles, or pipelines),
//! bounded by a memory-derived tile budget; cancellation is a cooperative
//! token polled at image, tile, and command boundaries.

pub mod commands;
mod context;
mod grouper;
mod init;
mod reader;
mod runner;

pub use context::{ImageContext, InferenceBackend, MemoryScope, ProcessContext};
pub use grouper::{FileGrouper, WellPosGenerator};
pub use init::PipelineInitializer;
pub use reader::FileImageReader;
pub use runner::{JobProgress, JobRunner, ProgressSnapshot};

/// Validity bits OR-ed into image and plane rows.
pub mod validity {
    /// A command failed on the tile.
    pub const PROCESSING_ERROR: u64 = 1 << 0;
    /// The tile could not be held in memory and was skipped.
    pub const OUT_OF_MEMORY: u64 = 1 << 1;
    /// The plane could not be read from the source file.
    pub const READ_ERROR: u64 = 1 << 2;
}
