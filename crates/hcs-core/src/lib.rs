//! # HCS Core - Analysis Engine Core Library
//!
//! This crate provides the foundational types, settings documents, and port
//! traits for the HCS batch image-analysis engine. It defines the identifier
//! scheme, the measurement and statistics vocabulary, the object (ROI) model,
//! and the reader contract used throughout the workspace.
//!
//! ## Key Components
//!
//! - **Identifiers**: 16-bit class ids, 64-bit FNV-1a object/image ids, and
//!   the 128-bit composite sort key used to order result columns
//! - **Settings Documents**: Serde value objects for projects, plates,
//!   pipelines, and result tables
//! - **Object Model**: ROI with mask, contour, and geometric features plus
//!   the per-class object list
//! - **Ports**: The `ImageReader` trait returning OME metadata and raw tiles
//! - **Error Handling**: The error kinds surfaced at the core boundary

pub mod base32;
pub mod error;
pub mod group;
pub mod ids;
pub mod matrix;
pub mod ome;
pub mod rle;
pub mod roi;
pub mod settings;

pub use error::Error;
pub use group::GroupInformation;
pub use ids::{ClassId, PlaneId, Tile};
pub use matrix::ImageMatrix;
pub use ome::{ChannelInfo, ImageReader, OmeInfo, TileRegion};
pub use roi::{DistanceMeasure, IntensityMeasure, ObjectList, Roi};

/// Result alias for operations that fail with a core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
