//! Settings documents.
//!
//! All settings are plain serde value objects. On disk they travel as YAML
//! project files; inside the store they are kept as base64 of their JSON
//! text to avoid quoting issues.

mod analyze;
mod enums;
mod pipeline;
mod project;
mod results;

pub use analyze::{AnalyzeSettings, ProjectSettings};
pub use enums::{GroupBy, MeasureType, Measurement, Stats, TStackHandling, ZProjection};
pub use pipeline::{
    CanvasMode, EdgeAlgorithm, EdgeDirection, ImageSaverSettings, PipelineSettings, PipelineStep,
    SaveClass, SaverStyle, ThresholdMethod,
};
pub use project::{Class, ExperimentSettings, ImageSetup, ImgPositionInWell, Plate, PlateSetup};
pub use results::{
    ColumnIdx, ColumnKey, ColumnNames, DensityMapSettings, ObjectFilter, ResultsSettings,
};
