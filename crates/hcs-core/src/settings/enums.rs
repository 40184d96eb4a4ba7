//! Measurement and statistics vocabulary shared by settings, the store, and
//! the SQL generator.

use serde::{Deserialize, Serialize};

/// What a result column measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Measurement {
    None = 0,
    Count,
    Confidence,
    AreaSize,
    Perimeter,
    Circularity,
    IntensitySum,
    IntensityAvg,
    IntensityMin,
    IntensityMax,
    CentroidX,
    CentroidY,
    BoundingBoxWidth,
    BoundingBoxHeight,
    ObjectId,
    OriginObjectId,
    ParentObjectId,
    TrackingId,
    Intersecting,
    DistanceCenterToCenter,
    DistanceCenterToSurfaceMin,
    DistanceCenterToSurfaceMax,
    DistanceSurfaceToSurfaceMin,
    DistanceSurfaceToSurfaceMax,
    DistanceFromObjectId,
    DistanceToObjectId,
}

impl Default for Measurement {
    fn default() -> Self {
        Measurement::None
    }
}

/// Grouping of measurements by how their SQL is emitted and how they behave
/// in rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureType {
    /// Projected as-is; meaningless when aggregated across objects.
    Id,
    /// Plain object feature living on the `objects` row.
    Object,
    /// Centroid coordinates; stripped from group rollups.
    Position,
    /// Joined from `object_measurements`.
    Intensity,
    /// Joined from `distance_measurements`.
    Distance,
    /// Object-id columns of a distance pair.
    DistanceId,
    /// Child counts from the intersecting CTE.
    Intersection,
}

impl Measurement {
    /// Numeric code used inside the 128-bit column sort key.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn measure_type(&self) -> MeasureType {
        use Measurement::*;
        match self {
            IntensitySum | IntensityAvg | IntensityMin | IntensityMax => MeasureType::Intensity,
            DistanceCenterToCenter
            | DistanceCenterToSurfaceMin
            | DistanceCenterToSurfaceMax
            | DistanceSurfaceToSurfaceMin
            | DistanceSurfaceToSurfaceMax => MeasureType::Distance,
            DistanceFromObjectId | DistanceToObjectId => MeasureType::DistanceId,
            CentroidX | CentroidY => MeasureType::Position,
            ObjectId | OriginObjectId | ParentObjectId | TrackingId => MeasureType::Id,
            Intersecting => MeasureType::Intersection,
            _ => MeasureType::Object,
        }
    }

    /// SQL value expression of the measure. `COUNT` maps to the constant `1`
    /// so that its aggregation becomes `SUM(1)`.
    pub fn sql_value(&self) -> &'static str {
        use Measurement::*;
        match self {
            Count => "1",
            Confidence => "meas_confidence",
            AreaSize => "meas_area_size",
            Perimeter => "meas_perimeter",
            Circularity => "meas_circularity",
            IntensitySum => "meas_intensity_sum",
            IntensityAvg => "meas_intensity_avg",
            IntensityMin => "meas_intensity_min",
            IntensityMax => "meas_intensity_max",
            CentroidX => "meas_center_x",
            CentroidY => "meas_center_y",
            BoundingBoxWidth => "meas_box_width",
            BoundingBoxHeight => "meas_box_height",
            ObjectId => "object_id",
            OriginObjectId => "meas_origin_object_id",
            ParentObjectId => "meas_parent_object_id",
            TrackingId => "meas_tracking_id",
            Intersecting => "recursive_child_count_",
            DistanceCenterToCenter => "meas_distance_center_to_center",
            DistanceCenterToSurfaceMin => "meas_distance_center_to_surface_min",
            DistanceCenterToSurfaceMax => "meas_distance_center_to_surface_max",
            DistanceSurfaceToSurfaceMin => "meas_distance_surface_to_surface_min",
            DistanceSurfaceToSurfaceMax => "meas_distance_surface_to_surface_max",
            DistanceFromObjectId => "object_id",
            DistanceToObjectId => "meas_object_id",
            None => "1",
        }
    }

    /// Textual alias of the measure used in column names; `COUNT` becomes
    /// `counted`.
    pub fn sql_alias(&self) -> &'static str {
        match self {
            Measurement::Count => "counted",
            Measurement::None => "none",
            other => other.sql_value(),
        }
    }

    /// Human readable column title fragment.
    pub fn display_name(&self) -> &'static str {
        use Measurement::*;
        match self {
            None => "None",
            Count => "Count",
            Confidence => "Confidence",
            AreaSize => "Area size",
            Perimeter => "Perimeter",
            Circularity => "Circularity",
            IntensitySum => "Intensity sum",
            IntensityAvg => "Intensity avg",
            IntensityMin => "Intensity min",
            IntensityMax => "Intensity max",
            CentroidX => "x",
            CentroidY => "y",
            BoundingBoxWidth => "Box width",
            BoundingBoxHeight => "Box height",
            ObjectId => "Object ID",
            OriginObjectId => "Origin object ID",
            ParentObjectId => "Parent object ID",
            TrackingId => "Tracking ID",
            Intersecting => "Intersection",
            DistanceCenterToCenter => "Distance center-center",
            DistanceCenterToSurfaceMin => "Distance center-surface min",
            DistanceCenterToSurfaceMax => "Distance center-surface max",
            DistanceSurfaceToSurfaceMin => "Distance surface-surface min",
            DistanceSurfaceToSurfaceMax => "Distance surface-surface max",
            DistanceFromObjectId => "Distance from object ID",
            DistanceToObjectId => "Distance to object ID",
        }
    }
}

/// Statistics applied when rolling measurements up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stats {
    Off = 0,
    Cnt,
    Avg,
    Max,
    Min,
    Sum,
    Median,
    Stddev,
}

impl Default for Stats {
    fn default() -> Self {
        Stats::Avg
    }
}

impl Stats {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// SQL aggregate function name. `Off` renders as the caller-provided
    /// carrier function (`ANY_VALUE` in rollups).
    pub fn sql_name(&self, off_value: &str) -> String {
        match self {
            Stats::Off => off_value.to_string(),
            Stats::Cnt => "COUNT".to_string(),
            Stats::Avg => "AVG".to_string(),
            Stats::Max => "MAX".to_string(),
            Stats::Min => "MIN".to_string(),
            Stats::Sum => "SUM".to_string(),
            Stats::Median => "MEDIAN".to_string(),
            Stats::Stddev => "STDDEV".to_string(),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stats::Off => "",
            Stats::Cnt => "cnt",
            Stats::Avg => "avg",
            Stats::Max => "max",
            Stats::Min => "min",
            Stats::Sum => "sum",
            Stats::Median => "median",
            Stats::Stddev => "stddev",
        }
    }
}

/// How images are grouped into wells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupBy {
    #[default]
    Off,
    Directory,
    Filename,
}

/// How a z-range collapses into the plane a pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ZProjection {
    #[default]
    None,
    MaxIntensity,
    MinIntensity,
    AvgIntensity,
    TakeMiddle,
}

/// T-stack handling of result queries: one row per (image, t) or a further
/// slice grouping over `stack_t_real`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TStackHandling {
    #[default]
    Individual,
    Slice,
}
