//! Pipeline settings: an ordered list of command steps plus the default
//! output class and the bound image channel.

use serde::{Deserialize, Serialize};

use crate::ids::ClassId;
use crate::settings::enums::ZProjection;

/// One analysis pipeline: commands executed left-to-right on each tile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSettings {
    pub name: String,
    /// Class assigned to objects emitted by steps that do not name one.
    pub default_class_id: ClassId,
    /// C-stack this pipeline is bound to.
    #[serde(default)]
    pub c_stack: i32,
    /// Z projection applied when the plane range collapses.
    #[serde(default)]
    pub z_projection: ZProjection,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
}

/// Automatic or manual threshold selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThresholdMethod {
    #[default]
    Manual,
    Li,
    MinError,
    Triangle,
    Moments,
    Otsu,
}

/// Edge detection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EdgeAlgorithm {
    #[default]
    Sobel,
    Canny,
}

/// Gradient direction of the edge detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EdgeDirection {
    X,
    Y,
    #[default]
    Xy,
}

/// Background the image saver paints objects onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CanvasMode {
    /// The pipeline's current working matrix.
    #[default]
    ImagePlane,
    Black,
    White,
    /// A specific plane pulled from the tile cache.
    Plane {
        c_stack: u32,
        z_stack: u32,
        t_stack: u32,
    },
}

/// How a saved class is painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SaverStyle {
    #[default]
    Outlined,
    Filled,
}

/// One class the image saver renders.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaveClass {
    pub class_in: ClassId,
    #[serde(default)]
    pub style: SaverStyle,
    #[serde(default)]
    pub paint_bounding_box: bool,
}

/// Settings of the image-saver sink command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageSaverSettings {
    /// Subfolder below the job output folder; `${imageName}` is substituted
    /// by the image stem.
    #[serde(default)]
    pub sub_folder: String,
    /// Suffix of the written file name; `${imageName}` is substituted.
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub canvas: CanvasMode,
    /// PNG compression level 0-9.
    #[serde(default = "default_compression")]
    pub compression: u8,
    #[serde(default)]
    pub classes_in: Vec<SaveClass>,
}

fn default_compression() -> u8 {
    1
}

/// A single pipeline step.
///
/// Commands form a closed set; each reads the context's current matrix and
/// object list and produces a new matrix and/or ROIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineStep {
    /// Collapse the z-range into one plane.
    ZProjection { mode: ZProjection },
    /// Zero a margin of the given width around the tile.
    MarginCrop { margin: u32 },
    /// Subtract another channel of the same plane.
    ChannelSubtract { c_stack: i32 },
    /// Rolling-ball background subtraction.
    RollingBall { radius: u32 },
    /// Subtract the median-filtered image (background flattening).
    MedianSubtract { kernel_size: u32 },
    /// Gaussian smoothing, optionally repeated.
    GaussianBlur {
        kernel_size: u32,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    /// Box blur, optionally repeated.
    Blur {
        kernel_size: u32,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    /// Sobel or Canny edge detection.
    EdgeDetection {
        #[serde(default)]
        algorithm: EdgeAlgorithm,
        #[serde(default)]
        direction: EdgeDirection,
    },
    /// Threshold to a binary plane and emit connected components as objects.
    Threshold {
        #[serde(default)]
        method: ThresholdMethod,
        #[serde(default)]
        min_threshold: u16,
        #[serde(default = "default_max_threshold")]
        max_threshold: u16,
        /// Class of the emitted objects; the pipeline default when absent.
        #[serde(default)]
        class_out: Option<ClassId>,
    },
    /// Run a segmentation model through the configured inference backend.
    AiInference {
        model_path: String,
        #[serde(default)]
        min_confidence: f32,
        #[serde(default)]
        class_out: Option<ClassId>,
    },
    /// Split touching binary objects along the distance-transform ridge.
    Watershed {
        #[serde(default)]
        class_in: Option<ClassId>,
    },
    /// Drop objects outside the area/circularity bounds.
    ObjectFilter {
        #[serde(default)]
        class_in: Option<ClassId>,
        #[serde(default)]
        min_area: f64,
        #[serde(default = "default_max_area")]
        max_area: f64,
        #[serde(default)]
        min_circularity: f32,
    },
    /// Link child objects to the parents covering them.
    Intersection {
        parent_class: ClassId,
        child_class: ClassId,
        #[serde(default = "default_min_intersection")]
        min_intersection: f64,
    },
    /// Assign a shared tracking id to overlapping objects across classes.
    Colocalization {
        classes: Vec<ClassId>,
        #[serde(default = "default_min_intersection")]
        min_intersection: f64,
    },
    /// Measure per-plane intensity of the given classes over channels.
    MeasureIntensity {
        classes: Vec<ClassId>,
        c_stacks: Vec<i32>,
    },
    /// Measure directed distances between all objects of two classes.
    Distance {
        class_from: ClassId,
        class_to: ClassId,
    },
    /// Render objects to a PNG control image.
    ImageSaver(ImageSaverSettings),
}

fn default_repeat() -> u32 {
    1
}

fn default_max_threshold() -> u16 {
    u16::MAX
}

fn default_max_area() -> f64 {
    f64::MAX
}

fn default_min_intersection() -> f64 {
    0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_roundtrip_through_tagged_json() {
        let step = PipelineStep::Threshold {
            method: ThresholdMethod::Otsu,
            min_threshold: 0,
            max_threshold: u16::MAX,
            class_out: Some(ClassId(3)),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"type\":\"threshold\""));
        let back: PipelineStep = serde_json::from_str(&json).unwrap();
        match back {
            PipelineStep::Threshold { method, class_out, .. } => {
                assert_eq!(method, ThresholdMethod::Otsu);
                assert_eq!(class_out, Some(ClassId(3)));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
