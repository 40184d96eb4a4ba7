//! The closed command set of pipeline steps.
//!
//! Each command reads the context's current matrix and object list and
//! produces a new matrix and/or appends or modifies ROIs. A failing command
//! records a tile error on the caller's side; it never aborts the job.

mod filters;
mod relate;
mod saver;
mod segment;
mod threshold;
mod watershed;

pub use segment::find_objects;
pub use threshold::threshold_value;

use hcs_core::settings::PipelineStep;
use hcs_core::{Error, ImageMatrix, PlaneId, Result};

use crate::context::{MemoryScope, ProcessContext};
use crate::init::project_planes;

/// Execute one pipeline step on the active tile.
pub fn execute_step(
    step: &PipelineStep,
    ctx: &mut ProcessContext<'_>,
    image: &mut ImageMatrix,
) -> Result<()> {
    match step {
        PipelineStep::ZProjection { mode } => {
            *image = project_planes(
                ctx.reader,
                &ctx.image.path,
                ctx.image.series,
                ctx.plane.c_stack,
                ctx.plane.t_stack,
                &ctx.tile_region,
                *mode,
                ctx.image.ome.nr_of_z_stacks,
            )?;
            Ok(())
        }
        PipelineStep::MarginCrop { margin } => {
            filters::margin_crop(image, *margin as usize);
            Ok(())
        }
        PipelineStep::ChannelSubtract { c_stack } => {
            let plane = PlaneId::new((*c_stack).max(0) as u32, ctx.plane.z_stack, ctx.plane.t_stack);
            let other = ctx.load_image_from_cache(MemoryScope::Iteration, plane)?;
            image.subtract(&other);
            Ok(())
        }
        PipelineStep::RollingBall { radius } => {
            filters::rolling_ball(image, *radius as usize);
            Ok(())
        }
        PipelineStep::MedianSubtract { kernel_size } => {
            filters::median_subtract(image, *kernel_size as usize);
            Ok(())
        }
        PipelineStep::GaussianBlur { kernel_size, repeat } => {
            filters::gaussian_blur(image, *kernel_size as usize, *repeat);
            Ok(())
        }
        PipelineStep::Blur { kernel_size, repeat } => {
            filters::box_blur(image, *kernel_size as usize, *repeat);
            Ok(())
        }
        PipelineStep::EdgeDetection { algorithm, direction } => {
            match algorithm {
                hcs_core::settings::EdgeAlgorithm::Sobel => filters::edge_sobel(image, *direction),
                hcs_core::settings::EdgeAlgorithm::Canny => filters::edge_canny(image, *direction),
            }
            Ok(())
        }
        PipelineStep::Threshold { method, min_threshold, max_threshold, class_out } => {
            threshold::run(ctx, image, *method, *min_threshold, *max_threshold, *class_out)
        }
        PipelineStep::AiInference { model_path, min_confidence, class_out } => {
            let Some(backend) = ctx.inference_backend().cloned() else {
                return Err(Error::InvalidInput(
                    "no inference backend configured for the ai step".into(),
                ));
            };
            let class_id = ctx.class_out_or_default(*class_out);
            let mut rois = backend.run(model_path, image, *min_confidence)?;
            for roi in &mut rois {
                roi.class_id = class_id;
                roi.object_id = ctx.next_object_id(class_id);
                roi.plane = ctx.plane;
                roi.bbox.x = roi.bbox_tile.x + ctx.tile_region.x as i32;
                roi.bbox.y = roi.bbox_tile.y + ctx.tile_region.y as i32;
                roi.centroid.x = roi.centroid_tile.x + ctx.tile_region.x as i32;
                roi.centroid.y = roi.centroid_tile.y + ctx.tile_region.y as i32;
            }
            ctx.with_objects(|objects| {
                for roi in rois {
                    objects.push(roi);
                }
            });
            Ok(())
        }
        PipelineStep::Watershed { class_in } => watershed::run(ctx, image, *class_in),
        PipelineStep::ObjectFilter { class_in, min_area, max_area, min_circularity } => {
            relate::object_filter(ctx, *class_in, *min_area, *max_area, *min_circularity);
            Ok(())
        }
        PipelineStep::Intersection { parent_class, child_class, min_intersection } => {
            relate::intersection(ctx, *parent_class, *child_class, *min_intersection);
            Ok(())
        }
        PipelineStep::Colocalization { classes, min_intersection } => {
            relate::colocalization(ctx, classes, *min_intersection);
            Ok(())
        }
        PipelineStep::MeasureIntensity { classes, c_stacks } => {
            relate::measure_intensity(ctx, classes, c_stacks)
        }
        PipelineStep::Distance { class_from, class_to } => {
            relate::distance(ctx, *class_from, *class_to);
            Ok(())
        }
        PipelineStep::ImageSaver(settings) => saver::run(ctx, settings, image),
    }
}
