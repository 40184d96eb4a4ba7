//! Per-image initialization: the tile grid, the plane ranges to process,
//! and plane loading with z-projection.

use hcs_core::ome::{ImageReader, OmeInfo, TileRegion};
use hcs_core::settings::{ImageSetup, ZProjection};
use hcs_core::{ImageMatrix, PlaneId, Result};
use std::path::Path;

/// Computes how one image decomposes into tiles and which planes a job
/// processes.
pub struct PipelineInitializer<'a> {
    settings: &'a ImageSetup,
}

impl<'a> PipelineInitializer<'a> {
    pub fn new(settings: &'a ImageSetup) -> Self {
        Self { settings }
    }

    /// Number of tiles in x and y. When the reader's optimal tile exceeds
    /// the configured tile size, tiled loading buys nothing and the whole
    /// image is read as one.
    pub fn nr_of_tiles(&self, ome: &OmeInfo) -> (u32, u32) {
        let tile_area = u64::from(self.settings.tile_width) * u64::from(self.settings.tile_height);
        let optimal_area =
            u64::from(ome.optimal_tile_width) * u64::from(ome.optimal_tile_height);
        if optimal_area > tile_area {
            return (1, 1);
        }
        (
            ome.width.div_ceil(self.settings.tile_width).max(1),
            ome.height.div_ceil(self.settings.tile_height).max(1),
        )
    }

    /// Pixel region of one tile, clamped at the image edges.
    pub fn tile_region(&self, ome: &OmeInfo, tile: (u32, u32)) -> TileRegion {
        let (tiles_x, tiles_y) = self.nr_of_tiles(ome);
        if (tiles_x, tiles_y) == (1, 1) {
            return TileRegion { x: 0, y: 0, width: ome.width, height: ome.height };
        }
        let x = tile.0 * self.settings.tile_width;
        let y = tile.1 * self.settings.tile_height;
        TileRegion {
            x,
            y,
            width: self.settings.tile_width.min(ome.width - x),
            height: self.settings.tile_height.min(ome.height - y),
        }
    }

    /// Z planes to process, clamped to what the image has.
    pub fn nr_of_z_stacks_to_process(&self, ome: &OmeInfo) -> u32 {
        self.settings
            .z_stacks_to_process
            .unwrap_or(ome.nr_of_z_stacks)
            .min(ome.nr_of_z_stacks)
            .max(1)
    }

    /// T planes to process, clamped to what the image has.
    pub fn nr_of_t_stacks_to_process(&self, ome: &OmeInfo) -> u32 {
        self.settings
            .t_stacks_to_process
            .unwrap_or(ome.nr_of_t_stacks)
            .min(ome.nr_of_t_stacks)
            .max(1)
    }

    /// Bytes one in-flight tile occupies, used for the scheduler's memory
    /// budget.
    pub fn tile_bytes(&self, ome: &OmeInfo) -> u64 {
        let (tiles_x, tiles_y) = self.nr_of_tiles(ome);
        let (width, height) = if (tiles_x, tiles_y) == (1, 1) {
            (ome.width, ome.height)
        } else {
            (self.settings.tile_width, self.settings.tile_height)
        };
        ome.tile_bytes(width, height) * u64::from(ome.nr_of_channels.max(1))
    }

    /// Load the plane a pipeline starts from: the bound channel at one
    /// t-stack, with the configured z-range collapsed by projection.
    #[allow(clippy::too_many_arguments)]
    pub fn load_plane_projected(
        &self,
        reader: &dyn ImageReader,
        path: &Path,
        ome: &OmeInfo,
        series: u32,
        c_stack: u32,
        t_stack: u32,
        region: &TileRegion,
        projection: ZProjection,
    ) -> Result<ImageMatrix> {
        project_planes(
            reader,
            path,
            series,
            c_stack,
            t_stack,
            region,
            projection,
            self.nr_of_z_stacks_to_process(ome),
        )
    }
}

/// Collapse a z-range into one plane.
#[allow(clippy::too_many_arguments)]
pub fn project_planes(
    reader: &dyn ImageReader,
    path: &Path,
    series: u32,
    c_stack: u32,
    t_stack: u32,
    region: &TileRegion,
    projection: ZProjection,
    z_count: u32,
) -> Result<ImageMatrix> {
    let z_count = z_count.max(1);
    let load =
        |z: u32| reader.load_image_tile(path, &PlaneId::new(c_stack, z, t_stack), series, region);

    match projection {
        ZProjection::None => load(0),
        ZProjection::TakeMiddle => load(z_count / 2),
        ZProjection::MaxIntensity => {
            let mut out = load(0)?;
            for z in 1..z_count {
                let plane = load(z)?;
                for (dst, src) in out.data_mut().iter_mut().zip(plane.data().iter()) {
                    *dst = (*dst).max(*src);
                }
            }
            Ok(out)
        }
        ZProjection::MinIntensity => {
            let mut out = load(0)?;
            for z in 1..z_count {
                let plane = load(z)?;
                for (dst, src) in out.data_mut().iter_mut().zip(plane.data().iter()) {
                    *dst = (*dst).min(*src);
                }
            }
            Ok(out)
        }
        ZProjection::AvgIntensity => {
            let first = load(0)?;
            let mut acc: Vec<u64> = first.data().iter().map(|v| u64::from(*v)).collect();
            for z in 1..z_count {
                let plane = load(z)?;
                for (dst, src) in acc.iter_mut().zip(plane.data().iter()) {
                    *dst += u64::from(*src);
                }
            }
            let divisor = u64::from(z_count);
            let data: Vec<u16> = acc.into_iter().map(|v| (v / divisor) as u16).collect();
            ImageMatrix::from_vec(first.width(), first.height(), data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(tile: u32) -> ImageSetup {
        ImageSetup { tile_width: tile, tile_height: tile, ..Default::default() }
    }

    #[test]
    fn tile_grid_is_ceiled() {
        let settings = setup(256);
        let init = PipelineInitializer::new(&settings);
        let ome = OmeInfo { width: 1000, height: 512, ..Default::default() };
        assert_eq!(init.nr_of_tiles(&ome), (4, 2));

        let region = init.tile_region(&ome, (3, 1));
        assert_eq!(region.x, 768);
        assert_eq!(region.width, 232);
        assert_eq!(region.height, 256);
    }

    #[test]
    fn oversized_optimal_tile_disables_tiling() {
        let settings = setup(256);
        let init = PipelineInitializer::new(&settings);
        let ome = OmeInfo {
            width: 1000,
            height: 512,
            optimal_tile_width: 1000,
            optimal_tile_height: 512,
            ..Default::default()
        };
        assert_eq!(init.nr_of_tiles(&ome), (1, 1));
        let region = init.tile_region(&ome, (0, 0));
        assert_eq!((region.width, region.height), (1000, 512));
    }

    #[test]
    fn plane_ranges_are_clamped_to_ome() {
        let settings = ImageSetup {
            z_stacks_to_process: Some(10),
            t_stacks_to_process: Some(2),
            ..Default::default()
        };
        let init = PipelineInitializer::new(&settings);
        let ome = OmeInfo { nr_of_z_stacks: 3, nr_of_t_stacks: 5, ..Default::default() };
        assert_eq!(init.nr_of_z_stacks_to_process(&ome), 3);
        assert_eq!(init.nr_of_t_stacks_to_process(&ome), 2);
    }
}
