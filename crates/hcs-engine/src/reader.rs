//! Grayscale PNG implementation of the reader port, used by the CLI and the
//! test suites. Real microscope formats plug in behind the same trait.

use std::path::Path;

use hcs_core::ome::{ChannelInfo, ImageReader, OmeInfo, TileRegion};
use hcs_core::{Error, ImageMatrix, PlaneId, Result};
use image::DynamicImage;

/// Reads single-plane 8/16-bit grayscale PNG files.
#[derive(Debug, Default, Clone)]
pub struct FileImageReader;

impl FileImageReader {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<DynamicImage> {
        image::open(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))
    }
}

impl ImageReader for FileImageReader {
    fn ome_information(&self, path: &Path, _series: u32) -> Result<OmeInfo> {
        let img = Self::open(path)?;
        let bits_per_sample = match &img {
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageRgb16(_) => 16,
            _ => 8,
        };
        let is_rgb = img.color().channel_count() >= 3;

        let mut info = OmeInfo {
            width: img.width(),
            height: img.height(),
            nr_of_channels: 1,
            nr_of_z_stacks: 1,
            nr_of_t_stacks: 1,
            is_rgb,
            bits_per_sample,
            ..Default::default()
        };
        info.channels.insert(
            0,
            ChannelInfo { channel_id: "C0".to_string(), name: "gray".to_string(), ..Default::default() },
        );
        Ok(info)
    }

    fn load_image_tile(
        &self,
        path: &Path,
        _plane: &PlaneId,
        _series: u32,
        tile: &TileRegion,
    ) -> Result<ImageMatrix> {
        let img = Self::open(path)?.into_luma16();
        let (width, height) = (img.width() as usize, img.height() as usize);
        let full = ImageMatrix::from_vec(width, height, img.into_raw())?;
        Ok(full.crop(
            tile.x as usize,
            tile.y as usize,
            tile.width as usize,
            tile.height as usize,
        ))
    }
}
