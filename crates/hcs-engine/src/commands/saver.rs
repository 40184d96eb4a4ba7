//! Control-image sink: renders objects over a canvas and writes a PNG.

use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;

use hcs_core::settings::{CanvasMode, ImageSaverSettings, SaverStyle};
use hcs_core::{Error, ImageMatrix, PlaneId, Result, Roi};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use tracing::debug;

fn replace_image_name(input: &str, replacement: &str) -> String {
    input.replace("${imageName}", replacement)
}

fn hex_to_rgb(color: &str) -> [u8; 3] {
    let hex = color.trim_start_matches('#');
    if hex.len() != 6 {
        return [255, 0, 0];
    }
    let parse = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).unwrap_or(255);
    [parse(0..2), parse(2..4), parse(4..6)]
}

use crate::context::{MemoryScope, ProcessContext};

pub fn run(
    ctx: &mut ProcessContext<'_>,
    settings: &ImageSaverSettings,
    image: &ImageMatrix,
) -> Result<()> {
    let stem = ctx
        .act_image_path()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let parent: PathBuf = ctx
        .output_folder
        .join(replace_image_name(&settings.sub_folder, &stem));
    fs::create_dir_all(&parent)
        .map_err(|e| Error::Other(anyhow::anyhow!("create output folder: {e}")))?;

    let save_name = parent.join(format!(
        "{stem}__{}x{}__{}-{}-{}{}.png",
        ctx.tile.1,
        ctx.tile.0,
        ctx.plane.c_stack,
        ctx.plane.z_stack,
        ctx.plane.t_stack,
        replace_image_name(&settings.name_prefix, &stem),
    ));

    let (width, height) = (image.width() as u32, image.height() as u32);
    let gray_canvas = |background: &ImageMatrix| {
        let mut out = RgbImage::new(width, height);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            // Scale down to 8 bit.
            let gray = (background.get(x as usize, y as usize) >> 8) as u8;
            *pixel = image::Rgb([gray, gray, gray]);
        }
        out
    };
    let mut canvas = match settings.canvas {
        CanvasMode::ImagePlane => gray_canvas(image),
        CanvasMode::Plane { c_stack, z_stack, t_stack } => {
            let plane = PlaneId::new(c_stack, z_stack, t_stack);
            let cached = ctx.load_image_from_cache(MemoryScope::Iteration, plane)?;
            gray_canvas(&cached)
        }
        CanvasMode::Black => RgbImage::new(width, height),
        CanvasMode::White => RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])),
    };

    for save_class in &settings.classes_in {
        let color = hex_to_rgb(&ctx.color_of_class(save_class.class_in));
        let rois = ctx.with_objects(|objects| objects.of_class(save_class.class_in).to_vec());
        for roi in &rois {
            draw_object(&mut canvas, roi, color, save_class.style, save_class.paint_bounding_box);
        }
    }

    let file = fs::File::create(&save_name)
        .map_err(|e| Error::Other(anyhow::anyhow!("create {}: {e}", save_name.display())))?;
    let compression = match settings.compression {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let encoder = PngEncoder::new_with_quality(BufWriter::new(file), compression, FilterType::Adaptive);
    encoder
        .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| Error::Other(anyhow::anyhow!("encode png: {e}")))?;
    debug!(path = %save_name.display(), "control image written");
    Ok(())
}

fn draw_object(
    canvas: &mut RgbImage,
    roi: &Roi,
    color: [u8; 3],
    style: SaverStyle,
    paint_bounding_box: bool,
) {
    if roi.mask.is_empty() || roi.bbox_tile.is_empty() {
        return;
    }
    let put = |canvas: &mut RgbImage, x: i32, y: i32, rgb: [u8; 3]| {
        if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
            canvas.put_pixel(x as u32, y as u32, image::Rgb(rgb));
        }
    };

    if style == SaverStyle::Filled {
        for ly in 0..roi.bbox_tile.height as i32 {
            for lx in 0..roi.bbox_tile.width as i32 {
                if roi.mask[(ly * roi.bbox_tile.width as i32 + lx) as usize] > 0 {
                    put(canvas, roi.bbox_tile.x + lx, roi.bbox_tile.y + ly, color);
                }
            }
        }
    }

    // Contour is painted for both styles; filled objects get a black one.
    let contour_color = if style == SaverStyle::Filled { [0, 0, 0] } else { color };
    for point in &roi.contour {
        put(canvas, roi.bbox_tile.x + point.x, roi.bbox_tile.y + point.y, contour_color);
    }

    if paint_bounding_box {
        let right = roi.bbox_tile.right() - 1;
        let bottom = roi.bbox_tile.bottom() - 1;
        for x in roi.bbox_tile.x..=right {
            put(canvas, x, roi.bbox_tile.y, color);
            put(canvas, x, bottom, color);
        }
        for y in roi.bbox_tile.y..=bottom {
            put(canvas, roi.bbox_tile.x, y, color);
            put(canvas, right, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_placeholder_is_substituted() {
        assert_eq!(replace_image_name("ctrl/${imageName}", "img_01"), "ctrl/img_01");
        assert_eq!(replace_image_name("plain", "img_01"), "plain");
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(hex_to_rgb("#00FF80"), [0, 255, 128]);
        assert_eq!(hex_to_rgb("bogus"), [255, 0, 0]);
    }
}
