//! Matrix filters: blurs, background subtraction, morphology, and edges.

use hcs_core::settings::EdgeDirection;
use hcs_core::ImageMatrix;

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Zero a margin of the given width around the tile.
pub fn margin_crop(image: &mut ImageMatrix, margin: usize) {
    let (width, height) = (image.width(), image.height());
    if margin == 0 || width == 0 || height == 0 {
        return;
    }
    for y in 0..height {
        for x in 0..width {
            if x < margin || y < margin || x >= width - margin || y >= height - margin {
                image.set(x, y, 0);
            }
        }
    }
}

fn convolve_separable(image: &mut ImageMatrix, kernel: &[f32]) {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return;
    }
    let half = (kernel.len() / 2) as isize;
    let mut tmp = vec![0f32; width * height];

    // Horizontal pass.
    for y in 0..height {
        let row = image.row(y);
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let xi = clamp_index(x as isize + k as isize - half, width);
                acc += f32::from(row[xi]) * weight;
            }
            tmp[y * width + x] = acc;
        }
    }
    // Vertical pass.
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let yi = clamp_index(y as isize + k as isize - half, height);
                acc += tmp[yi * width + x] * weight;
            }
            image.set(x, y, acc.round().clamp(0.0, f32::from(u16::MAX)) as u16);
        }
    }
}

/// Mean blur with a square kernel, repeated `repeat` times.
pub fn box_blur(image: &mut ImageMatrix, kernel_size: usize, repeat: u32) {
    let kernel_size = kernel_size.max(1) | 1;
    let kernel = vec![1.0 / kernel_size as f32; kernel_size];
    for _ in 0..repeat.max(1) {
        convolve_separable(image, &kernel);
    }
}

/// Gaussian blur; sigma is derived from the kernel size the same way the
/// classic imaging libraries do.
pub fn gaussian_blur(image: &mut ImageMatrix, kernel_size: usize, repeat: u32) {
    let kernel_size = kernel_size.max(3) | 1;
    let sigma = 0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (kernel_size / 2) as isize;
    let mut kernel = Vec::with_capacity(kernel_size);
    let mut sum = 0f32;
    for i in -half..=half {
        let value = (-((i * i) as f32) / (2.0 * sigma * sigma)).exp();
        kernel.push(value);
        sum += value;
    }
    for value in &mut kernel {
        *value /= sum;
    }
    for _ in 0..repeat.max(1) {
        convolve_separable(image, &kernel);
    }
}

fn rank_filter(image: &ImageMatrix, kernel_size: usize, pick: impl Fn(&mut Vec<u16>) -> u16) -> ImageMatrix {
    let (width, height) = (image.width(), image.height());
    let half = (kernel_size.max(1) | 1) / 2;
    let mut out = ImageMatrix::zeros(width, height);
    let mut window = Vec::with_capacity((2 * half + 1) * (2 * half + 1));
    for y in 0..height {
        for x in 0..width {
            window.clear();
            for dy in -(half as isize)..=(half as isize) {
                for dx in -(half as isize)..=(half as isize) {
                    let xi = clamp_index(x as isize + dx, width);
                    let yi = clamp_index(y as isize + dy, height);
                    window.push(image.get(xi, yi));
                }
            }
            out.set(x, y, pick(&mut window));
        }
    }
    out
}

/// Subtract the median-filtered image (background flattening).
pub fn median_subtract(image: &mut ImageMatrix, kernel_size: usize) {
    let background = rank_filter(image, kernel_size, |window| {
        let mid = window.len() / 2;
        *window.select_nth_unstable(mid).1
    });
    image.subtract(&background);
}

/// Rolling-ball style background subtraction: a grayscale opening with a
/// square structuring element approximates the ball-rolled background.
pub fn rolling_ball(image: &mut ImageMatrix, radius: usize) {
    let kernel_size = 2 * radius.max(1) + 1;
    let eroded = rank_filter(image, kernel_size, |window| *window.iter().min().unwrap());
    let background = rank_filter(&eroded, kernel_size, |window| *window.iter().max().unwrap());
    image.subtract(&background);
}

/// Sobel gradient magnitude in the requested direction.
pub fn edge_sobel(image: &mut ImageMatrix, direction: EdgeDirection) {
    let (width, height) = (image.width(), image.height());
    let src = image.clone();
    let at = |x: isize, y: isize| -> f32 {
        f32::from(src.get(clamp_index(x, width), clamp_index(y, height)))
    };
    for y in 0..height as isize {
        for x in 0..width as isize {
            let gx = -at(x - 1, y - 1) - 2.0 * at(x - 1, y) - at(x - 1, y + 1)
                + at(x + 1, y - 1)
                + 2.0 * at(x + 1, y)
                + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1)
                + 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);
            let magnitude = match direction {
                EdgeDirection::X => gx.abs(),
                EdgeDirection::Y => gy.abs(),
                EdgeDirection::Xy => (gx * gx + gy * gy).sqrt(),
            };
            image.set(
                x as usize,
                y as usize,
                magnitude.clamp(0.0, f32::from(u16::MAX)) as u16,
            );
        }
    }
}

/// Canny edge detection: smoothing, gradient, non-maximum suppression, and
/// hysteresis thresholding. Edge pixels come out binary.
pub fn edge_canny(image: &mut ImageMatrix, direction: EdgeDirection) {
    let (width, height) = (image.width(), image.height());
    if width < 3 || height < 3 {
        return;
    }
    gaussian_blur(image, 5, 1);

    let src = image.clone();
    let at = |x: isize, y: isize| -> f32 {
        f32::from(src.get(clamp_index(x, width), clamp_index(y, height)))
    };
    let mut magnitude = vec![0f32; width * height];
    let mut gradient_x = vec![0f32; width * height];
    let mut gradient_y = vec![0f32; width * height];
    let mut max_magnitude = 0f32;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let gx = -at(x - 1, y - 1) - 2.0 * at(x - 1, y) - at(x - 1, y + 1)
                + at(x + 1, y - 1)
                + 2.0 * at(x + 1, y)
                + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1)
                + 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);
            let m = match direction {
                EdgeDirection::X => gx.abs(),
                EdgeDirection::Y => gy.abs(),
                EdgeDirection::Xy => (gx * gx + gy * gy).sqrt(),
            };
            let idx = y as usize * width + x as usize;
            gradient_x[idx] = gx;
            gradient_y[idx] = gy;
            magnitude[idx] = m;
            max_magnitude = max_magnitude.max(m);
        }
    }
    if max_magnitude <= 0.0 {
        image.data_mut().fill(0);
        return;
    }

    // Non-maximum suppression along the quantized gradient direction.
    let mut thin = vec![0f32; width * height];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let idx = y * width + x;
            let angle = gradient_y[idx].atan2(gradient_x[idx]).to_degrees();
            let angle = if angle < 0.0 { angle + 180.0 } else { angle };
            let (n1, n2) = if !(22.5..157.5).contains(&angle) {
                (idx - 1, idx + 1)
            } else if angle < 67.5 {
                (idx - width - 1, idx + width + 1)
            } else if angle < 112.5 {
                (idx - width, idx + width)
            } else {
                (idx - width + 1, idx + width - 1)
            };
            if magnitude[idx] >= magnitude[n1] && magnitude[idx] >= magnitude[n2] {
                thin[idx] = magnitude[idx];
            }
        }
    }

    // Hysteresis: strong pixels seed, weak pixels survive when connected.
    let high = 0.2 * max_magnitude;
    let low = 0.1 * max_magnitude;
    let mut out = vec![0u8; width * height];
    let mut stack = Vec::new();
    for (idx, value) in thin.iter().enumerate() {
        if *value >= high {
            out[idx] = 1;
            stack.push(idx);
        }
    }
    while let Some(idx) = stack.pop() {
        let x = (idx % width) as isize;
        let y = (idx / width) as isize;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let nidx = ny as usize * width + nx as usize;
                if out[nidx] == 0 && thin[nidx] >= low {
                    out[nidx] = 1;
                    stack.push(nidx);
                }
            }
        }
    }

    for (dst, edge) in image.data_mut().iter_mut().zip(out.iter()) {
        *dst = if *edge > 0 { ImageMatrix::FOREGROUND } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_crop_zeroes_the_border() {
        let mut image = ImageMatrix::from_vec(4, 4, vec![9; 16]).unwrap();
        margin_crop(&mut image, 1);
        assert_eq!(image.get(0, 0), 0);
        assert_eq!(image.get(3, 3), 0);
        assert_eq!(image.get(1, 1), 9);
        assert_eq!(image.get(2, 2), 9);
    }

    #[test]
    fn box_blur_preserves_flat_regions() {
        let mut image = ImageMatrix::from_vec(5, 5, vec![100; 25]).unwrap();
        box_blur(&mut image, 3, 1);
        assert!(image.data().iter().all(|v| *v == 100));
    }

    #[test]
    fn median_subtract_flattens_constant_background() {
        let mut data = vec![50u16; 25];
        data[12] = 1000; // single bright spot on flat background
        let mut image = ImageMatrix::from_vec(5, 5, data).unwrap();
        median_subtract(&mut image, 3);
        assert_eq!(image.get(0, 0), 0);
        assert_eq!(image.get(2, 2), 950);
    }

    #[test]
    fn sobel_responds_to_a_vertical_step() {
        let mut data = vec![0u16; 16];
        for y in 0..4 {
            for x in 2..4 {
                data[y * 4 + x] = 1000;
            }
        }
        let mut image = ImageMatrix::from_vec(4, 4, data).unwrap();
        edge_sobel(&mut image, EdgeDirection::X);
        assert!(image.get(1, 1) > 0 || image.get(2, 1) > 0);
        assert_eq!(image.get(0, 1), 0);
    }
}
