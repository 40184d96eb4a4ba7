//! Watershed split of touching binary objects.
//!
//! Chamfer distance transform, seed extraction from distance maxima, and a
//! flood descending the distance map. Pixels claimed by two different seeds
//! become background (the watershed line), then the plane is re-segmented
//! and the class's objects replaced.

use std::collections::BinaryHeap;

use hcs_core::{ClassId, ImageMatrix, Result};

use crate::commands::segment;
use crate::context::ProcessContext;

pub fn run(
    ctx: &mut ProcessContext<'_>,
    image: &mut ImageMatrix,
    class_in: Option<ClassId>,
) -> Result<()> {
    split(image);

    let class_id = ctx.class_out_or_default(class_in);
    let rois = segment::find_objects(image)
        .into_iter()
        .map(|component| segment::build_roi(ctx, component, class_id))
        .collect::<Vec<_>>();
    ctx.with_objects(|objects| {
        objects.insert_class(class_id, Vec::new());
        for roi in rois {
            objects.push(roi);
        }
    });
    Ok(())
}

/// Chamfer 3-4 distance to the nearest background pixel.
fn distance_transform(binary: &ImageMatrix) -> Vec<u32> {
    let (width, height) = (binary.width(), binary.height());
    const INF: u32 = u32::MAX / 2;
    let mut dist = vec![0u32; width * height];
    for y in 0..height {
        for x in 0..width {
            if binary.get(x, y) > 0 {
                dist[y * width + x] = INF;
            }
        }
    }

    let idx = |x: usize, y: usize| y * width + x;
    // Forward pass.
    for y in 0..height {
        for x in 0..width {
            let mut d = dist[idx(x, y)];
            if x > 0 {
                d = d.min(dist[idx(x - 1, y)] + 3);
            }
            if y > 0 {
                d = d.min(dist[idx(x, y - 1)] + 3);
                if x > 0 {
                    d = d.min(dist[idx(x - 1, y - 1)] + 4);
                }
                if x + 1 < width {
                    d = d.min(dist[idx(x + 1, y - 1)] + 4);
                }
            }
            dist[idx(x, y)] = d;
        }
    }
    // Backward pass.
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let mut d = dist[idx(x, y)];
            if x + 1 < width {
                d = d.min(dist[idx(x + 1, y)] + 3);
            }
            if y + 1 < height {
                d = d.min(dist[idx(x, y + 1)] + 3);
                if x + 1 < width {
                    d = d.min(dist[idx(x + 1, y + 1)] + 4);
                }
                if x > 0 {
                    d = d.min(dist[idx(x - 1, y + 1)] + 4);
                }
            }
            dist[idx(x, y)] = d;
        }
    }
    dist
}

/// Split touching components in place by carving background lines along the
/// watershed between distance maxima.
pub fn split(binary: &mut ImageMatrix) {
    let (width, height) = (binary.width(), binary.height());
    if width == 0 || height == 0 {
        return;
    }
    let dist = distance_transform(binary);
    let idx = |x: usize, y: usize| y * width + x;

    // Seeds: distance maxima clearly inside an object. Adjacent maxima of
    // equal height merge into one seed label.
    let mut seed_mask = vec![false; width * height];
    for y in 0..height {
        for x in 0..width {
            let d = dist[idx(x, y)];
            if d < 6 {
                continue;
            }
            let mut is_max = true;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    if dist[idx(nx as usize, ny as usize)] > d {
                        is_max = false;
                    }
                }
            }
            if is_max {
                seed_mask[idx(x, y)] = true;
            }
        }
    }

    // Label seed plateaus.
    let mut labels = vec![0u32; width * height];
    let mut next_label = 0u32;
    for y in 0..height {
        for x in 0..width {
            if !seed_mask[idx(x, y)] || labels[idx(x, y)] != 0 {
                continue;
            }
            next_label += 1;
            let mut stack = vec![(x, y)];
            labels[idx(x, y)] = next_label;
            while let Some((sx, sy)) = stack.pop() {
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let nx = sx as i32 + dx;
                        let ny = sy as i32 + dy;
                        if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                            continue;
                        }
                        let ni = idx(nx as usize, ny as usize);
                        if seed_mask[ni] && labels[ni] == 0 {
                            labels[ni] = next_label;
                            stack.push((nx as usize, ny as usize));
                        }
                    }
                }
            }
        }
    }
    if next_label < 2 {
        return; // nothing to split
    }

    // Flood downhill from the seeds; collisions become watershed lines.
    let mut heap: BinaryHeap<(u32, usize, usize)> = BinaryHeap::new();
    for y in 0..height {
        for x in 0..width {
            if labels[idx(x, y)] != 0 {
                heap.push((dist[idx(x, y)], x, y));
            }
        }
    }
    const BOUNDARY: u32 = u32::MAX;
    while let Some((_, x, y)) = heap.pop() {
        let label = labels[idx(x, y)];
        if label == BOUNDARY {
            continue;
        }
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                    continue;
                }
                let ni = idx(nx as usize, ny as usize);
                if binary.get(nx as usize, ny as usize) == 0 || dist[ni] == 0 {
                    continue;
                }
                match labels[ni] {
                    0 => {
                        labels[ni] = label;
                        heap.push((dist[ni], nx as usize, ny as usize));
                    }
                    other if other != label && other != BOUNDARY => {
                        labels[ni] = BOUNDARY;
                    }
                    _ => {}
                }
            }
        }
    }

    for y in 0..height {
        for x in 0..width {
            if labels[idx(x, y)] == BOUNDARY {
                binary.set(x, y, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_peaks_inside_a_square() {
        let mut binary = ImageMatrix::zeros(11, 11);
        for y in 1..10 {
            for x in 1..10 {
                binary.set(x, y, ImageMatrix::FOREGROUND);
            }
        }
        let dist = distance_transform(&binary);
        // The center is the farthest point from background.
        let center = dist[5 * 11 + 5];
        assert!(center >= dist[1 * 11 + 1]);
        assert_eq!(dist[0], 0);
    }

    #[test]
    fn single_blob_is_left_untouched() {
        let mut binary = ImageMatrix::zeros(16, 16);
        for y in 4..12 {
            for x in 4..12 {
                binary.set(x, y, ImageMatrix::FOREGROUND);
            }
        }
        let before = binary.count_non_zero();
        split(&mut binary);
        assert_eq!(binary.count_non_zero(), before);
    }
}
