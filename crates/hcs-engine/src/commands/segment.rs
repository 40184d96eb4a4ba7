//! Connected-component extraction: labels a binary plane, traces contours,
//! and computes the geometric features of every component.

use hcs_core::roi::{BoundingBox, Point};
use hcs_core::{ClassId, ImageMatrix, Roi};

use crate::context::ProcessContext;

/// One extracted component in tile coordinates.
#[derive(Debug, Clone)]
pub struct Component {
    pub bbox: BoundingBox,
    /// Row-major 0/1 buffer covering the bounding box.
    pub mask: Vec<u8>,
    /// Contour points relative to the bounding box origin.
    pub contour: Vec<Point>,
    pub centroid: Point,
    pub area: f64,
    pub perimeter: f32,
    pub circularity: f32,
}

/// Extract all 8-connected foreground components of a binary plane.
pub fn find_objects(binary: &ImageMatrix) -> Vec<Component> {
    let (width, height) = (binary.width(), binary.height());
    let mut visited = vec![false; width * height];
    let mut components = Vec::new();

    for start_y in 0..height {
        for start_x in 0..width {
            let idx = start_y * width + start_x;
            if visited[idx] || binary.get(start_x, start_y) == 0 {
                continue;
            }

            // Flood fill the component.
            let mut stack = vec![(start_x, start_y)];
            visited[idx] = true;
            let mut pixels = Vec::new();
            let (mut min_x, mut min_y, mut max_x, mut max_y) =
                (start_x, start_y, start_x, start_y);
            let (mut sum_x, mut sum_y) = (0u64, 0u64);

            while let Some((x, y)) = stack.pop() {
                pixels.push((x, y));
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                sum_x += x as u64;
                sum_y += y as u64;

                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i32 + dx;
                        let ny = y as i32 + dy;
                        if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                            continue;
                        }
                        let nidx = ny as usize * width + nx as usize;
                        if !visited[nidx] && binary.get(nx as usize, ny as usize) > 0 {
                            visited[nidx] = true;
                            stack.push((nx as usize, ny as usize));
                        }
                    }
                }
            }

            let bbox = BoundingBox {
                x: min_x as i32,
                y: min_y as i32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            };
            let mut mask = vec![0u8; (bbox.width * bbox.height) as usize];
            for (x, y) in &pixels {
                mask[(y - min_y) * bbox.width as usize + (x - min_x)] = 1;
            }
            let area = pixels.len() as f64;
            let contour = trace_contour(&mask, bbox.width as usize, bbox.height as usize);
            let perimeter = contour_length(&contour);
            let circularity = if perimeter > 0.0 {
                ((4.0 * std::f64::consts::PI * area) / f64::from(perimeter * perimeter))
                    .min(1.0) as f32
            } else {
                1.0
            };

            components.push(Component {
                bbox,
                mask,
                contour,
                centroid: Point {
                    x: (sum_x / pixels.len() as u64) as i32,
                    y: (sum_y / pixels.len() as u64) as i32,
                },
                area,
                perimeter,
                circularity,
            });
        }
    }
    components
}

/// Moore-neighbor contour tracing, starting at the topmost-left foreground
/// pixel. Single-pixel components yield a one-point contour.
fn trace_contour(mask: &[u8], width: usize, height: usize) -> Vec<Point> {
    let at = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height
            && mask[y as usize * width + x as usize] > 0
    };

    let Some(start_idx) = mask.iter().position(|v| *v > 0) else {
        return Vec::new();
    };
    let start = Point { x: (start_idx % width) as i32, y: (start_idx / width) as i32 };

    // Clockwise Moore neighborhood, starting west.
    const NEIGHBORS: [(i32, i32); 8] =
        [(-1, 0), (-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1)];

    let mut contour = vec![start];
    let mut current = start;
    let mut backtrack = 0usize; // index into NEIGHBORS we entered from
    let max_steps = 4 * width * height;

    for _ in 0..max_steps {
        let mut found = None;
        for i in 0..8 {
            let dir = (backtrack + i) % 8;
            let (dx, dy) = NEIGHBORS[dir];
            if at(current.x + dx, current.y + dy) {
                found = Some((dir, Point { x: current.x + dx, y: current.y + dy }));
                break;
            }
        }
        let Some((dir, next)) = found else {
            break; // isolated pixel
        };
        if next == start && contour.len() > 1 {
            break;
        }
        contour.push(next);
        current = next;
        // Re-enter the scan two steps back from the direction we moved in.
        backtrack = (dir + 6) % 8;
    }
    contour
}

fn contour_length(contour: &[Point]) -> f32 {
    if contour.len() < 2 {
        return contour.len() as f32;
    }
    let mut length = 0f32;
    for pair in contour.windows(2) {
        let dx = (pair[1].x - pair[0].x) as f32;
        let dy = (pair[1].y - pair[0].y) as f32;
        length += (dx * dx + dy * dy).sqrt();
    }
    // Close the loop.
    let first = contour[0];
    let last = contour[contour.len() - 1];
    let dx = (first.x - last.x) as f32;
    let dy = (first.y - last.y) as f32;
    length + (dx * dx + dy * dy).sqrt()
}

/// Turn one component into an ROI of the given class, translating tile
/// coordinates into image-absolute ones.
pub fn build_roi(ctx: &ProcessContext<'_>, component: Component, class_id: ClassId) -> Roi {
    let offset_x = ctx.tile_region.x as i32;
    let offset_y = ctx.tile_region.y as i32;
    Roi {
        object_id: ctx.next_object_id(class_id),
        class_id,
        plane: ctx.plane,
        confidence: 1.0,
        bbox_tile: component.bbox,
        bbox: BoundingBox {
            x: component.bbox.x + offset_x,
            y: component.bbox.y + offset_y,
            width: component.bbox.width,
            height: component.bbox.height,
        },
        centroid_tile: component.centroid,
        centroid: Point {
            x: component.centroid.x + offset_x,
            y: component.centroid.y + offset_y,
        },
        mask: component.mask,
        contour: component.contour,
        area_size: component.area,
        perimeter: component.perimeter,
        circularity: component.circularity,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(width: usize, height: usize, foreground: &[(usize, usize)]) -> ImageMatrix {
        let mut image = ImageMatrix::zeros(width, height);
        for (x, y) in foreground {
            image.set(*x, *y, ImageMatrix::FOREGROUND);
        }
        image
    }

    #[test]
    fn two_separate_blobs_become_two_components() {
        let image = binary(8, 8, &[(1, 1), (1, 2), (2, 1), (2, 2), (6, 6)]);
        let components = find_objects(&image);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].area, 4.0);
        assert_eq!(components[1].area, 1.0);
    }

    #[test]
    fn square_features_are_computed() {
        // 4x4 square at (2,2).
        let mut cells = Vec::new();
        for y in 2..6 {
            for x in 2..6 {
                cells.push((x, y));
            }
        }
        let image = binary(10, 10, &cells);
        let components = find_objects(&image);
        assert_eq!(components.len(), 1);
        let c = &components[0];
        assert_eq!(c.area, 16.0);
        assert_eq!(c.bbox, BoundingBox { x: 2, y: 2, width: 4, height: 4 });
        assert_eq!(c.centroid, Point { x: 3, y: 3 });
        // Contour of a 4x4 square touches all 12 border pixels.
        assert_eq!(c.contour.len(), 12);
        assert!(c.circularity > 0.9);
    }

    #[test]
    fn diagonal_pixels_are_eight_connected() {
        let image = binary(4, 4, &[(0, 0), (1, 1), (2, 2)]);
        let components = find_objects(&image);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area, 3.0);
    }
}
