//! Thresholding: manual bounds or an automatic method computed on the
//! 256-bin histogram, followed by connected-component object emission.

use hcs_core::settings::ThresholdMethod;
use hcs_core::{ClassId, ImageMatrix, Result};

use crate::commands::segment;
use crate::context::ProcessContext;

/// Compute the lower threshold for an automatic method. The result lives in
/// the full 16-bit range (histogram bin << 8).
pub fn threshold_value(image: &ImageMatrix, method: ThresholdMethod, manual_min: u16) -> u16 {
    let histogram = image.histogram();
    let bin = match method {
        ThresholdMethod::Manual => return manual_min,
        ThresholdMethod::Otsu => otsu(&histogram),
        ThresholdMethod::Li => li(&histogram),
        ThresholdMethod::Triangle => triangle(&histogram),
        ThresholdMethod::Moments => moments(&histogram),
        ThresholdMethod::MinError => min_error(&histogram),
    };
    (bin as u16) << 8
}

pub fn run(
    ctx: &mut ProcessContext<'_>,
    image: &mut ImageMatrix,
    method: ThresholdMethod,
    min_threshold: u16,
    max_threshold: u16,
    class_out: Option<ClassId>,
) -> Result<()> {
    let lower = threshold_value(image, method, min_threshold);
    let upper = max_threshold.max(lower);

    for value in image.data_mut() {
        *value = if *value >= lower && *value <= upper {
            ImageMatrix::FOREGROUND
        } else {
            0
        };
    }

    let class_id = ctx.class_out_or_default(class_out);
    let rois = segment::find_objects(image)
        .into_iter()
        .map(|component| segment::build_roi(ctx, component, class_id))
        .collect::<Vec<_>>();
    ctx.with_objects(|objects| {
        for roi in rois {
            objects.push(roi);
        }
    });
    Ok(())
}

fn total_and_sum(histogram: &[u64; 256]) -> (f64, f64) {
    let total: u64 = histogram.iter().sum();
    let sum: f64 = histogram.iter().enumerate().map(|(i, c)| i as f64 * *c as f64).sum();
    (total as f64, sum)
}

/// Otsu's between-class variance maximization.
fn otsu(histogram: &[u64; 256]) -> usize {
    let (total, sum) = total_and_sum(histogram);
    if total == 0.0 {
        return 0;
    }
    let mut sum_b = 0f64;
    let mut weight_b = 0f64;
    let mut best = 0usize;
    let mut best_variance = 0f64;
    for (i, count) in histogram.iter().enumerate() {
        weight_b += *count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }
        sum_b += i as f64 * *count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f) * (mean_b - mean_f);
        if variance > best_variance {
            best_variance = variance;
            best = i;
        }
    }
    best
}

/// Li's iterative minimum cross entropy.
fn li(histogram: &[u64; 256]) -> usize {
    let (total, sum) = total_and_sum(histogram);
    if total == 0.0 {
        return 0;
    }
    let mut threshold = sum / total;
    for _ in 0..64 {
        let mut back_sum = 0f64;
        let mut back_cnt = 0f64;
        let mut fore_sum = 0f64;
        let mut fore_cnt = 0f64;
        for (i, count) in histogram.iter().enumerate() {
            let value = i as f64 * *count as f64;
            if (i as f64) <= threshold {
                back_sum += value;
                back_cnt += *count as f64;
            } else {
                fore_sum += value;
                fore_cnt += *count as f64;
            }
        }
        if back_cnt == 0.0 || fore_cnt == 0.0 {
            break;
        }
        let mean_b = (back_sum / back_cnt).max(1e-9);
        let mean_f = (fore_sum / fore_cnt).max(1e-9);
        let next = (mean_f - mean_b) / (mean_f.ln() - mean_b.ln());
        if (next - threshold).abs() < 0.5 {
            threshold = next;
            break;
        }
        threshold = next;
    }
    threshold.clamp(0.0, 255.0) as usize
}

/// Triangle method: the bin with the largest distance to the line between
/// the histogram peak and the far end.
fn triangle(histogram: &[u64; 256]) -> usize {
    let Some(peak) = (0..256).max_by_key(|i| histogram[*i]) else {
        return 0;
    };
    let first = (0..256).find(|i| histogram[*i] > 0).unwrap_or(0);
    let last = (0..256).rev().find(|i| histogram[*i] > 0).unwrap_or(255);
    // Walk the longer tail.
    let (from, to) = if peak - first >= last - peak { (first, peak) } else { (peak, last) };
    if from == to {
        return peak;
    }
    let peak_height = histogram[peak] as f64;
    let tail_end = if from == peak { to } else { from };
    let dx = tail_end as f64 - peak as f64;
    let dy = histogram[tail_end] as f64 - peak_height;
    let norm = (dx * dx + dy * dy).sqrt();
    let mut best = peak;
    let mut best_distance = 0f64;
    let range = if from == peak { peak..=to } else { from..=peak };
    for i in range {
        let distance =
            ((i as f64 - peak as f64) * dy - (histogram[i] as f64 - peak_height) * dx).abs() / norm;
        if distance > best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}

/// Tsai's moment-preserving threshold.
fn moments(histogram: &[u64; 256]) -> usize {
    let total: f64 = histogram.iter().sum::<u64>() as f64;
    if total == 0.0 {
        return 0;
    }
    let m1: f64 =
        histogram.iter().enumerate().map(|(i, c)| i as f64 * *c as f64).sum::<f64>() / total;
    let m2: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, c)| (i as f64).powi(2) * *c as f64)
        .sum::<f64>()
        / total;
    let m3: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, c)| (i as f64).powi(3) * *c as f64)
        .sum::<f64>()
        / total;

    let cd = m2 - m1 * m1;
    if cd.abs() < 1e-12 {
        return m1 as usize;
    }
    let c0 = (-m2 * m2 + m1 * m3) / cd;
    let c1 = (m1 * m2 - m3) / cd;
    let discriminant = (c1 * c1 / 4.0 - c0).max(0.0).sqrt();
    let z0 = -c1 / 2.0 - discriminant;
    let z1 = -c1 / 2.0 + discriminant;
    if (z1 - z0).abs() < 1e-12 {
        return m1 as usize;
    }
    // Fraction of pixels below the threshold that preserves the moments.
    let p0 = (z1 - m1) / (z1 - z0);
    let target = p0 * total;
    let mut cumulative = 0f64;
    for (i, count) in histogram.iter().enumerate() {
        cumulative += *count as f64;
        if cumulative >= target {
            return i;
        }
    }
    255
}

/// Kittler-Illingworth minimum error thresholding.
fn min_error(histogram: &[u64; 256]) -> usize {
    let total: f64 = histogram.iter().sum::<u64>() as f64;
    if total == 0.0 {
        return 0;
    }
    let mut best = 0usize;
    let mut best_criterion = f64::INFINITY;
    for t in 0..255 {
        let (mut w0, mut s0, mut q0) = (0f64, 0f64, 0f64);
        for (i, c) in histogram.iter().enumerate().take(t + 1) {
            w0 += *c as f64;
            s0 += i as f64 * *c as f64;
            q0 += (i as f64).powi(2) * *c as f64;
        }
        let w1 = total - w0;
        if w0 < 1.0 || w1 < 1.0 {
            continue;
        }
        let (mut s1, mut q1) = (0f64, 0f64);
        for (i, c) in histogram.iter().enumerate().skip(t + 1) {
            s1 += i as f64 * *c as f64;
            q1 += (i as f64).powi(2) * *c as f64;
        }
        let mu0 = s0 / w0;
        let mu1 = s1 / w1;
        let var0 = (q0 / w0 - mu0 * mu0).max(1e-9);
        let var1 = (q1 / w1 - mu1 * mu1).max(1e-9);
        let p0 = w0 / total;
        let p1 = w1 / total;
        let criterion =
            1.0 + 2.0 * (p0 * var0.sqrt().ln() + p1 * var1.sqrt().ln())
                - 2.0 * (p0 * p0.ln() + p1 * p1.ln());
        if criterion < best_criterion {
            best_criterion = criterion;
            best = t;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bimodal_image() -> ImageMatrix {
        // Half dark (around bin 10), half bright (around bin 200).
        let mut data = Vec::new();
        for i in 0..512u32 {
            if i % 2 == 0 {
                data.push((10u16 << 8) + (i % 3) as u16);
            } else {
                data.push((200u16 << 8) + (i % 3) as u16);
            }
        }
        ImageMatrix::from_vec(32, 16, data).unwrap()
    }

    #[test]
    fn otsu_separates_a_bimodal_histogram() {
        let image = bimodal_image();
        let threshold = threshold_value(&image, ThresholdMethod::Otsu, 0);
        assert!(threshold > 10 << 8);
        assert!(threshold < 200 << 8);
    }

    #[test]
    fn li_and_min_error_land_between_the_modes() {
        let image = bimodal_image();
        for method in [ThresholdMethod::Li, ThresholdMethod::MinError, ThresholdMethod::Moments] {
            let threshold = threshold_value(&image, method, 0);
            assert!(threshold > 10 << 8, "{method:?} too low: {threshold}");
            assert!(threshold < 200 << 8, "{method:?} too high: {threshold}");
        }
    }

    #[test]
    fn manual_threshold_is_passed_through() {
        let image = bimodal_image();
        assert_eq!(threshold_value(&image, ThresholdMethod::Manual, 1234), 1234);
    }
}
