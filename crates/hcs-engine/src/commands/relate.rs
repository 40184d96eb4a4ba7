//! Object relations: filtering, parent/child intersection, colocalization
//! tracking, intensity measurement, and distances.

use hcs_core::{ClassId, PlaneId, Result};
use tracing::debug;

use crate::context::{MemoryScope, ProcessContext};

/// Drop objects outside the area/circularity bounds.
pub fn object_filter(
    ctx: &ProcessContext<'_>,
    class_in: Option<ClassId>,
    min_area: f64,
    max_area: f64,
    min_circularity: f32,
) {
    let class_id = ctx.class_out_or_default(class_in);
    ctx.with_objects(|objects| {
        if let Some(rois) = objects.of_class_mut(class_id) {
            let before = rois.len();
            rois.retain(|roi| {
                roi.area_size >= min_area
                    && roi.area_size <= max_area
                    && roi.circularity >= min_circularity
            });
            debug!(class = %class_id, dropped = before - rois.len(), "object filter");
        }
    });
}

/// Link every child object to the parent covering it best, when the
/// coverage reaches the configured minimum.
pub fn intersection(
    ctx: &ProcessContext<'_>,
    parent_class: ClassId,
    child_class: ClassId,
    min_intersection: f64,
) {
    ctx.with_objects(|objects| {
        let mut children = objects.take_class(child_class);
        {
            let parents = objects.of_class(parent_class);
            for child in &mut children {
                let mut best: Option<(u64, f64)> = None;
                for parent in parents {
                    let coverage = child.intersection_coverage(parent);
                    if coverage >= min_intersection
                        && best.map(|(_, c)| coverage > c).unwrap_or(true)
                    {
                        best = Some((parent.object_id, coverage));
                    }
                }
                if let Some((parent_id, _)) = best {
                    child.parent_object_id = parent_id;
                }
            }
        }
        objects.insert_class(child_class, children);
    });
}

/// Assign one shared tracking id to objects of different classes that
/// overlap. The id is the smallest object id of the overlap group, which
/// keeps it stable across runs.
pub fn colocalization(ctx: &ProcessContext<'_>, classes: &[ClassId], min_intersection: f64) {
    ctx.with_objects(|objects| {
        // Snapshot (class, index, object) triples of the involved classes.
        let mut members: Vec<(ClassId, usize)> = Vec::new();
        for class_id in classes {
            for idx in 0..objects.of_class(*class_id).len() {
                members.push((*class_id, idx));
            }
        }

        // Union-find over overlapping pairs of different classes.
        let mut parent: Vec<usize> = (0..members.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let up = parent[i];
                let root = find(parent, up);
                parent[i] = root;
            }
            parent[i]
        }

        for a in 0..members.len() {
            for b in (a + 1)..members.len() {
                let (class_a, idx_a) = members[a];
                let (class_b, idx_b) = members[b];
                if class_a == class_b {
                    continue;
                }
                let roi_a = &objects.of_class(class_a)[idx_a];
                let roi_b = &objects.of_class(class_b)[idx_b];
                if roi_a.intersection_coverage(roi_b) >= min_intersection
                    || roi_b.intersection_coverage(roi_a) >= min_intersection
                {
                    let root_a = find(&mut parent, a);
                    let root_b = find(&mut parent, b);
                    if root_a != root_b {
                        parent[root_a] = root_b;
                    }
                }
            }
        }

        // Tracking id per group: the smallest member object id; groups of a
        // single class keep their zero tracking id.
        let mut group_id: std::collections::BTreeMap<usize, u64> =
            std::collections::BTreeMap::new();
        let mut group_classes: std::collections::BTreeMap<usize, std::collections::BTreeSet<ClassId>> =
            std::collections::BTreeMap::new();
        for i in 0..members.len() {
            let root = find(&mut parent, i);
            let (class_id, idx) = members[i];
            let object_id = objects.of_class(class_id)[idx].object_id;
            let entry = group_id.entry(root).or_insert(u64::MAX);
            *entry = (*entry).min(object_id);
            group_classes.entry(root).or_default().insert(class_id);
        }

        for i in 0..members.len() {
            let root = find(&mut parent, i);
            if group_classes[&root].len() < 2 {
                continue;
            }
            let tracking_id = group_id[&root];
            let (class_id, idx) = members[i];
            if let Some(rois) = objects.of_class_mut(class_id) {
                rois[idx].tracking_id = tracking_id;
            }
        }
    });
}

/// Measure per-plane intensity of the given classes over the requested
/// channels of the current Z/T.
///
/// Intensities always come from the pristine plane in the cache, never from
/// the working matrix a threshold may already have binarized.
pub fn measure_intensity(
    ctx: &mut ProcessContext<'_>,
    classes: &[ClassId],
    c_stacks: &[i32],
) -> Result<()> {
    for c_stack in c_stacks {
        let plane = PlaneId::new((*c_stack).max(0) as u32, ctx.plane.z_stack, ctx.plane.t_stack);
        let matrix = ctx.load_image_from_cache(MemoryScope::Iteration, plane)?;
        ctx.with_objects(|objects| {
            for class_id in classes {
                if let Some(rois) = objects.of_class_mut(*class_id) {
                    for roi in rois {
                        roi.measure_intensity(plane, &matrix);
                    }
                }
            }
        });
    }
    Ok(())
}

/// Measure the directed distances from every object of `class_from` to
/// every object of `class_to`.
pub fn distance(ctx: &ProcessContext<'_>, class_from: ClassId, class_to: ClassId) {
    ctx.with_objects(|objects| {
        let targets = objects.of_class(class_to).to_vec();
        if let Some(rois) = objects.of_class_mut(class_from) {
            for roi in rois {
                for target in &targets {
                    if roi.object_id == target.object_id {
                        continue;
                    }
                    roi.measure_distance(target);
                }
            }
        }
    });
}
