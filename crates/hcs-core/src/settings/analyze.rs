//! The root analysis document: project, image setup, and pipelines.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::ClassId;
use crate::settings::enums::{Measurement, Stats};
use crate::settings::pipeline::{PipelineSettings, PipelineStep};
use crate::settings::project::{Class, ExperimentSettings, ImageSetup, Plate};
use crate::settings::results::{ColumnIdx, ColumnKey, ColumnNames, ResultsSettings};

/// Project-scoped parts of the analysis document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectSettings {
    pub experiment_settings: ExperimentSettings,
    #[serde(default)]
    pub classes: Vec<Class>,
    pub plate: Plate,
}

/// Everything one analysis job needs: the settings document stored alongside
/// the job row.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalyzeSettings {
    pub project_settings: ProjectSettings,
    #[serde(default)]
    pub image_setup: ImageSetup,
    #[serde(default)]
    pub pipelines: Vec<PipelineSettings>,
    /// Folder control images and exports are written to.
    #[serde(default)]
    pub output_folder: String,
}

impl AnalyzeSettings {
    /// Serialize to the human-readable text form kept (base64-encoded) in
    /// the store.
    pub fn to_json_string(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidInput(format!("settings serialize: {e}")))
    }

    pub fn from_json_string(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::Error::InvalidInput(format!("settings parse: {e}")))
    }

    /// Look up a project class by id.
    pub fn class(&self, class_id: ClassId) -> Option<&Class> {
        self.project_settings.classes.iter().find(|c| c.class_id == class_id)
    }

    fn step_output_class(pipeline: &PipelineSettings, class_out: &Option<ClassId>) -> ClassId {
        class_out.unwrap_or(pipeline.default_class_id)
    }

    /// Classes any pipeline step can emit objects for.
    pub fn output_classes(&self) -> BTreeSet<ClassId> {
        let mut classes = BTreeSet::new();
        for pipeline in &self.pipelines {
            for step in &pipeline.steps {
                match step {
                    PipelineStep::Threshold { class_out, .. }
                    | PipelineStep::AiInference { class_out, .. } => {
                        classes.insert(Self::step_output_class(pipeline, class_out));
                    }
                    _ => {}
                }
            }
        }
        classes
    }

    /// Image channels measured per class.
    pub fn image_channels_used_for_measurement(&self) -> BTreeMap<ClassId, BTreeSet<i32>> {
        let mut map: BTreeMap<ClassId, BTreeSet<i32>> = BTreeMap::new();
        for pipeline in &self.pipelines {
            for step in &pipeline.steps {
                if let PipelineStep::MeasureIntensity { classes, c_stacks } = step {
                    for class in classes {
                        map.entry(*class).or_default().extend(c_stacks.iter().copied());
                    }
                }
            }
        }
        map
    }

    /// Parent class to child classes that may intersect with it.
    pub fn possible_intersecting_classes(&self) -> BTreeMap<ClassId, BTreeSet<ClassId>> {
        let mut map: BTreeMap<ClassId, BTreeSet<ClassId>> = BTreeMap::new();
        for pipeline in &self.pipelines {
            for step in &pipeline.steps {
                if let PipelineStep::Intersection { parent_class, child_class, .. } = step {
                    map.entry(*parent_class).or_default().insert(*child_class);
                }
            }
        }
        map
    }

    /// Class to the classes distances are measured against.
    pub fn possible_distance_classes(&self) -> BTreeMap<ClassId, BTreeSet<ClassId>> {
        let mut map: BTreeMap<ClassId, BTreeSet<ClassId>> = BTreeMap::new();
        for pipeline in &self.pipelines {
            for step in &pipeline.steps {
                if let PipelineStep::Distance { class_from, class_to } = step {
                    map.entry(*class_from).or_default().insert(*class_to);
                }
            }
        }
        map
    }

    /// Default result table derived from the document: per output class a
    /// count plus the basic geometry, intensities for every measured
    /// channel, and the configured intersections and distances.
    pub fn to_results_settings(&self) -> ResultsSettings {
        let mut settings = ResultsSettings::default();
        let measured = self.image_channels_used_for_measurement();
        let intersecting = self.possible_intersecting_classes();
        let distances = self.possible_distance_classes();

        let mut col = 0;
        let mut add = |settings: &mut ResultsSettings, key: ColumnKey| {
            if settings.add_column(ColumnIdx::new(0, col), key) {
                col += 1;
            }
        };

        for class_id in self.output_classes() {
            let class_name =
                self.class(class_id).map(|c| c.name.clone()).unwrap_or_default();
            let names = ColumnNames { class_name: class_name.clone(), ..Default::default() };
            let base = ColumnKey {
                class_id,
                names: names.clone(),
                ..Default::default()
            };

            for (measure, stats) in [
                (Measurement::Count, Stats::Sum),
                (Measurement::AreaSize, Stats::Avg),
                (Measurement::Perimeter, Stats::Avg),
                (Measurement::Circularity, Stats::Avg),
            ] {
                add(&mut settings, ColumnKey { measure, stats, ..base.clone() });
            }

            if let Some(channels) = measured.get(&class_id) {
                for c_stack in channels {
                    add(
                        &mut settings,
                        ColumnKey {
                            measure: Measurement::IntensityAvg,
                            stats: Stats::Avg,
                            cross_channel_c: *c_stack,
                            ..base.clone()
                        },
                    );
                }
            }

            if let Some(children) = intersecting.get(&class_id) {
                for child in children {
                    let child_name =
                        self.class(*child).map(|c| c.name.clone()).unwrap_or_default();
                    add(
                        &mut settings,
                        ColumnKey {
                            measure: Measurement::Intersecting,
                            stats: Stats::Avg,
                            intersecting_class: *child,
                            names: ColumnNames {
                                class_name: class_name.clone(),
                                intersecting_name: child_name,
                                ..Default::default()
                            },
                            ..base.clone()
                        },
                    );
                }
            }

            if let Some(targets) = distances.get(&class_id) {
                for target in targets {
                    let target_name =
                        self.class(*target).map(|c| c.name.clone()).unwrap_or_default();
                    add(
                        &mut settings,
                        ColumnKey {
                            measure: Measurement::DistanceCenterToCenter,
                            stats: Stats::Avg,
                            intersecting_class: *target,
                            names: ColumnNames {
                                class_name: class_name.clone(),
                                intersecting_name: target_name,
                                ..Default::default()
                            },
                            ..base.clone()
                        },
                    );
                }
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::pipeline::ThresholdMethod;

    fn settings_with_pipeline() -> AnalyzeSettings {
        let mut settings = AnalyzeSettings::default();
        settings.project_settings.classes = vec![
            Class { class_id: ClassId(1), name: "nucleus".into(), ..Default::default() },
            Class { class_id: ClassId(2), name: "spot".into(), ..Default::default() },
        ];
        settings.pipelines.push(PipelineSettings {
            name: "nuclei".into(),
            default_class_id: ClassId(1),
            c_stack: 0,
            steps: vec![
                PipelineStep::Threshold {
                    method: ThresholdMethod::Otsu,
                    min_threshold: 0,
                    max_threshold: u16::MAX,
                    class_out: None,
                },
                PipelineStep::MeasureIntensity { classes: vec![ClassId(1)], c_stacks: vec![0, 1] },
                PipelineStep::Intersection {
                    parent_class: ClassId(1),
                    child_class: ClassId(2),
                    min_intersection: 0.1,
                },
                PipelineStep::Distance { class_from: ClassId(1), class_to: ClassId(2) },
            ],
            ..Default::default()
        });
        settings
    }

    #[test]
    fn derived_maps_follow_the_pipeline_steps() {
        let settings = settings_with_pipeline();
        assert!(settings.output_classes().contains(&ClassId(1)));
        assert_eq!(
            settings.image_channels_used_for_measurement()[&ClassId(1)],
            BTreeSet::from([0, 1])
        );
        assert!(settings.possible_intersecting_classes()[&ClassId(1)].contains(&ClassId(2)));
        assert!(settings.possible_distance_classes()[&ClassId(1)].contains(&ClassId(2)));
    }

    #[test]
    fn default_results_table_has_no_duplicate_columns() {
        let settings = settings_with_pipeline();
        let results = settings.to_results_settings();
        let keys: Vec<_> = results.columns().values().collect();
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
