//! Result-table settings: the ordered column map driving SQL generation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{column_sort_key, ClassId};
use crate::settings::enums::{MeasureType, Measurement, Stats, TStackHandling};
use crate::settings::project::PlateSetup;

/// Display names attached to a column; not part of column identity.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnNames {
    #[serde(default)]
    pub cross_channel_name: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub intersecting_name: String,
}

/// Identity of one requested result column.
///
/// Equality and ordering ignore the display [`ColumnNames`]; ordering uses
/// the 128-bit composite sort key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnKey {
    pub class_id: ClassId,
    #[serde(default)]
    pub measure: Measurement,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default = "default_cross_channel")]
    pub cross_channel_c: i32,
    #[serde(default = "default_intersecting")]
    pub intersecting_class: ClassId,
    #[serde(default)]
    pub z_stack: i32,
    #[serde(default)]
    pub t_stack: i32,
    #[serde(default)]
    pub names: ColumnNames,
}

fn default_cross_channel() -> i32 {
    -1
}

fn default_intersecting() -> ClassId {
    ClassId::NONE
}

impl ColumnKey {
    pub fn sort_key(&self) -> u128 {
        column_sort_key(
            self.class_id,
            self.t_stack,
            self.z_stack,
            self.measure.code(),
            self.stats.code(),
            self.cross_channel_c,
            self.intersecting_class,
        )
    }

    /// Human-readable header of the column.
    pub fn create_header(&self) -> String {
        let stacks = format!("{{Z{}/T{}}}", self.z_stack, self.t_stack);
        let stats_header = if self.stats != Stats::Off {
            format!("[{}]", self.stats.display_name())
        } else {
            String::new()
        };
        match self.measure.measure_type() {
            MeasureType::Intensity => format!(
                "{}-{}{} (C{}){}",
                self.names.class_name,
                self.measure.display_name(),
                stats_header,
                self.cross_channel_c,
                stacks
            ),
            MeasureType::Intersection => format!(
                "Intersection {} in {}{}{}",
                self.names.intersecting_name, self.names.class_name, stats_header, stacks
            ),
            MeasureType::Id => {
                format!("{}-{}\n{}", self.names.class_name, self.measure.display_name(), stacks)
            }
            MeasureType::Distance => format!(
                "{} to {}-{}{}{}",
                self.names.class_name,
                self.names.intersecting_name,
                self.measure.display_name(),
                stats_header,
                stacks
            ),
            MeasureType::DistanceId => format!(
                "{} to {}-{}{}",
                self.names.class_name,
                self.names.intersecting_name,
                self.measure.display_name(),
                stacks
            ),
            _ => format!(
                "{}-{}{}{}",
                self.names.class_name,
                self.measure.display_name(),
                stats_header,
                stacks
            ),
        }
    }
}

impl PartialEq for ColumnKey {
    fn eq(&self, other: &Self) -> bool {
        self.class_id == other.class_id
            && self.measure == other.measure
            && self.stats == other.stats
            && self.cross_channel_c == other.cross_channel_c
            && self.intersecting_class == other.intersecting_class
            && self.z_stack == other.z_stack
            && self.t_stack == other.t_stack
    }
}

impl Eq for ColumnKey {}

impl PartialOrd for ColumnKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColumnKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::hash::Hash for ColumnKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

/// Position of a column inside the tabbed result view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ColumnIdx {
    #[serde(default)]
    pub tab_idx: i32,
    #[serde(default)]
    pub col_idx: i32,
}

impl ColumnIdx {
    pub fn new(tab_idx: i32, col_idx: i32) -> Self {
        Self { tab_idx, col_idx }
    }
}

/// Scope a query runs over. Transient; never persisted with the settings.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    pub plate_id: u8,
    pub group_id: u16,
    pub image_ids: BTreeSet<u64>,
    pub t_stack: i32,
    pub t_stack_handling: TStackHandling,
}

/// Bucketing configuration of the per-image density heatmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityMapSettings {
    #[serde(default = "default_density_area")]
    pub density_map_area_size: u32,
}

fn default_density_area() -> u32 {
    256
}

impl Default for DensityMapSettings {
    fn default() -> Self {
        Self { density_map_area_size: default_density_area() }
    }
}

mod columns_serde {
    //! The column map is keyed by a struct; JSON wants string keys, so the
    //! map travels as a list of (idx, key) entries.

    use super::{ColumnIdx, ColumnKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        idx: ColumnIdx,
        key: ColumnKey,
    }

    pub fn serialize<S: Serializer>(
        columns: &BTreeMap<ColumnIdx, ColumnKey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = columns
            .iter()
            .map(|(idx, key)| Entry { idx: *idx, key: key.clone() })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ColumnIdx, ColumnKey>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.idx, e.key)).collect())
    }
}

/// The ordered map of requested result columns plus the query scope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResultsSettings {
    #[serde(with = "columns_serde", default)]
    columns: BTreeMap<ColumnIdx, ColumnKey>,
    #[serde(default)]
    plate_setup: PlateSetup,
    #[serde(default)]
    density_map_settings: DensityMapSettings,
    #[serde(skip)]
    filter: ObjectFilter,
}

impl ResultsSettings {
    /// Add a column under the given index. The same column request must not
    /// appear twice; a duplicate (by key equality, display names ignored) is
    /// rejected and `false` is returned.
    pub fn add_column(&mut self, idx: ColumnIdx, key: ColumnKey) -> bool {
        if self.columns.values().any(|existing| *existing == key) {
            return false;
        }
        self.columns.insert(idx, key);
        true
    }

    /// Remove a column and close the index gap within its tab.
    pub fn erase_column(&mut self, idx: ColumnIdx) {
        if self.columns.remove(&idx).is_none() {
            return;
        }
        let mut renumbered = BTreeMap::new();
        for (col, key) in std::mem::take(&mut self.columns) {
            let mut col_new = col;
            if col.tab_idx == idx.tab_idx && col.col_idx > idx.col_idx {
                col_new.col_idx -= 1;
            }
            renumbered.insert(col_new, key);
        }
        self.columns = renumbered;
    }

    pub fn columns(&self) -> &BTreeMap<ColumnIdx, ColumnKey> {
        &self.columns
    }

    pub fn filter(&self) -> &ObjectFilter {
        &self.filter
    }

    pub fn plate_setup(&self) -> &PlateSetup {
        &self.plate_setup
    }

    pub fn density_map_settings(&self) -> &DensityMapSettings {
        &self.density_map_settings
    }

    pub fn set_filter(
        &mut self,
        filter: ObjectFilter,
        plate_setup: PlateSetup,
        density_map: DensityMapSettings,
    ) {
        self.filter = filter;
        self.plate_setup = plate_setup;
        self.density_map_settings = density_map;
    }

    pub fn set_object_filter(&mut self, filter: ObjectFilter) {
        self.filter = filter;
    }

    pub fn set_density_map_settings(&mut self, settings: DensityMapSettings) {
        self.density_map_settings = settings;
    }

    /// Re-sort columns by their composite key, renumbering per tab.
    pub fn sort_columns(&mut self) {
        let mut data: Vec<(ColumnIdx, ColumnKey)> =
            std::mem::take(&mut self.columns).into_iter().collect();
        data.sort_by(|a, b| a.1.cmp(&b.1));

        let mut col_idx = 0;
        let mut act_tab = 0;
        for (idx, key) in data {
            if act_tab != idx.tab_idx {
                col_idx = 0;
                act_tab = idx.tab_idx;
            }
            self.columns.insert(ColumnIdx::new(idx.tab_idx, col_idx), key);
            col_idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(measure: Measurement, stats: Stats) -> ColumnKey {
        ColumnKey {
            class_id: ClassId(1),
            measure,
            stats,
            cross_channel_c: -1,
            intersecting_class: ClassId::NONE,
            z_stack: 0,
            t_stack: 0,
            names: ColumnNames {
                class_name: "nucleus".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let mut settings = ResultsSettings::default();
        assert!(settings.add_column(ColumnIdx::new(0, 0), key(Measurement::AreaSize, Stats::Avg)));
        // Identical key under a different index, even with other display names.
        let mut dup = key(Measurement::AreaSize, Stats::Avg);
        dup.names.class_name = "other".into();
        assert!(!settings.add_column(ColumnIdx::new(0, 1), dup));
        assert_eq!(settings.columns().len(), 1);
    }

    #[test]
    fn equality_ignores_display_names() {
        let mut a = key(Measurement::Perimeter, Stats::Avg);
        let mut b = key(Measurement::Perimeter, Stats::Avg);
        a.names.class_name = "x".into();
        b.names.class_name = "y".into();
        assert_eq!(a, b);
    }

    #[test]
    fn erase_column_closes_the_gap() {
        let mut settings = ResultsSettings::default();
        settings.add_column(ColumnIdx::new(0, 0), key(Measurement::AreaSize, Stats::Avg));
        settings.add_column(ColumnIdx::new(0, 1), key(Measurement::Perimeter, Stats::Avg));
        settings.add_column(ColumnIdx::new(0, 2), key(Measurement::Circularity, Stats::Avg));
        settings.erase_column(ColumnIdx::new(0, 1));
        let indexes: Vec<i32> = settings.columns().keys().map(|c| c.col_idx).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let mut settings = ResultsSettings::default();
        settings.add_column(ColumnIdx::new(0, 0), key(Measurement::AreaSize, Stats::Median));
        let json = serde_json::to_string(&settings).unwrap();
        let back: ResultsSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.columns().len(), 1);
        assert_eq!(
            back.columns()[&ColumnIdx::new(0, 0)].measure,
            Measurement::AreaSize
        );
    }
}
