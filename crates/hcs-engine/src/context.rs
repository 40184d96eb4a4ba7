//! Per-tile execution state shared by the pipeline commands.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hcs_core::ids::object_id;
use hcs_core::ome::{ImageReader, OmeInfo, TileRegion};
use hcs_core::settings::Class;
use hcs_core::{ClassId, ImageMatrix, ObjectList, PlaneId, Result, Roi, Tile};

/// Lifetime of a cached plane: `Iteration` lives within one pipeline run,
/// `Run` across all pipelines of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Iteration,
    Run,
}

/// Port for the AI segmentation backend. The engine treats inference as a
/// long blocking call; absence of a backend records a tile error.
pub trait InferenceBackend: Send + Sync {
    fn run(
        &self,
        model_path: &str,
        image: &ImageMatrix,
        min_confidence: f32,
    ) -> Result<Vec<Roi>>;
}

/// Immutable per-image state shared by all tiles of one image.
pub struct ImageContext {
    pub path: PathBuf,
    pub image_id: u64,
    pub series: u32,
    pub ome: OmeInfo,
    /// Monotonic object sequence making object ids stable per image.
    object_seq: AtomicU64,
}

impl ImageContext {
    pub fn new(path: PathBuf, image_id: u64, series: u32, ome: OmeInfo) -> Self {
        Self { path, image_id, series, ome, object_seq: AtomicU64::new(0) }
    }

    pub fn next_object_id(&self, class_id: ClassId) -> u64 {
        let seq = self.object_seq.fetch_add(1, Ordering::Relaxed);
        object_id(self.image_id, class_id, seq)
    }
}

/// Per-tile, per-pipeline execution state handed to every command.
///
/// The object list and the run-scope cache are shared across the pipelines
/// of one tile; the iteration cache belongs to this pipeline alone.
pub struct ProcessContext<'a> {
    pub image: Arc<ImageContext>,
    pub reader: &'a dyn ImageReader,
    /// Active plane identity (C bound by the pipeline, current Z/T).
    pub plane: PlaneId,
    pub tile: Tile,
    pub tile_region: TileRegion,
    pub output_folder: PathBuf,
    pub default_class_id: ClassId,
    classes: Arc<BTreeMap<ClassId, Class>>,
    objects: Arc<Mutex<ObjectList>>,
    iteration_cache: HashMap<PlaneId, ImageMatrix>,
    run_cache: Arc<Mutex<HashMap<PlaneId, ImageMatrix>>>,
    inference: Option<Arc<dyn InferenceBackend>>,
}

impl<'a> ProcessContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image: Arc<ImageContext>,
        reader: &'a dyn ImageReader,
        plane: PlaneId,
        tile: Tile,
        tile_region: TileRegion,
        output_folder: PathBuf,
        default_class_id: ClassId,
        classes: Arc<BTreeMap<ClassId, Class>>,
        objects: Arc<Mutex<ObjectList>>,
        run_cache: Arc<Mutex<HashMap<PlaneId, ImageMatrix>>>,
        inference: Option<Arc<dyn InferenceBackend>>,
    ) -> Self {
        Self {
            image,
            reader,
            plane,
            tile,
            tile_region,
            output_folder,
            default_class_id,
            classes,
            objects,
            iteration_cache: HashMap::new(),
            run_cache,
            inference,
        }
    }

    pub fn act_image_path(&self) -> &Path {
        &self.image.path
    }

    /// Size of the active tile in pixels.
    pub fn image_size(&self) -> (u32, u32) {
        (self.tile_region.width, self.tile_region.height)
    }

    /// Class id bound to steps that do not name one.
    pub fn class_out_or_default(&self, class_out: Option<ClassId>) -> ClassId {
        class_out.unwrap_or(self.default_class_id)
    }

    pub fn class(&self, class_id: ClassId) -> Option<&Class> {
        self.classes.get(&class_id)
    }

    /// Resolve a class by its project name.
    pub fn class_id_of(&self, name: &str) -> Option<ClassId> {
        self.classes
            .values()
            .find(|class| class.name == name || class.short_name == name)
            .map(|class| class.class_id)
    }

    /// Display color of a class, `#RRGGBB`.
    pub fn color_of_class(&self, class_id: ClassId) -> String {
        self.classes
            .get(&class_id)
            .map(|c| c.color.clone())
            .unwrap_or_else(|| "#FF0000".to_string())
    }

    pub fn next_object_id(&self, class_id: ClassId) -> u64 {
        self.image.next_object_id(class_id)
    }

    /// Run a closure over the shared object list.
    pub fn with_objects<R>(&self, f: impl FnOnce(&mut ObjectList) -> R) -> R {
        let mut guard = self.objects.lock().expect("object list lock");
        f(&mut guard)
    }

    pub fn inference_backend(&self) -> Option<&Arc<dyn InferenceBackend>> {
        self.inference.as_ref()
    }

    /// Store a plane under the given scope.
    pub fn store_to_cache(&mut self, scope: MemoryScope, plane: PlaneId, image: ImageMatrix) {
        match scope {
            MemoryScope::Iteration => {
                self.iteration_cache.insert(plane, image);
            }
            MemoryScope::Run => {
                self.run_cache.lock().expect("run cache lock").insert(plane, image);
            }
        }
    }

    /// Load a plane from the caches (iteration first), falling back to the
    /// reader and caching the result in the requested scope.
    pub fn load_image_from_cache(
        &mut self,
        scope: MemoryScope,
        plane: PlaneId,
    ) -> Result<ImageMatrix> {
        if let Some(cached) = self.iteration_cache.get(&plane) {
            return Ok(cached.clone());
        }
        if let Some(cached) = self.run_cache.lock().expect("run cache lock").get(&plane) {
            return Ok(cached.clone());
        }
        let image = self.reader.load_image_tile(
            &self.image.path,
            &plane,
            self.image.series,
            &self.tile_region,
        )?;
        self.store_to_cache(scope, plane, image.clone());
        Ok(image)
    }
}
