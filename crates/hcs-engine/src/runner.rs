//! The job scheduler.
//!
//! A job enumerates and prepares all images, then processes image tiles
//! under a single active axis of parallelism (images, tiles, or pipelines -
//! the largest axis wins) with the number of in-flight tiles bounded by
//! `min(cores, free_ram / tile_bytes)`. All writes of one tile complete
//! before the tile counts as done; a cancelled job drains running tiles and
//! never records a finished timestamp.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hcs_core::ids::image_id_from_path;
use hcs_core::ome::{ImageReader, TileRegion};
use hcs_core::settings::{AnalyzeSettings, Class, PipelineSettings};
use hcs_core::{ClassId, Error, ObjectList, PlaneId, Result};
use hcs_db::{Database, PreparedImage};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands;
use crate::context::{ImageContext, InferenceBackend, ProcessContext};
use crate::grouper::FileGrouper;
use crate::init::PipelineInitializer;
use crate::validity;

const IMAGE_PATTERNS: [&str; 5] = ["png", "tif", "tiff", "jpg", "jpeg"];

/// Cumulative tile counters of one job.
#[derive(Debug, Default)]
pub struct JobProgress {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobProgress {
    fn add_queued(&self, count: u64) {
        self.queued.fetch_add(count, Ordering::Relaxed);
    }

    fn tile_started(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    fn tile_finished(&self, ok: bool) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Which axis carries the parallelism of this job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParallelAxis {
    Images,
    Tiles,
    Pipelines,
}

/// Runs one analysis job against the store.
pub struct JobRunner {
    db: Arc<Database>,
    reader: Arc<dyn ImageReader>,
    settings: Arc<AnalyzeSettings>,
    inference: Option<Arc<dyn InferenceBackend>>,
    cancel: CancellationToken,
    progress: Arc<JobProgress>,
}

impl JobRunner {
    pub fn new(
        db: Arc<Database>,
        reader: Arc<dyn ImageReader>,
        settings: AnalyzeSettings,
    ) -> Self {
        Self {
            db,
            reader,
            settings: Arc::new(settings),
            inference: None,
            cancel: CancellationToken::new(),
            progress: Arc::new(JobProgress::default()),
        }
    }

    pub fn with_inference(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.inference = Some(backend);
        self
    }

    /// Token the caller cancels to stop the job cooperatively.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<JobProgress> {
        self.progress.clone()
    }

    /// Run the job to completion (or cancellation). Returns the job id.
    pub async fn start(&self, job_name: &str) -> Result<String> {
        let job_id = {
            let db = self.db.clone();
            let settings = self.settings.clone();
            let job_name = job_name.to_string();
            tokio::task::spawn_blocking(move || db.start_job(&settings, &job_name))
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("start job task: {e}")))??
        };

        let images = self.prepare_images().await?;
        if images.is_empty() {
            warn!("no images found, finishing empty job");
            self.db.finish_job(&job_id)?;
            return Ok(job_id);
        }

        let initializer = PipelineInitializer::new(&self.settings.image_setup);
        let n_pipelines = self.settings.pipelines.len().max(1);
        let max_tiles = images
            .iter()
            .map(|image| {
                let (tx, ty) = initializer.nr_of_tiles(&image.ome);
                (tx * ty) as usize
            })
            .max()
            .unwrap_or(1);

        // The largest axis wins all parallelism; one axis at a time avoids
        // thread explosion while reader contention dominates.
        let axis = if images.len() >= max_tiles.max(n_pipelines) {
            ParallelAxis::Images
        } else if max_tiles > n_pipelines {
            ParallelAxis::Tiles
        } else {
            ParallelAxis::Pipelines
        };

        // Back-pressure: never more in-flight tiles than memory allows.
        let cores = num_cpus::get().max(1) as u64;
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let free_ram = sys.available_memory();
        let tile_bytes = images
            .iter()
            .map(|image| initializer.tile_bytes(&image.ome))
            .max()
            .unwrap_or(1)
            .max(1);
        let max_in_flight = cores.min((free_ram / tile_bytes).max(1)).max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(max_in_flight));

        info!(
            images = images.len(),
            tiles = max_tiles,
            pipelines = n_pipelines,
            ?axis,
            max_in_flight,
            "job scheduling computed"
        );

        let classes: Arc<BTreeMap<ClassId, Class>> = Arc::new(
            self.settings
                .project_settings
                .classes
                .iter()
                .map(|c| (c.class_id, c.clone()))
                .collect(),
        );

        for image in &images {
            let (tiles_x, tiles_y) = initializer.nr_of_tiles(&image.ome);
            let t_count = initializer.nr_of_t_stacks_to_process(&image.ome);
            self.progress
                .add_queued(u64::from(tiles_x) * u64::from(tiles_y) * u64::from(t_count));
        }

        match axis {
            ParallelAxis::Images => {
                let mut join_set = JoinSet::new();
                for image in images {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let worker = self.image_worker(image, classes.clone(), semaphore.clone(), false);
                    join_set.spawn(worker);
                }
                while let Some(joined) = join_set.join_next().await {
                    if let Err(e) = joined {
                        error!("image worker panicked: {e}");
                    }
                }
            }
            ParallelAxis::Tiles => {
                for image in images {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.process_image_tiles_parallel(image, classes.clone(), semaphore.clone())
                        .await;
                }
            }
            ParallelAxis::Pipelines => {
                for image in images {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.image_worker(image, classes.clone(), semaphore.clone(), true).await;
                }
            }
        }

        if self.cancel.is_cancelled() {
            info!(job_id, "job cancelled, finished timestamp withheld");
            return Ok(job_id);
        }
        let db = self.db.clone();
        let finish_id = job_id.clone();
        tokio::task::spawn_blocking(move || db.finish_job(&finish_id))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("finish job task: {e}")))??;
        Ok(job_id)
    }

    /// Enumerate the plate's image folder, read the OME info of every file
    /// concurrently, assign groups deterministically in path order, and
    /// insert everything through the preparation appenders.
    async fn prepare_images(&self) -> Result<Vec<Arc<ImageContext>>> {
        let plate = &self.settings.project_settings.plate;
        let folder = PathBuf::from(&plate.image_folder);
        let series = self.settings.image_setup.series;

        let mut paths: Vec<PathBuf> = Vec::new();
        for extension in IMAGE_PATTERNS {
            let pattern = format!("{}/**/*.{extension}", folder.display());
            for entry in glob::glob(&pattern)
                .map_err(|e| Error::InvalidInput(format!("image folder pattern: {e}")))?
            {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!("unreadable path while scanning: {e}"),
                }
            }
        }
        paths.sort();
        paths.dedup();

        // Parallel metadata reads; assignments stay deterministic because
        // grouping happens afterwards in sorted path order.
        let mut join_set = JoinSet::new();
        for path in paths.clone() {
            let reader = self.reader.clone();
            join_set.spawn_blocking(move || {
                let ome = reader.ome_information(&path, series);
                (path, ome)
            });
        }
        let mut ome_by_path = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let (path, ome) = joined.map_err(|e| Error::Other(anyhow::anyhow!("prepare: {e}")))?;
            match ome {
                Ok(ome) => {
                    ome_by_path.insert(path, ome);
                }
                Err(e) => warn!(path = %path.display(), "skipping unreadable image: {e}"),
            }
        }

        let grouper = FileGrouper::new(plate.group_by, &plate.filename_regex)?;
        let mut prepared = Vec::new();
        let mut contexts = Vec::new();
        for path in paths {
            let Some(ome) = ome_by_path.remove(&path) else {
                continue;
            };
            let group = grouper.get_group_for_filename(&path);
            let image_id = image_id_from_path(&path);
            let relative_path = path
                .strip_prefix(&folder)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| path.to_string_lossy().to_string());
            prepared.push(PreparedImage {
                path: path.clone(),
                relative_path,
                ome: ome.clone(),
                image_id,
                group,
            });
            contexts.push(Arc::new(ImageContext::new(path, image_id, series, ome)));
        }

        let db = self.db.clone();
        let plate_id = plate.plate_id;
        tokio::task::spawn_blocking(move || db.prepare_images(plate_id, &prepared))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("prepare images task: {e}")))??;
        Ok(contexts)
    }

    /// Process one image with sequential tiles; used by the image axis and
    /// the pipeline axis (which parallelizes inside the tile).
    fn image_worker(
        &self,
        image: Arc<ImageContext>,
        classes: Arc<BTreeMap<ClassId, Class>>,
        semaphore: Arc<Semaphore>,
        parallel_pipelines: bool,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let db = self.db.clone();
        let reader = self.reader.clone();
        let settings = self.settings.clone();
        let inference = self.inference.clone();
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        async move {
            let initializer = PipelineInitializer::new(&settings.image_setup);
            let (tiles_x, tiles_y) = initializer.nr_of_tiles(&image.ome);
            let t_count = initializer.nr_of_t_stacks_to_process(&image.ome);

            for t_stack in 0..t_count {
                if cancel.is_cancelled() {
                    return;
                }
                for tile_y in 0..tiles_y {
                    for tile_x in 0..tiles_x {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let Ok(permit) = semaphore.clone().acquire_owned().await else {
                            return;
                        };
                        let task = TileTask {
                            db: db.clone(),
                            reader: reader.clone(),
                            settings: settings.clone(),
                            classes: classes.clone(),
                            inference: inference.clone(),
                            cancel: cancel.clone(),
                            image: image.clone(),
                            t_stack,
                            tile: (tile_x, tile_y),
                            parallel_pipelines,
                        };
                        progress.tile_started();
                        let result = tokio::task::spawn_blocking(move || {
                            let result = task.run();
                            drop(permit);
                            result
                        })
                        .await;
                        match result {
                            Ok(Ok(())) => progress.tile_finished(true),
                            Ok(Err(e)) => {
                                error!(image = %image.path.display(), "tile failed: {e}");
                                progress.tile_finished(false);
                            }
                            Err(e) => {
                                error!("tile task panicked: {e}");
                                progress.tile_finished(false);
                            }
                        }
                    }
                }
            }
            if let Err(e) = db.set_image_processed(image.image_id) {
                error!(image = %image.path.display(), "mark processed: {e}");
            }
        }
    }

    /// Process one image with its tiles in flight concurrently.
    async fn process_image_tiles_parallel(
        &self,
        image: Arc<ImageContext>,
        classes: Arc<BTreeMap<ClassId, Class>>,
        semaphore: Arc<Semaphore>,
    ) {
        let initializer = PipelineInitializer::new(&self.settings.image_setup);
        let (tiles_x, tiles_y) = initializer.nr_of_tiles(&image.ome);
        let t_count = initializer.nr_of_t_stacks_to_process(&image.ome);

        let mut join_set: JoinSet<std::result::Result<(), Error>> = JoinSet::new();
        for t_stack in 0..t_count {
            for tile_y in 0..tiles_y {
                for tile_x in 0..tiles_x {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let task = TileTask {
                        db: self.db.clone(),
                        reader: self.reader.clone(),
                        settings: self.settings.clone(),
                        classes: classes.clone(),
                        inference: self.inference.clone(),
                        cancel: self.cancel.clone(),
                        image: image.clone(),
                        t_stack,
                        tile: (tile_x, tile_y),
                        parallel_pipelines: false,
                    };
                    self.progress.tile_started();
                    join_set.spawn_blocking(move || {
                        let result = task.run();
                        drop(permit);
                        result
                    });
                }
            }
        }
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => self.progress.tile_finished(true),
                Ok(Err(e)) => {
                    error!(image = %image.path.display(), "tile failed: {e}");
                    self.progress.tile_finished(false);
                }
                Err(e) => {
                    error!("tile task panicked: {e}");
                    self.progress.tile_finished(false);
                }
            }
        }
        if let Err(e) = self.db.set_image_processed(image.image_id) {
            error!(image = %image.path.display(), "mark processed: {e}");
        }
    }
}

/// Everything one tile run needs; executes on the blocking pool.
struct TileTask {
    db: Arc<Database>,
    reader: Arc<dyn ImageReader>,
    settings: Arc<AnalyzeSettings>,
    classes: Arc<BTreeMap<ClassId, Class>>,
    inference: Option<Arc<dyn InferenceBackend>>,
    cancel: CancellationToken,
    image: Arc<ImageContext>,
    t_stack: u32,
    tile: (u32, u32),
    parallel_pipelines: bool,
}

impl TileTask {
    /// Run every pipeline over this tile, then bulk-append the collected
    /// objects as one unit.
    fn run(self) -> Result<()> {
        let initializer = PipelineInitializer::new(&self.settings.image_setup);
        let region = initializer.tile_region(&self.image.ome, self.tile);
        let objects = Arc::new(Mutex::new(ObjectList::new()));
        let run_cache = Arc::new(Mutex::new(HashMap::new()));

        if self.parallel_pipelines {
            let task = &self;
            std::thread::scope(|scope| {
                for pipeline in &task.settings.pipelines {
                    let objects = objects.clone();
                    let run_cache = run_cache.clone();
                    scope.spawn(move || {
                        task.run_pipeline(pipeline, &region, objects, run_cache);
                    });
                }
            });
        } else {
            for pipeline in &self.settings.pipelines {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.run_pipeline(pipeline, &region, objects.clone(), run_cache.clone());
            }
        }

        let objects = objects.lock().expect("object list lock");
        self.db.insert_objects(self.image.image_id, &objects)?;
        Ok(())
    }

    /// Run one pipeline's commands in order. A failing command marks the
    /// plane validity and ends this pipeline; the job continues.
    fn run_pipeline(
        &self,
        pipeline: &PipelineSettings,
        region: &TileRegion,
        objects: Arc<Mutex<ObjectList>>,
        run_cache: Arc<Mutex<HashMap<PlaneId, hcs_core::ImageMatrix>>>,
    ) {
        let initializer = PipelineInitializer::new(&self.settings.image_setup);
        // Channel binding clamped to what the image actually has.
        let c_stack =
            (pipeline.c_stack.max(0) as u32).min(self.image.ome.nr_of_channels.saturating_sub(1));
        let plane = PlaneId::new(c_stack, 0, self.t_stack);
        if let Err(e) = self.db.insert_image_plane(self.image.image_id, &plane) {
            warn!("plane bookkeeping: {e}");
        }

        let mut image = match initializer.load_plane_projected(
            self.reader.as_ref(),
            &self.image.path,
            &self.image.ome,
            self.image.series,
            plane.c_stack,
            self.t_stack,
            region,
            pipeline.z_projection,
        ) {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    image = %self.image.path.display(),
                    pipeline = %pipeline.name,
                    "plane read failed: {e}"
                );
                self.mark_invalid(&plane, validity::READ_ERROR);
                return;
            }
        };

        let mut ctx = ProcessContext::new(
            self.image.clone(),
            self.reader.as_ref(),
            plane,
            self.tile,
            *region,
            PathBuf::from(&self.settings.output_folder),
            pipeline.default_class_id,
            self.classes.clone(),
            objects,
            run_cache,
            self.inference.clone(),
        );

        for step in &pipeline.steps {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(e) = commands::execute_step(step, &mut ctx, &mut image) {
                warn!(
                    image = %self.image.path.display(),
                    pipeline = %pipeline.name,
                    "command failed: {e}"
                );
                self.mark_invalid(&plane, validity::PROCESSING_ERROR);
                return;
            }
        }
    }

    fn mark_invalid(&self, plane: &PlaneId, bits: u64) {
        if let Err(e) = self.db.set_image_plane_validity(self.image.image_id, plane, bits) {
            warn!("plane validity: {e}");
        }
        if let Err(e) = self.db.set_image_validity(self.image.image_id, bits) {
            warn!("image validity: {e}");
        }
    }
}
