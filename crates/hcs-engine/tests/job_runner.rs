//! End-to-end job execution over real PNG fixtures and a real store.

use std::path::Path;
use std::sync::Arc;

use hcs_core::ids::generate_uuid;
use hcs_core::settings::{
    AnalyzeSettings, Class, GroupBy, PipelineSettings, PipelineStep, ThresholdMethod,
};
use hcs_core::ClassId;
use hcs_db::Database;
use hcs_engine::{FileImageReader, JobRunner};

/// Write a 16-bit grayscale PNG with bright squares on a dark background.
fn write_fixture(path: &Path, squares: &[(u32, u32)]) {
    let mut img = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_pixel(64, 64, image::Luma([1000u16]));
    for (sx, sy) in squares {
        for y in *sy..(*sy + 8).min(64) {
            for x in *sx..(*sx + 8).min(64) {
                img.put_pixel(x, y, image::Luma([60000u16]));
            }
        }
    }
    img.save(path).unwrap();
}

fn test_settings(image_folder: &Path, output_folder: &Path) -> AnalyzeSettings {
    let mut settings = AnalyzeSettings::default();
    settings.project_settings.experiment_settings.experiment_id = generate_uuid();
    settings.project_settings.experiment_settings.experiment_name = "e2e".into();
    settings.project_settings.classes =
        vec![Class { class_id: ClassId(1), name: "blob".into(), ..Default::default() }];
    settings.project_settings.plate.image_folder = image_folder.to_string_lossy().to_string();
    settings.project_settings.plate.group_by = GroupBy::Directory;
    settings.output_folder = output_folder.to_string_lossy().to_string();
    settings.pipelines.push(PipelineSettings {
        name: "blobs".into(),
        default_class_id: ClassId(1),
        c_stack: 0,
        steps: vec![
            PipelineStep::Threshold {
                method: ThresholdMethod::Manual,
                min_threshold: 30000,
                max_threshold: u16::MAX,
                class_out: None,
            },
            PipelineStep::MeasureIntensity { classes: vec![ClassId(1)], c_stacks: vec![0] },
        ],
        ..Default::default()
    });
    settings
}

#[tokio::test(flavor = "multi_thread")]
async fn job_detects_objects_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("images");
    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&image_dir).unwrap();

    write_fixture(&image_dir.join("img_a.png"), &[(4, 4), (30, 30)]);
    write_fixture(&image_dir.join("img_b.png"), &[(10, 40)]);

    let db = Arc::new(Database::open(&dir.path().join("results.db")).unwrap());
    let settings = test_settings(&image_dir, &out_dir);
    let runner = JobRunner::new(db.clone(), Arc::new(FileImageReader::new()), settings);

    let job_id = runner.start("e2e-job").await.unwrap();

    let images = db.select_images().unwrap();
    assert_eq!(images.len(), 2);

    let image_a = db.select_image_id_from_file_name("img_a.png").unwrap();
    let image_b = db.select_image_id_from_file_name("img_b.png").unwrap();
    assert_eq!(db.count_objects(image_a, Some(ClassId(1))).unwrap(), 2);
    assert_eq!(db.count_objects(image_b, Some(ClassId(1))).unwrap(), 1);

    // Intensity measurements exist for every object.
    let measured: i64 = db
        .select_rows(
            "SELECT COUNT(*) FROM object_measurements WHERE meas_stack_c = 0",
            &[],
            |row| row.get(0),
        )
        .unwrap()[0];
    assert_eq!(measured, 3);

    // The job is finalized and all images are marked processed.
    let meta = db.select_experiment().unwrap();
    assert_eq!(meta.job_id, job_id);
    assert!(meta.time_finished_us.is_some());
    let processed: i64 = db
        .select_rows("SELECT COUNT(*) FROM images WHERE processed", &[], |row| row.get(0))
        .unwrap()[0];
    assert_eq!(processed, 2);

    let progress = runner.progress().snapshot();
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.failed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_job_keeps_finished_timestamp_null() {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("images");
    std::fs::create_dir_all(&image_dir).unwrap();
    write_fixture(&image_dir.join("img_a.png"), &[(4, 4)]);

    let db = Arc::new(Database::open(&dir.path().join("results.db")).unwrap());
    let settings = test_settings(&image_dir, &dir.path().join("out"));
    let runner = JobRunner::new(db.clone(), Arc::new(FileImageReader::new()), settings);

    // Cancel before the run starts: preparation happens, tiles drain, and
    // no finished timestamp is recorded.
    runner.cancel_token().cancel();
    runner.start("cancelled-job").await.unwrap();

    let meta = db.select_experiment().unwrap();
    assert!(meta.time_finished_us.is_none());
}
