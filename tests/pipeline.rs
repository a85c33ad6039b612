use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetpipe::tasks::{ImageError, ImageKind, Optimizer};
use assetpipe::{
    CleanPolicy, Config, DispatcherState, ImageCache, ImageOptions, Pipeline, PipelineError,
    Report, TaskName, TaskRunner, WatchDispatcher,
};
use camino::Utf8PathBuf;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

const VIEW: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <!-- build comment -->
    <link rel="stylesheet" href="styles/styles.css">
  </head>
  <body>
    <nav class="nav">
      <a class="link" href="https://example.com">out</a>
    </nav>
    <script src="scripts/app.js"></script>
  </body>
</html>
"#;

const STYLE: &str = r#"
@use 'vars';

.nav { display: flex; user-select: none; }
.link { color: vars.$accent; }
.unused { color: red; }
"#;

fn png() -> Vec<u8> {
    let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 64]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// A small project under a fresh temporary directory.
fn project() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();

    let src = root.join("src");
    for sub in ["views", "styles", "scripts", "images/icons"] {
        fs::create_dir_all(src.join(sub)).unwrap();
    }

    fs::write(src.join("views/index.html"), VIEW).unwrap();
    fs::write(src.join("styles/_vars.scss"), "$accent: #336699;").unwrap();
    fs::write(src.join("styles/main.scss"), STYLE).unwrap();
    fs::write(
        src.join("scripts/app.js"),
        "const square = (n) => n ** 2;\nconsole.log(square(window.innerWidth));\n",
    )
    .unwrap();
    fs::write(src.join("images/icons/logo.png"), png()).unwrap();

    let mut config = Config::new(&root);
    config.cache_dir = None;
    config.debounce = Duration::from_millis(50);

    (dir, config)
}

#[test]
fn test_one_shot_tasks() {
    let (_dir, config) = project();
    let dist = config.dist();
    let pipeline = Pipeline::new(config);

    pipeline.run(TaskName::Html).unwrap();
    let html = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(!html.contains("build comment"));
    assert!(html.contains("styles/styles.css?t="));
    assert!(html.contains("https://example.com"));
    assert!(!html.contains("https://example.com?t="));
    assert!(dist.join("index.html.map").is_file());

    pipeline.run(TaskName::Style).unwrap();
    let css = fs::read_to_string(dist.join("styles/styles.css")).unwrap();
    assert!(css.contains("-webkit-user-select:none"));
    assert!(css.contains(".unused"));

    pipeline.run(TaskName::CleanStyle).unwrap();
    let css = fs::read_to_string(dist.join("styles/styles.css")).unwrap();
    assert!(css.contains(".nav"));
    assert!(css.contains(".link"));
    assert!(!css.contains(".unused"));
    assert!(css.ends_with("/*# sourceMappingURL=styles.css.map */\n"));

    pipeline.run(TaskName::Script).unwrap();
    let js = fs::read_to_string(dist.join("scripts/app.js")).unwrap();
    assert!(!js.contains("**"));
    assert!(js.ends_with("//# sourceMappingURL=app.js.map\n"));
    assert!(dist.join("scripts/app.js.map").is_file());

    let report = pipeline.run(TaskName::Image).unwrap();
    assert_eq!(report.produced(), 1);
    assert!(dist.join("images/icons/logo.png").is_file());

    pipeline.run(TaskName::ImageWebp).unwrap();
    assert!(dist.join("images/icons/logo.webp").is_file());
}

/// Passes bytes through unchanged and counts invocations.
#[derive(Default)]
struct Passthrough(AtomicUsize);

impl Optimizer for Passthrough {
    fn optimize(
        &self,
        _: ImageKind,
        data: &[u8],
        _: &ImageOptions,
    ) -> Result<Vec<u8>, ImageError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(data.to_vec())
    }
}

#[test]
fn test_cache_persists_across_pipelines() {
    let (_dir, config) = project();
    let cache_dir = config.root.join(".cache/img");
    let optimizer = Arc::new(Passthrough::default());

    let first = Pipeline::new(config.clone())
        .with_cache(Arc::new(ImageCache::persistent(&cache_dir)))
        .with_optimizer(optimizer.clone())
        .run(TaskName::Image)
        .unwrap();
    assert_eq!(first.written, 1);
    assert_eq!(optimizer.0.load(Ordering::SeqCst), 1);

    let second = Pipeline::new(config)
        .with_cache(Arc::new(ImageCache::persistent(&cache_dir)))
        .with_optimizer(optimizer.clone())
        .run(TaskName::Image)
        .unwrap();
    assert_eq!(second.cached, 1);
    assert_eq!(optimizer.0.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clean_after_change_policy() {
    let (_dir, mut config) = project();
    config.clean = CleanPolicy::AfterChange;
    let stylesheet = config.stylesheet();
    let pipeline = Pipeline::new(config);

    pipeline.run(TaskName::Html).unwrap();
    pipeline.run_watched(TaskName::Style).unwrap();

    let css = fs::read_to_string(stylesheet).unwrap();
    assert!(!css.contains(".unused"));
}

#[test]
fn test_destination_write_failure_is_reported() {
    let (_dir, config) = project();
    // a file where the output directory should be
    fs::write(config.dist(), "not a directory").unwrap();

    let err = Pipeline::new(config).run(TaskName::Script).unwrap_err();
    assert!(matches!(err, PipelineError::Task(TaskName::Script, _)));
}

struct Counting {
    inner: Pipeline,
    runs: Mutex<Vec<TaskName>>,
}

impl TaskRunner for Counting {
    fn run_task(&self, task: TaskName) -> Result<Report, PipelineError> {
        self.runs.lock().unwrap().push(task);
        self.inner.run_watched(task)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_script_change_runs_only_script_task() {
    let (_dir, config) = project();
    let scripts = config.source_root().join("scripts");
    let debounce = config.debounce;

    let pipeline = Pipeline::new(config);
    let bindings = pipeline.bindings();
    let counting = Arc::new(Counting {
        inner: pipeline,
        runs: Mutex::new(Vec::new()),
    });

    let dispatcher = WatchDispatcher::new(counting.clone(), bindings, debounce);
    let mut state = dispatcher.subscribe();
    let token = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(token.clone()));

    state
        .wait_for(|state| *state == DispatcherState::Running)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(scripts.join("app.js"), "console.log('changed');\n").unwrap();

    let mut waited = Duration::ZERO;
    while counting.runs.lock().unwrap().is_empty() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }

    // let any stray follow-up runs land
    tokio::time::sleep(Duration::from_millis(500)).await;

    token.cancel();
    handle.await.unwrap().unwrap();

    let runs = counting.runs.lock().unwrap().clone();
    assert!(!runs.is_empty());
    assert!(runs.iter().all(|task| *task == TaskName::Script));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_default_completes_after_images_and_readiness() {
    let (_dir, config) = project();
    let dist = config.dist_images();
    let pipeline = Arc::new(Pipeline::new(config));
    let token = CancellationToken::new();

    let started = pipeline.start_default(token.clone()).await.unwrap();

    let tasks: Vec<_> = started.summary.reports.iter().map(|r| r.task).collect();
    assert_eq!(
        tasks,
        vec![TaskName::Image, TaskName::ImageWebp, TaskName::ImageAvif]
    );
    assert!(started.summary.failed.is_empty());
    assert!(dist.join("icons/logo.png").is_file());
    assert!(dist.join("icons/logo.webp").is_file());
    assert!(dist.join("icons/logo.avif").is_file());

    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(10), started.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.reports.len(), 3);
}
