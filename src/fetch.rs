use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::db::{ContentUpdate, PendingRow, Store};
use crate::error::{Error, RenderError, Result};
use crate::extract::Extract;
use crate::partition::partition;
use crate::render::{RenderBackend, RenderSession};

/// Upper bound on concurrent fetch workers.
pub const MAX_WORKERS: usize = 1024;

/// Which content columns a successful fetch writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    /// Raw rendered markup only.
    Html,
    /// Extracted title, meta description and body text only.
    Fields,
    #[default]
    Both,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub workers: usize,
    pub render_timeout: Duration,
    pub output: OutputMode,
    pub progress: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            render_timeout: Duration::from_secs(30),
            output: OutputMode::Both,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub pending: usize,
    pub workers: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Urls never attempted because their worker could not start.
    pub skipped: usize,
}

#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Store(#[from] Error),
    #[error("no stored row for url")]
    MissingRow,
    #[error("store task failed: {0}")]
    StoreTask(String),
}

/// Result of one url. Failures are data; the worker moves on.
#[derive(Debug)]
pub struct UrlOutcome {
    pub url: String,
    pub result: std::result::Result<(), FetchFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub worker: usize,
    pub assigned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub setup_failed: bool,
}

impl WorkerReport {
    fn record(&mut self, outcome: &UrlOutcome) {
        match &outcome.result {
            Ok(()) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Pool-wide counters, bumped per url so a worker that dies mid-chunk
/// still leaves an exact count of what it finished.
#[derive(Debug, Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Tally {
    fn record(&self, outcome: &UrlOutcome) {
        let counter = match &outcome.result {
            Ok(()) => &self.succeeded,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Render every pending row of the store at `store_path` across
/// `config.workers` concurrent workers, writing results back as they land.
///
/// The pending set is read once up front. Each worker gets one contiguous
/// slice of it and owns its own store connection and render session. Returns
/// once every worker has finished; fails only if no worker could start.
pub async fn run_fetch(
    store_path: &Path,
    config: &FetchConfig,
    backend: Arc<dyn RenderBackend>,
    extractor: Arc<dyn Extract>,
) -> Result<FetchSummary> {
    if config.workers > MAX_WORKERS {
        return Err(Error::Setup(format!(
            "worker count {} exceeds the maximum of {}",
            config.workers, MAX_WORKERS
        )));
    }

    info!("Fetching URLs from database...");
    let path = store_path.to_path_buf();
    let pending = tokio::task::spawn_blocking(move || -> Result<Vec<PendingRow>> {
        let store = Store::open(&path)?;
        let rows = store.select_pending()?;
        store.close()?;
        Ok(rows)
    })
    .await
    .map_err(|e| Error::Setup(format!("reading pending rows: {}", e)))??;

    let ranges = partition(pending.len(), config.workers).map_err(|e| Error::Setup(e.to_string()))?;
    if pending.is_empty() {
        info!("No URLs to process.");
        return Ok(FetchSummary::default());
    }

    let pb = progress_bar(pending.len(), config.progress);
    let tally = Arc::new(Tally::default());
    let workers = ranges.len();

    let mut set = JoinSet::new();
    let mut with_work = 0usize;
    info!("Starting {} workers for {} URLs ({})", workers, pending.len(), backend.name());
    for (id, range) in ranges.into_iter().enumerate() {
        if !range.is_empty() {
            with_work += 1;
        }
        let worker = Worker {
            id,
            rows: pending[range].to_vec(),
            store_path: store_path.to_path_buf(),
            backend: Arc::clone(&backend),
            extractor: Arc::clone(&extractor),
            timeout: config.render_timeout,
            output: config.output,
            progress: pb.clone(),
            tally: Arc::clone(&tally),
        };
        set.spawn(worker.run().instrument(info_span!("worker", id)));
    }

    let mut setup_failures = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => {
                debug!(
                    "worker {} done: {}/{} ok, {} failed, {} skipped",
                    report.worker, report.succeeded, report.assigned, report.failed, report.skipped
                );
                if report.setup_failed {
                    setup_failures += 1;
                }
            }
            Err(e) => warn!("worker task ended abnormally: {}", e),
        }
    }
    pb.finish_and_clear();

    let mut summary = FetchSummary {
        pending: pending.len(),
        workers,
        succeeded: tally.succeeded.load(Ordering::Relaxed),
        failed: tally.failed.load(Ordering::Relaxed),
        skipped: tally.skipped.load(Ordering::Relaxed),
    };
    // Rows a dead worker never reached.
    let accounted = summary.succeeded + summary.failed + summary.skipped;
    summary.failed += summary.pending.saturating_sub(accounted);

    if with_work > 0 && setup_failures == with_work {
        return Err(Error::Setup(format!(
            "none of {} workers could start; check the {} renderer and the store",
            with_work,
            backend.name()
        )));
    }

    info!(
        "All workers finished: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    Ok(summary)
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

struct Worker {
    id: usize,
    rows: Vec<PendingRow>,
    store_path: PathBuf,
    backend: Arc<dyn RenderBackend>,
    extractor: Arc<dyn Extract>,
    timeout: Duration,
    output: OutputMode,
    progress: ProgressBar,
    tally: Arc<Tally>,
}

impl Worker {
    async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.id,
            assigned: self.rows.len(),
            ..Default::default()
        };
        if self.rows.is_empty() {
            debug!("no URLs assigned");
            return report;
        }
        info!("Processing URLs: {}", self.rows.len());

        let store = match open_store(self.store_path.clone()).await {
            Ok(s) => Arc::new(Mutex::new(s)),
            Err(e) => return self.abandon(report, format!("cannot open store: {}", e)),
        };
        let mut session = match self.backend.open() {
            Ok(s) => s,
            Err(e) => return self.abandon(report, format!("cannot acquire renderer: {}", e)),
        };

        for row in &self.rows {
            debug!(
                "Processing URL #{}: {} (label {})",
                row.id,
                row.url,
                row.label.as_deref().unwrap_or("-")
            );
            let result = match self.fetch_one(session.as_mut(), &row.url).await {
                Ok(update) => save(Arc::clone(&store), row.url.clone(), update).await,
                Err(e) => Err(e),
            };
            let outcome = UrlOutcome {
                url: row.url.clone(),
                result,
            };
            match &outcome.result {
                Ok(()) => debug!("Finished URL: {}", outcome.url),
                Err(e) => warn!("Error processing URL {}: {}", outcome.url, e),
            }
            report.record(&outcome);
            self.tally.record(&outcome);
            self.progress.inc(1);
        }

        match Arc::try_unwrap(store).map(Mutex::into_inner) {
            Ok(Ok(store)) => {
                if let Err(e) = store.close() {
                    warn!("closing store: {}", e);
                }
            }
            _ => warn!("store connection not released cleanly"),
        }
        info!(
            "Finished processing all URLs ({} ok, {} failed)",
            report.succeeded, report.failed
        );
        report
    }

    fn abandon(&self, mut report: WorkerReport, reason: String) -> WorkerReport {
        warn!("worker stopping before its first URL: {}", reason);
        report.setup_failed = true;
        report.skipped = self.rows.len();
        self.tally.skipped.fetch_add(self.rows.len(), Ordering::Relaxed);
        self.progress.inc(self.rows.len() as u64);
        report
    }

    /// Render and extract one url. Timeouts and panics inside the renderer
    /// or extractor become failures of this url alone.
    async fn fetch_one(
        &self,
        session: &mut dyn RenderSession,
        url: &str,
    ) -> std::result::Result<ContentUpdate, FetchFailure> {
        let rendered = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(session.render(url)).catch_unwind(),
        )
        .await;

        let html = match rendered {
            Err(_) => return Err(RenderError::Timeout(self.timeout).into()),
            Ok(Err(panic)) => return Err(RenderError::Crashed(panic_message(panic)).into()),
            Ok(Ok(result)) => result?,
        };

        if self.output == OutputMode::Html {
            return Ok(ContentUpdate {
                html_content: Some(html),
                ..Default::default()
            });
        }

        let extractor = &self.extractor;
        let fields = std::panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(&html)))
            .map_err(|panic| RenderError::Crashed(format!("extract: {}", panic_message(panic))))?;

        Ok(ContentUpdate {
            html_content: (self.output == OutputMode::Both).then_some(html),
            title: Some(fields.title),
            meta_description: Some(fields.meta_description),
            body_content: Some(fields.body_text),
        })
    }
}

// SQLite calls block (up to the busy timeout), so they run off the async
// worker threads.

async fn open_store(path: PathBuf) -> Result<Store> {
    tokio::task::spawn_blocking(move || Store::open(&path))
        .await
        .map_err(|e| Error::Setup(format!("store task: {}", e)))?
}

async fn save(
    store: Arc<Mutex<Store>>,
    url: String,
    update: ContentUpdate,
) -> std::result::Result<(), FetchFailure> {
    let written = tokio::task::spawn_blocking(move || -> std::result::Result<usize, FetchFailure> {
        let store = store
            .lock()
            .map_err(|_| FetchFailure::StoreTask("connection lock poisoned".into()))?;
        Ok(store.update_content(&url, &update)?)
    })
    .await
    .map_err(|e| FetchFailure::StoreTask(e.to_string()))??;

    match written {
        0 => Err(FetchFailure::MissingRow),
        _ => Ok(()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::extract::HtmlExtractor;

    #[derive(Clone, PartialEq, Eq)]
    enum Behavior {
        Fail,
        Hang,
        Panic,
        /// Delete the url's row from this store mid-render, then succeed.
        Vanish(PathBuf),
    }

    /// Renders `<title>{url}</title>` unless the url is scripted otherwise.
    #[derive(Default)]
    struct ScriptedBackend {
        script: HashMap<String, Behavior>,
        calls: Arc<Mutex<HashMap<String, usize>>>,
        failing_opens: AtomicUsize,
        panicking_opens: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with(mut self, url: &str, behavior: Behavior) -> Self {
            self.script.insert(url.to_string(), behavior);
            self
        }

        fn failing_opens(self, n: usize) -> Self {
            self.failing_opens.store(n, Ordering::SeqCst);
            self
        }

        fn panicking_opens(self, n: usize) -> Self {
            self.panicking_opens.store(n, Ordering::SeqCst);
            self
        }

        fn calls(&self) -> HashMap<String, usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RenderBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open(&self) -> std::result::Result<Box<dyn RenderSession>, RenderError> {
            let explode = self
                .panicking_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if explode {
                panic!("renderer process aborted during startup");
            }
            let refuse = self
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refuse {
                return Err(RenderError::Unavailable("no browser".into()));
            }
            Ok(Box::new(ScriptedSession {
                script: self.script.clone(),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    struct ScriptedSession {
        script: HashMap<String, Behavior>,
        calls: Arc<Mutex<HashMap<String, usize>>>,
    }

    #[async_trait]
    impl RenderSession for ScriptedSession {
        async fn render(&mut self, url: &str) -> std::result::Result<String, RenderError> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            match self.script.get(url) {
                Some(Behavior::Fail) => Err(RenderError::Navigation("net::ERR_NAME_NOT_RESOLVED".into())),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(String::new())
                }
                Some(Behavior::Panic) => panic!("renderer crashed on {}", url),
                Some(Behavior::Vanish(db)) => {
                    rusqlite::Connection::open(db)
                        .unwrap()
                        .execute("DELETE FROM phishing_data WHERE url = ?1", [url])
                        .unwrap();
                    Ok("<html><title>gone</title></html>".to_string())
                }
                None => Ok(format!(
                    "<html><head><title>{url}</title><meta name=\"description\" content=\"about {url}\"></head><body><p>body of {url}</p></body></html>"
                )),
            }
        }
    }

    fn seeded_store(dir: &tempfile::TempDir, n: usize) -> (PathBuf, Vec<String>) {
        let path = dir.path().join("crawl.db");
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        let urls: Vec<String> = (0..n).map(|i| format!("http://site{}.example/", i)).collect();
        for (i, url) in urls.iter().enumerate() {
            let label = if i % 2 == 0 { "1.0" } else { "benign" };
            store.insert_if_absent(url, Some(label)).unwrap();
        }
        store.close().unwrap();
        (path, urls)
    }

    fn config(workers: usize) -> FetchConfig {
        FetchConfig {
            workers,
            render_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn run(
        path: &Path,
        cfg: &FetchConfig,
        backend: &Arc<ScriptedBackend>,
    ) -> Result<FetchSummary> {
        let backend: Arc<dyn RenderBackend> = backend.clone();
        run_fetch(path, cfg, backend, Arc::new(HtmlExtractor)).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_row_fetched_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 23);
        let backend = Arc::new(ScriptedBackend::default());

        let summary = run(&path, &config(4), &backend).await.unwrap();
        assert_eq!(
            summary,
            FetchSummary {
                pending: 23,
                workers: 4,
                succeeded: 23,
                failed: 0,
                skipped: 0
            }
        );

        let calls = backend.calls();
        assert_eq!(calls.len(), 23);
        assert!(calls.values().all(|&n| n == 1));

        let store = Store::open(&path).unwrap();
        assert!(store.select_pending().unwrap().is_empty());
        for url in &urls {
            let rec = store.record(url).unwrap().unwrap();
            assert_eq!(rec.title.as_deref(), Some(url.as_str()));
            assert_eq!(rec.body_content, Some(format!("body of {}", url)));
            assert!(rec.html_content.unwrap().contains("<title>"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 10);
        let bad = urls[4].clone();
        let backend = Arc::new(ScriptedBackend::default().with(&bad, Behavior::Fail));

        let summary = run(&path, &config(3), &backend).await.unwrap();
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);

        let store = Store::open(&path).unwrap();
        let pending = store.select_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, bad);
        assert!(store.record(&bad).unwrap().unwrap().html_content.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timeout_and_panic_fail_single_urls() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 6);
        let backend = Arc::new(
            ScriptedBackend::default()
                .with(&urls[1], Behavior::Hang)
                .with(&urls[2], Behavior::Panic),
        );

        let summary = run(&path, &config(2), &backend).await.unwrap();
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 2);

        let store = Store::open(&path).unwrap();
        let pending: HashSet<String> = store
            .select_pending()
            .unwrap()
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert_eq!(pending, HashSet::from([urls[1].clone(), urls[2].clone()]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn labels_survive_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 4);
        let backend = Arc::new(ScriptedBackend::default());
        run(&path, &config(2), &backend).await.unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.record(&urls[0]).unwrap().unwrap().label.as_deref(), Some("1.0"));
        assert_eq!(store.record(&urls[1]).unwrap().unwrap().label.as_deref(), Some("benign"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn output_modes_write_expected_columns() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 2);
        let backend = Arc::new(ScriptedBackend::default());
        let cfg = FetchConfig {
            output: OutputMode::Fields,
            ..config(1)
        };
        run(&path, &cfg, &backend).await.unwrap();

        let store = Store::open(&path).unwrap();
        let rec = store.record(&urls[0]).unwrap().unwrap();
        assert!(rec.html_content.is_none());
        assert_eq!(rec.meta_description, Some(format!("about {}", urls[0])));
        assert!(store.select_pending().unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 2);
        let cfg = FetchConfig {
            output: OutputMode::Html,
            ..config(1)
        };
        run(&path, &cfg, &backend).await.unwrap();
        let store = Store::open(&path).unwrap();
        let rec = store.record(&urls[1]).unwrap().unwrap();
        assert!(rec.html_content.is_some());
        assert!(rec.title.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rerun_only_touches_still_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 5);
        let flaky = Arc::new(ScriptedBackend::default().with(&urls[3], Behavior::Fail));
        run(&path, &config(2), &flaky).await.unwrap();

        let healthy = Arc::new(ScriptedBackend::default());
        let summary = run(&path, &config(2), &healthy).await.unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(healthy.calls().keys().collect::<Vec<_>>(), vec![&urls[3]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn more_workers_than_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 3);
        let backend = Arc::new(ScriptedBackend::default());
        let summary = run(&path, &config(8), &backend).await.unwrap();
        assert_eq!(summary.workers, 8);
        assert_eq!(summary.succeeded, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_pending_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 0);
        let backend = Arc::new(ScriptedBackend::default().failing_opens(100));
        let summary = run(&path, &config(4), &backend).await.unwrap();
        assert_eq!(summary, FetchSummary::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_workers_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 3);
        let backend = Arc::new(ScriptedBackend::default());
        let err = run(&path, &config(0), &backend).await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_worker_without_renderer_skips_its_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 9);
        let backend = Arc::new(ScriptedBackend::default().failing_opens(1));
        let summary = run(&path, &config(3), &backend).await.unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.succeeded, 6);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.select_pending().unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_renderer_at_all_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 4);
        let backend = Arc::new(ScriptedBackend::default().failing_opens(100));
        let err = run(&path, &config(2), &backend).await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn row_deleted_before_save_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 2);
        let backend = Arc::new(
            ScriptedBackend::default()
                .with(&urls[0], Behavior::Vanish(path.clone()))
                .with(&urls[1], Behavior::Vanish(path.clone())),
        );

        let summary = run(&path, &config(1), &backend).await.unwrap();
        assert_eq!(
            summary,
            FetchSummary {
                pending: 2,
                workers: 1,
                succeeded: 0,
                failed: 2,
                skipped: 0
            }
        );
        assert_eq!(Store::open(&path).unwrap().stats().unwrap().total, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn store_error_on_update_leaves_row_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urls) = seeded_store(&dir, 4);
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(&format!(
                "CREATE TRIGGER refuse_update BEFORE UPDATE ON phishing_data
                 WHEN OLD.url = '{}'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                urls[2]
            ))
            .unwrap();
        let backend = Arc::new(ScriptedBackend::default());

        let summary = run(&path, &config(2), &backend).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);

        let store = Store::open(&path).unwrap();
        let pending = store.select_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, urls[2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn crashed_worker_chunk_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 6);
        let backend = Arc::new(ScriptedBackend::default().panicking_opens(1));

        let summary = run(&path, &config(2), &backend).await.unwrap();
        assert_eq!(summary.pending, 6);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.skipped, 0);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.select_pending().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn worker_count_above_limit_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_store(&dir, 3);
        let backend = Arc::new(ScriptedBackend::default());
        let err = run(&path, &config(MAX_WORKERS + 1), &backend).await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
        assert_eq!(backend.calls().len(), 0);
    }

    #[tokio::test]
    async fn missing_store_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/dir/crawl.db");
        let backend = Arc::new(ScriptedBackend::default());
        assert!(run(&path, &config(2), &backend).await.is_err());
    }
}
