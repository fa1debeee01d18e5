use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, EnvFilter, Layer as _};

const FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info,html5ever=info,selectors=info";

/// Keeps the log file alive for the process. Call [`LogHandle::close`] at
/// shutdown to flush it to disk.
pub struct LogHandle {
    file: Arc<File>,
    path: PathBuf,
}

impl LogHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) -> anyhow::Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("sync log file: {}", self.path.display()))
    }
}

/// Console at `info` (or `RUST_LOG`) on stderr, plus a `debug` log file at
/// `<log_dir>/log_<timestamp>.log`.
pub fn init(log_dir: &Path) -> anyhow::Result<LogHandle> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir: {}", log_dir.display()))?;
    let path = log_dir.join(format!(
        "log_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = Arc::new(
        File::create(&path).with_context(|| format!("create log file: {}", path.display()))?,
    );

    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("build log filter")?;
    let file_filter = EnvFilter::try_new(FILE_FILTER).context("build file log filter")?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::clone(&file))
                .with_filter(file_filter),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(LogHandle { file, path })
}
