use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{AppError, Result};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Route `tracing` output to `log_path`. Only the first call installs a
/// subscriber; later calls are no-ops so switching workspaces keeps logging
/// to the first one's file.
pub fn init_tracing(log_path: &Path) -> Result<()> {
    LOG_GUARD.get_or_try_init(|| install(log_path))?;
    Ok(())
}

fn install(log_path: &Path) -> Result<WorkerGuard> {
    let dir = log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)?;
    let file_name = log_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("ops.log");
    let (writer, guard) = tracing_appender::non_blocking(rolling::never(dir, file_name));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt::Layer::default().with_writer(writer).with_ansi(false));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::State(format!("tracing init failed: {e}")))?;
    Ok(guard)
}
