use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*};

use crate::config::Configuration;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

/// Installs the process-wide tracing subscriber exactly once; safe to call
/// from multiple entry points (binaries, tests) without double-installing.
pub fn install_logging(config: &Configuration) {
    if LOGGER_INSTALLED.get().is_some() {
        return;
    }

    if !tracing_subscribe(config) {
        tracing::warn!("failed to install tracing subscriber, one is probably installed already");
    }

    if color_eyre::install().is_err() {
        tracing::warn!("failed to install color-eyre, one is probably installed already");
    }

    let _ = LOGGER_INSTALLED.set(true);
}

fn tracing_subscribe(config: &Configuration) -> bool {
    let env_filter_layer = fmt::layer();

    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "kodit.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(log_writer_layer)
        .with(env_filter_layer)
        .try_init()
        .is_ok()
}
