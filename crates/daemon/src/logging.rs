// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed tracing setup: a non-blocking appender writing to the
//! daemon's log path, filtered by `RUST_LOG` (default `info`).

use std::path::Path;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ConfigError;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_LOGS: u32 = 3;

/// Shift `<log>.1`..`<log>.N` and rename the current log out of the way if
/// it has grown past `MAX_LOG_SIZE`. Best-effort: a failed rename just means
/// the next run appends to an oversized file.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

pub fn setup(log_path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard, ConfigError> {
    let parent = log_path.parent().ok_or(ConfigError::NoStateDir)?;
    std::fs::create_dir_all(parent)?;
    let file_name = log_path.file_name().ok_or(ConfigError::NoStateDir)?;

    let appender = tracing_appender::rolling::never(parent, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(non_blocking)).init();

    Ok(guard)
}
