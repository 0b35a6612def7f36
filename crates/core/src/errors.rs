// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error-message extraction helper shared across session-boundary catch
//! sites (`spec.md` §7: "error instanceof Error ? error.message : 'Unknown
//! error'").

/// Describe an arbitrary error for inclusion in worker state or a log line.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    err.to_string()
}

/// Describe a `Box<dyn Error>` the same way, for call sites that only have
/// an owned trait object.
pub fn describe_boxed_error(err: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    err.to_string()
}
