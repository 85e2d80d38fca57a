//! Domain event vocabulary (spec §4.2, §7): `PolicyCreated/Updated/Deleted`,
//! `ActionCreated/Executed/Succeeded/Failed`, `ValidationError`,
//! `RateLimited`. Emitted as structured log records rather than a separate
//! event store, consistent with the rest of this codebase's
//! tracing-based observability.

use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

pub fn emit(severity: Severity, namespace: &str, name: &str, reason: &str, message: &str) {
    match severity {
        Severity::Normal => {
            info!(namespace, name, reason, message, "domain event");
        }
        Severity::Warning => {
            warn!(namespace, name, reason, message, "domain event");
        }
    }
}
