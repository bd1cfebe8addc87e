//! Append-only JSONL provenance event log.

use crate::core::error::Result;
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time as an RFC 3339 timestamp with second precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Generate an apply run ID.
pub fn generate_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("r-{}", &id[..12])
}

/// Derive the event log path for a workspace.
pub fn event_log_path(registry_dir: &Path, workspace: &str) -> PathBuf {
    registry_dir.join(workspace).join("events.jsonl")
}

/// Append an event to the workspace's event log.
pub fn append_event(registry_dir: &Path, workspace: &str, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(registry_dir, workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{}", json)?;

    Ok(())
}

/// Read every event in a workspace's log. A missing log is empty.
pub fn read_events(registry_dir: &Path, workspace: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(registry_dir, workspace);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str::<TimestampedEvent>(l)?))
        .collect()
}
