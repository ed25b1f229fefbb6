//! PS-011: Append-only JSONL provenance event log.

use crate::core::error::{Error, Result};
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Current UTC time as RFC 3339 with second precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Generate a run ID. Unique within the process, time-ordered across processes.
pub fn generate_run_id() -> String {
    let micros = Utc::now().timestamp_micros().unsigned_abs();
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("r-{:012x}{:02x}", micros & 0xFFFF_FFFF_FFFF, seq & 0xFF)
}

/// Derive the event log path for a stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append events to the stack's event log, all stamped with the same time.
pub fn append_events(state_dir: &Path, stack: &str, events: &[ProvenanceEvent]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let ts = now_iso8601();
    let mut lines = String::new();
    for event in events {
        let te = TimestampedEvent {
            ts: ts.clone(),
            event: event.clone(),
        };
        let json = serde_json::to_string(&te)
            .map_err(|e| Error::State(format!("JSON serialize error: {}", e)))?;
        lines.push_str(&json);
        lines.push('\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    file.write_all(lines.as_bytes())?;
    Ok(())
}

/// Append a single event.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<()> {
    append_events(state_dir, stack, std::slice::from_ref(&event))
}

/// Read back every event. A missing log reads as empty.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::State(format!("{} line {}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}
