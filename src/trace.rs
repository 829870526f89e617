use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

/// What a trace entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Question,
    Answer,
    Error,
    Request,
    Status,
}

#[derive(Serialize)]
struct TraceEntry<'a> {
    at: String,
    kind: TraceKind,
    text: &'a str,
}

/// JSON-lines record of one console session.
///
/// The first failed write disables the trace for the rest of the session.
#[derive(Clone)]
pub struct SessionTrace {
    path: Arc<PathBuf>,
    file: Arc<Mutex<Option<File>>>,
}

impl SessionTrace {
    /// Opens `<state dir>/navchat/traces/<session_id>.jsonl`.
    pub fn create(session_id: &str) -> Result<Self> {
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow!("No state directory available for session traces"))?;
        Self::create_in(&state_dir.join("navchat").join("traces"), session_id)
    }

    pub fn create_in(dir: &Path, session_id: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create trace directory {}", dir.display()))?;
        let path = dir.join(format!("{session_id}.jsonl"));
        let file = open_private(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;

        Ok(Self {
            path: Arc::new(path),
            file: Arc::new(Mutex::new(Some(file))),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, kind: TraceKind, text: &str) {
        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = slot.as_mut() else {
            return;
        };
        if let Err(err) = write_entry(file, kind, text) {
            warn!(path = %self.path.display(), error = %err, "session trace disabled after write failure");
            *slot = None;
        }
    }
}

fn write_entry(file: &mut File, kind: TraceKind, text: &str) -> io::Result<()> {
    let at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(io::Error::other)?;
    let mut line = serde_json::to_vec(&TraceEntry { at, kind, text }).map_err(io::Error::other)?;
    line.push(b'\n');
    file.write_all(&line)
}

fn open_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::{SessionTrace, TraceKind};
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    fn entries(trace: &SessionTrace) -> Vec<Value> {
        fs::read_to_string(trace.file_path())
            .expect("read trace")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn records_one_json_line_per_entry() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in(dir.path(), "abc-1").expect("trace");

        trace.record(TraceKind::Question, "设置在哪里？");
        trace.record(TraceKind::Answer, "第一步\n第二步");

        assert_eq!(trace.file_path(), dir.path().join("abc-1.jsonl"));
        let entries = entries(&trace);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["kind"], "question");
        assert_eq!(entries[0]["text"], "设置在哪里？");
        assert_eq!(entries[1]["kind"], "answer");
        assert_eq!(entries[1]["text"], "第一步\n第二步");
        let at = entries[0]["at"].as_str().expect("timestamp");
        assert!(at.contains('T') && at.ends_with('Z'), "{at}");
    }

    #[test]
    fn clones_share_one_file() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in(dir.path(), "shared").expect("trace");
        let clone = trace.clone();

        trace.record(TraceKind::Request, "POST http://127.0.0.1/api/chat {}");
        clone.record(TraceKind::Status, "200");

        let kinds: Vec<_> = entries(&trace)
            .iter()
            .map(|entry| entry["kind"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, ["request", "status"]);
    }

    #[test]
    fn existing_trace_file_is_not_reused() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("dup.jsonl"), "old").expect("seed file");

        let err = SessionTrace::create_in(dir.path(), "dup")
            .err()
            .expect("second session with the same id should fail");
        assert!(err.to_string().contains("Failed to create trace file"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn trace_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in(dir.path(), "private").expect("trace");
        let mode = fs::metadata(trace.file_path())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
