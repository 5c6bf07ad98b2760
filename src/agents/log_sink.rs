//! Per-agent log sinks.
//!
//! Each runtime gets its own sink and only ever calls [`LogSink::log`]. The
//! process-wide `tracing` output is separate; sinks hold the per-agent trail
//! an operator reads after the fact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LogSink: Send + Sync {
    /// Record one line. Never fails from the caller's point of view.
    fn log(&self, line: &str);
}

/// Appends `[timestamp] line` to `<dir>/<agent>.log`.
pub struct FileLogSink {
    path: PathBuf,
}

impl FileLogSink {
    pub fn new(dir: impl AsRef<Path>, agent: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.log", agent)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{}] {}", chrono::Local::now().to_rfc3339(), line)
    }
}

impl LogSink for FileLogSink {
    fn log(&self, line: &str) {
        if let Err(e) = self.append(line) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write agent log");
        }
    }
}

/// Keeps lines in memory.
#[derive(Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(dir.path().join("logs"), "ops");
        sink.log("Run started");
        sink.log("Run finished");

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] Run started"));
        assert!(lines[1].ends_with("] Run finished"));
    }

    #[test]
    fn test_file_sink_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        // Parent is a regular file, so every write fails.
        FileLogSink::new(&blocker, "ops").log("dropped");
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryLogSink::new();
        sink.log("one");
        sink.log("two");
        assert_eq!(sink.lines(), vec!["one", "two"]);
        assert!(sink.contains("tw"));
    }
}
