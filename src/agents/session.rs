//! Durable per-agent conversation history.
//!
//! History is a list of [`Exchange`]s: one per successful run, holding every
//! message the run added. Trimming works on whole exchanges, so a tool call
//! is never separated from its result.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{ChatMessage, TokenUsage};

/// One completed run: the invocation, any tool traffic, and the final answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exchange {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session file {path} ({reason}); moved to {moved_to}")]
    Corrupt {
        path: PathBuf,
        moved_to: PathBuf,
        reason: String,
    },
}

/// Key-value persistence for agent history, keyed by agent name.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// History saved for `agent`; empty if none exists yet.
    async fn load_session(&self, agent: &str) -> Result<Vec<Exchange>, SessionError>;

    /// Replace the saved history for `agent`.
    async fn save_session(&self, agent: &str, history: &[Exchange]) -> Result<(), SessionError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    agent: String,
    updated_at: DateTime<Utc>,
    exchanges: Vec<Exchange>,
}

/// One JSON file per agent: `<dir>/<agent>.json`.
///
/// Saves go through a temporary file and a rename, so a crash mid-write
/// leaves the previous history in place.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, agent: &str) -> PathBuf {
        self.dir.join(format!("{}.json", agent))
    }

    fn io_error(path: &Path, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_session(&self, agent: &str) -> Result<Vec<Exchange>, SessionError> {
        let path = self.path_for(agent);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&path, e)),
        };

        match serde_json::from_slice::<SessionFile>(&bytes) {
            Ok(file) => Ok(file.exchanges),
            Err(e) => {
                let moved_to = self.dir.join(format!(
                    "{}.json.corrupt-{}",
                    agent,
                    Utc::now().timestamp()
                ));
                tokio::fs::rename(&path, &moved_to)
                    .await
                    .map_err(|e| Self::io_error(&path, e))?;
                Err(SessionError::Corrupt {
                    path,
                    moved_to,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn save_session(&self, agent: &str, history: &[Exchange]) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?;

        let file = SessionFile {
            agent: agent.to_string(),
            updated_at: Utc::now(),
            exchanges: history.to_vec(),
        };
        let path = self.path_for(agent);
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| {
            Self::io_error(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let tmp = self.dir.join(format!("{}.json.tmp", agent));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::io_error(&path, e))?;
        Ok(())
    }
}
