//! Transcript export when a call ends.
//!
//! The full transcript is always logged. When a transcripts directory is
//! configured it is also written there as `{call_id}.json`.

use callbridge_conversation::CallSession;
use callbridge_types::{CallId, CallStatus, Turn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while writing a transcript file.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write transcript: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize transcript: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON shape of an exported transcript.
#[derive(Debug, Serialize)]
pub struct TranscriptRecord<'a> {
    pub call_id: &'a CallId,
    pub status: &'a str,
    pub created_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub turns: &'a [Turn],
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptExporter {
    dir: Option<PathBuf>,
}

impl TranscriptExporter {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Logs the transcript and writes it to disk if configured. Returns the
    /// written file path, if any.
    pub async fn export(
        &self,
        session: &CallSession,
        status: &CallStatus,
    ) -> Result<Option<PathBuf>, ExportError> {
        tracing::info!(
            call_id = %session.call_id,
            %status,
            turns = session.transcript.len(),
            "call ended"
        );
        for (index, turn) in session.transcript.iter().enumerate() {
            tracing::info!(
                call_id = %session.call_id,
                index,
                role = %turn.role,
                content = %turn.content,
                "transcript turn"
            );
        }

        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let record = TranscriptRecord {
            call_id: &session.call_id,
            status: status.as_str(),
            created_at: session.created_at,
            ended_at: Utc::now(),
            turns: &session.transcript,
        };
        let json = serde_json::to_vec_pretty(&record)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", file_stem(&session.call_id)));
        tokio::fs::write(&path, json).await?;
        Ok(Some(path))
    }
}

/// Call ids come from the network; keep only characters safe in a file name.
fn file_stem(call_id: &CallId) -> String {
    let stem: String = call_id
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() {
        "unknown".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> CallSession {
        CallSession {
            call_id: CallId::from(id),
            transcript: vec![
                Turn::system("P"),
                Turn::assistant("G"),
                Turn::user("U"),
                Turn::assistant("R"),
            ],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_json_transcript_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = TranscriptExporter::new(Some(dir.path().to_path_buf()));

        let path = exporter
            .export(&session("CA1"), &CallStatus::Completed)
            .await
            .unwrap()
            .expect("file written");

        assert_eq!(path, dir.path().join("CA1.json"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["call_id"], "CA1");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["turns"].as_array().unwrap().len(), 4);
        assert_eq!(json["turns"][2]["role"], "user");
    }

    #[tokio::test]
    async fn logs_only_without_directory() {
        let exporter = TranscriptExporter::default();
        let written = exporter
            .export(&session("CA2"), &CallStatus::Completed)
            .await
            .unwrap();
        assert!(written.is_none());
    }

    #[test]
    fn file_stem_strips_path_characters() {
        assert_eq!(file_stem(&CallId::from("../../etc/passwd")), "etcpasswd");
        assert_eq!(file_stem(&CallId::from("///")), "unknown");
    }
}
