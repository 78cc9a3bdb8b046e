//! Write-once storage for synthesized speech.
//!
//! Every artifact gets a fresh UUID file name, so concurrent writers never
//! collide and nothing is ever overwritten. Creation is broadcast as an
//! [`ArtifactCreated`] event; retention or cleanup policies subscribe to it
//! from outside this crate.

use crate::error::VoiceError;
use async_trait::async_trait;
use callbridge_types::voice::AudioFormat;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Path prefix under which artifacts are served over HTTP.
pub const AUDIO_ROUTE_PREFIX: &str = "/audio";

/// Default capacity for the artifact creation broadcast channel.
const DEFAULT_ARTIFACT_BROADCAST_CAPACITY: usize = 256;

/// A stored audio file produced for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub id: Uuid,
    pub file_name: String,
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl AudioArtifact {
    /// URL at which the telephony platform can fetch this artifact.
    ///
    /// `public_base` is the scheme and host of the serving process, e.g.
    /// `https://example.ngrok.app`.
    pub fn url(&self, public_base: &str) -> String {
        format!(
            "{}{}/{}",
            public_base.trim_end_matches('/'),
            AUDIO_ROUTE_PREFIX,
            self.file_name
        )
    }
}

/// Event emitted after an artifact has been durably written.
#[derive(Debug, Clone)]
pub struct ArtifactCreated {
    pub id: Uuid,
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&AudioArtifact> for ArtifactCreated {
    fn from(artifact: &AudioArtifact) -> Self {
        Self {
            id: artifact.id,
            file_name: artifact.file_name.clone(),
            path: artifact.path.clone(),
            bytes: artifact.size,
            created_at: artifact.created_at,
        }
    }
}

/// Persists audio bytes under a unique id.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, audio: &[u8], format: AudioFormat) -> Result<AudioArtifact, VoiceError>;
}

/// Artifact store backed by a local directory.
#[derive(Debug, Clone)]
pub struct DiskArtifactStore {
    dir: PathBuf,
    events: broadcast::Sender<ArtifactCreated>,
}

impl DiskArtifactStore {
    /// Opens (creating if needed) the artifact directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, VoiceError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let (events, _) = broadcast::channel(DEFAULT_ARTIFACT_BROADCAST_CAPACITY);
        Ok(Self { dir, events })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subscribes to artifact creation events.
    pub fn subscribe(&self) -> broadcast::Receiver<ArtifactCreated> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn put(&self, audio: &[u8], format: AudioFormat) -> Result<AudioArtifact, VoiceError> {
        let id = Uuid::new_v4();
        let file_name = format!("{}.{}", id, format.extension());
        let path = self.dir.join(&file_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(audio).await?;
        file.flush().await?;

        let artifact = AudioArtifact {
            id,
            file_name,
            path,
            format,
            size: audio.len(),
            created_at: Utc::now(),
        };

        // No subscribers is fine.
        let _ = self.events.send(ArtifactCreated::from(&artifact));

        tracing::debug!(
            artifact_id = %artifact.id,
            bytes = artifact.size,
            "stored audio artifact"
        );
        Ok(artifact)
    }
}
