//! Background consumer for audio artifact events.

use callbridge_voice::ArtifactCreated;
use tokio::sync::broadcast::{self, error::RecvError};

/// Logs every artifact the store creates.
///
/// Runs until the sending side is dropped.
///
/// # Arguments
///
/// * `events` - Receiver subscribed to the artifact store.
pub async fn start_artifact_logger(mut events: broadcast::Receiver<ArtifactCreated>) {
    tracing::info!("starting audio artifact logger");

    loop {
        match events.recv().await {
            Ok(event) => {
                tracing::info!(
                    artifact_id = %event.id,
                    file = %event.file_name,
                    bytes = event.bytes,
                    created_at = %event.created_at,
                    "audio artifact created"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "artifact logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }

    tracing::info!("audio artifact logger stopped");
}
