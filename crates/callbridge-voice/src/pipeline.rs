use crate::error::VoiceError;
use crate::store::{ArtifactStore, AudioArtifact};
use crate::tts::SpeechSynthesizer;
use callbridge_types::voice::VoiceProfile;
use std::sync::Arc;

/// Turns an utterance into a stored, URL-addressable audio artifact.
///
/// One TTS request per call with the full text. Identical inputs are not
/// deduplicated: each call produces a new artifact.
#[derive(Clone)]
pub struct SpeechSynthesisPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn ArtifactStore>,
    profile: VoiceProfile,
}

impl SpeechSynthesisPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn ArtifactStore>,
        profile: VoiceProfile,
    ) -> Self {
        Self {
            synthesizer,
            store,
            profile,
        }
    }

    pub fn profile(&self) -> &VoiceProfile {
        &self.profile
    }

    pub async fn synthesize(&self, text: &str) -> Result<AudioArtifact, VoiceError> {
        let audio = self.synthesizer.synthesize(text, &self.profile).await?;
        self.store.put(&audio, self.profile.format).await
    }
}

impl std::fmt::Debug for SpeechSynthesisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSynthesisPipeline")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}
