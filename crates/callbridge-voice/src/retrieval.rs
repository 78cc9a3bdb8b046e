//! Recording retrieval: availability polling, download and transcription.
//!
//! A recording referenced in a capture webhook may not be fetchable at the
//! moment the webhook fires. [`RecordingRetrievalService`] polls the store
//! under a bounded [`RetryPolicy`] before downloading. Running out of
//! attempts is a permanent failure for that turn
//! ([`VoiceError::RecordingUnavailable`]), distinct from a single missed
//! check.
//!
//! Waiting uses `tokio::time::sleep`, so it suspends only the current task
//! and runs instantly under paused test time.

use crate::error::VoiceError;
use crate::recording::RecordingSource;
use crate::stt::Transcriber;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between availability checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of availability checks (about 2 s in total).
pub const DEFAULT_POLL_ATTEMPTS: u32 = 20;

/// How the delay between checks evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every miss.
    Fixed,
    /// Delay doubles after every miss, never exceeding `max_interval`.
    Exponential { max_interval: Duration },
}

/// Bounded retry policy for availability polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed interval, at most `max_attempts` checks (minimum 1).
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed,
        }
    }

    /// Doubling interval starting at `initial`, capped at `max_interval`, at
    /// most `max_attempts` checks (minimum 1).
    pub fn exponential(initial: Duration, max_interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval: initial,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                max_interval: max_interval.max(initial),
            },
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to wait after a miss that was preceded by a wait of `previous`.
    pub fn next_interval(&self, previous: Duration) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max_interval } => previous.saturating_mul(2).min(max_interval),
        }
    }

    /// Total time spent sleeping when every check misses. Acts as the
    /// effective timeout of one retrieval's availability phase.
    pub fn upper_bound(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.interval;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = self.next_interval(delay);
        }
        total
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_ATTEMPTS)
    }
}

/// State of one in-flight availability poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingJob {
    pub source_reference: String,
    /// Checks issued so far.
    pub attempt: u32,
    /// Delay before the next check.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RecordingJob {
    pub fn new(source_reference: impl Into<String>, policy: &RetryPolicy) -> Self {
        Self {
            source_reference: source_reference.into(),
            attempt: 0,
            interval: policy.interval(),
            max_attempts: policy.max_attempts(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Resolves a recording reference to transcribed text.
#[derive(Clone)]
pub struct RecordingRetrievalService {
    source: Arc<dyn RecordingSource>,
    transcriber: Arc<dyn Transcriber>,
    policy: RetryPolicy,
    language: String,
}

impl RecordingRetrievalService {
    pub fn new(
        source: Arc<dyn RecordingSource>,
        transcriber: Arc<dyn Transcriber>,
        policy: RetryPolicy,
        language: impl Into<String>,
    ) -> Self {
        Self {
            source,
            transcriber,
            policy,
            language: language.into(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Polls until the recording is fetchable. Returns the number of checks
    /// issued, or `RecordingUnavailable` after `max_attempts` misses.
    pub async fn await_available(&self, reference: &str) -> Result<u32, VoiceError> {
        let mut job = RecordingJob::new(reference, &self.policy);
        loop {
            job.attempt += 1;
            match self.source.is_available(&job.source_reference).await {
                Ok(true) => {
                    tracing::debug!(reference, attempt = job.attempt, "recording available");
                    return Ok(job.attempt);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(reference, attempt = job.attempt, error = %e, "recording availability check failed");
                }
            }

            if job.exhausted() {
                tracing::warn!(
                    reference,
                    attempts = job.attempt,
                    "recording never became available"
                );
                return Err(VoiceError::RecordingUnavailable {
                    reference: job.source_reference,
                    attempts: job.attempt,
                });
            }

            tokio::time::sleep(job.interval).await;
            job.interval = self.policy.next_interval(job.interval);
        }
    }

    /// Waits for availability, downloads, and transcribes the recording.
    pub async fn resolve_to_text(&self, reference: &str) -> Result<String, VoiceError> {
        let checks = self.await_available(reference).await?;
        let audio = self.source.download(reference).await?;
        tracing::info!(
            reference,
            checks,
            bytes = audio.len(),
            "downloaded recording"
        );

        let file_name = self.source.file_name(reference);
        self.transcriber
            .transcribe(audio, &file_name, &self.language)
            .await
    }
}

impl std::fmt::Debug for RecordingRetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRetrievalService")
            .field("policy", &self.policy)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}
