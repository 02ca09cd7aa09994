//! The send-one-unit boundary to the remote TTS service.
//!
//! The core does not know how audio is produced; it only distinguishes the
//! three outcomes the coordination layer cares about: audio bytes, a
//! transient failure worth retrying, or the session hard limit.

use std::future::Future;

/// Error surface of a single send attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Network/timeout/service hiccup on a single unit. Retried locally up
    /// to the policy bound; exhausting retries makes the unit a permanent
    /// failure without stopping the worker.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// The remote refused the request because the session quota is spent.
    /// Expected condition, not a failure: routed to the verification
    /// checkpoint and the unit is re-sent afterwards.
    #[error("session hard limit signalled by remote")]
    HardLimit,
}

/// One text-to-audio send operation against an isolated remote session.
///
/// Implementations own whatever identity the remote tracks (cookies, profile)
/// for one session; the engine never shares a client across workers unless
/// the implementation itself is session-safe.
pub trait TtsClient: Send + Sync + 'static {
    /// Synthesize `text` with the given voice, returning raw audio bytes.
    fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> impl Future<Output = Result<Vec<u8>, SendError>> + Send;
}
