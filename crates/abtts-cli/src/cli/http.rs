//! Concrete TTS send operation: form POST over curl.
//!
//! curl's blocking Easy handle runs inside `spawn_blocking`. The engine only
//! distinguishes three outcomes, so classification is narrow: HTTP 429 is
//! the session hard limit, everything else that isn't audio is transient.

use curl::easy::Easy;
use std::time::Duration;

use abtts_core::tts::{SendError, TtsClient};

/// TTS client speaking `POST text=..&voice=..` to a single endpoint.
pub struct HttpTtsClient {
    endpoint: String,
    timeout: Duration,
}

impl HttpTtsClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout,
        }
    }
}

impl TtsClient for HttpTtsClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SendError> {
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let text = text.to_string();
        let voice = voice.to_string();

        match tokio::task::spawn_blocking(move || post_form(&endpoint, &text, &voice, timeout))
            .await
        {
            Ok(result) => result,
            Err(e) => Err(SendError::Transient(format!("send task join: {}", e))),
        }
    }
}

fn transient(e: curl::Error) -> SendError {
    if e.is_operation_timedout() {
        SendError::Transient(format!("timeout: {}", e))
    } else if e.is_couldnt_connect() || e.is_couldnt_resolve_host() {
        SendError::Transient(format!("connection: {}", e))
    } else {
        SendError::Transient(e.to_string())
    }
}

fn post_form(
    endpoint: &str,
    text: &str,
    voice: &str,
    timeout: Duration,
) -> Result<Vec<u8>, SendError> {
    let mut easy = Easy::new();
    easy.url(endpoint).map_err(transient)?;
    easy.post(true).map_err(transient)?;
    easy.timeout(timeout).map_err(transient)?;

    let text_enc = easy.url_encode(text.as_bytes());
    let voice_enc = easy.url_encode(voice.as_bytes());
    let form = format!("text={}&voice={}", text_enc, voice_enc);
    easy.post_fields_copy(form.as_bytes()).map_err(transient)?;

    let mut body = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(transient)?;
        transfer.perform().map_err(transient)?;
    }

    let code = easy.response_code().map_err(transient)?;
    match code {
        200..=299 => {
            if body.is_empty() {
                Err(SendError::Transient("empty response body".into()))
            } else {
                Ok(body)
            }
        }
        429 => Err(SendError::HardLimit),
        other => Err(SendError::Transient(format!("HTTP {}", other))),
    }
}
