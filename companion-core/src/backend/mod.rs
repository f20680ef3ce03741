use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::history::Attachment;
use crate::session::Session;

pub mod gemini;

/// Incremental fragments of one generation, in the order the backend produced them.
/// Dropping the stream abandons the request.
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

/// Receives each fragment as it arrives. Must not block.
pub type ChunkCallback<'a> = dyn for<'c> FnMut(&'c str) + Send + 'a;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No usable credential was configured. Permanent for the process lifetime.
    #[error("language backend unavailable: no valid credential configured")]
    Unavailable,
    /// Transport or API-level failure. The user may simply try again.
    #[error("language backend error: {message}")]
    Failed { message: String },
}

impl BackendError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Credential capability, decided once at construction and checked on every call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Configured(String),
    Unconfigured,
}

impl Credential {
    /// Value shipped in sample `.env` files; treated as no key at all.
    pub const PLACEHOLDER: &'static str = "your_api_key_here";

    pub fn from_key(key: Option<&str>) -> Self {
        match key.map(str::trim) {
            Some(k) if !k.is_empty() && k != Self::PLACEHOLDER => Self::Configured(k.to_string()),
            _ => Self::Unconfigured,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    /// The key, or `Unavailable` without further ado.
    pub fn require(&self) -> Result<&str, BackendError> {
        match self {
            Self::Configured(key) => Ok(key),
            Self::Unconfigured => Err(BackendError::Unavailable),
        }
    }
}

// Keep keys out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configured(_) => f.write_str("Configured(<redacted>)"),
            Self::Unconfigured => f.write_str("Unconfigured"),
        }
    }
}

/// Hosted language-model API as seen by the session controller.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Single request/response against the session's persona and history.
    async fn generate(&self, session: &Session, prompt: &str) -> Result<String, BackendError>;

    /// Stateless multimodal turn. Session history is neither read nor written.
    async fn generate_with_image(
        &self,
        persona: &str,
        prompt: &str,
        image: &Attachment,
    ) -> Result<String, BackendError>;

    /// Opens a streaming generation against the session's persona and history.
    async fn stream_chunks(&self, session: &Session, prompt: &str)
        -> Result<ChunkStream, BackendError>;

    /// Drives [`LanguageBackend::stream_chunks`], handing each fragment to `on_chunk` as
    /// it arrives and returning the concatenated reply. The first error ends delivery;
    /// fragments already handed out stay handed out. A stream that ends without any
    /// text is a failure.
    async fn generate_stream(
        &self,
        session: &Session,
        prompt: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<String, BackendError> {
        let mut stream = self.stream_chunks(session, prompt).await?;
        let mut full_text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            on_chunk(&chunk);
            full_text.push_str(&chunk);
        }
        if full_text.is_empty() {
            return Err(BackendError::failed("stream produced no text"));
        }
        Ok(full_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn placeholder_and_blank_keys_are_unconfigured() {
        assert_eq!(Credential::from_key(None), Credential::Unconfigured);
        assert_eq!(Credential::from_key(Some("   ")), Credential::Unconfigured);
        assert_eq!(
            Credential::from_key(Some("your_api_key_here")),
            Credential::Unconfigured
        );
        assert!(Credential::from_key(Some(" abc123 ")).is_configured());
        assert_eq!(Credential::from_key(Some(" abc123 ")).require(), Ok("abc123"));
        assert_eq!(
            Credential::Unconfigured.require(),
            Err(BackendError::Unavailable)
        );
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", Credential::from_key(Some("secret-key")));
        assert!(!rendered.contains("secret-key"));
    }

    #[tokio::test]
    async fn stream_delivers_chunks_in_order_and_returns_the_whole() {
        let backend = ScriptedBackend::new().with_stream(vec![Ok("Hel"), Ok("lo")]);
        let session = Session::new(Default::default(), "persona");
        let mut seen = Vec::new();

        let reply = backend
            .generate_stream(&session, "hi", &mut |chunk: &str| seen.push(chunk.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_delivered_chunks() {
        let backend = ScriptedBackend::new().with_stream(vec![
            Ok("par"),
            Err(BackendError::failed("connection reset")),
            Ok("never"),
        ]);
        let session = Session::new(Default::default(), "persona");
        let mut seen = Vec::new();

        let result = backend
            .generate_stream(&session, "hi", &mut |chunk: &str| seen.push(chunk.to_string()))
            .await;

        assert_eq!(result, Err(BackendError::failed("connection reset")));
        assert_eq!(seen, vec!["par"]);
    }

    #[tokio::test]
    async fn immediate_failure_delivers_nothing() {
        let backend = ScriptedBackend::new().failing(BackendError::Unavailable);
        let session = Session::new(Default::default(), "persona");
        let mut calls = 0;

        let result = backend
            .generate_stream(&session, "hi", &mut |_: &str| calls += 1)
            .await;

        assert_eq!(result, Err(BackendError::Unavailable));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn stream_without_text_is_a_failure() {
        let backend = ScriptedBackend::new().with_stream(vec![Ok(""), Ok("")]);
        let session = Session::new(Default::default(), "persona");
        let mut calls = 0;

        let result = backend
            .generate_stream(&session, "hi", &mut |_: &str| calls += 1)
            .await;

        assert_eq!(result, Err(BackendError::failed("stream produced no text")));
        assert_eq!(calls, 0);
    }
}
