//! Platform services the session core calls but does not implement.

use async_trait::async_trait;

use crate::history::Attachment;

/// Resolves a spoken application name and launches it.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Human-readable status. Unknown names yield a "can't open" message, not an error.
    async fn open_app(&self, name: &str) -> String;
}

/// Screen or webcam frame source for vision turns.
#[async_trait]
pub trait ImageCapture: Send + Sync {
    async fn capture_image(&self) -> anyhow::Result<Attachment>;
}

/// Text-to-speech sink. Calls are fire-and-forget and must not block.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str);
    fn stop(&self);
}
