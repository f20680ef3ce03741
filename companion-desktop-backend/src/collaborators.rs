use anyhow::anyhow;
use async_trait::async_trait;
use companion_core::{Attachment, ImageCapture, SpeechOutput};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::protocol::ServerEvent;

/// Frame uploaded by the overlay for the request currently being handled.
/// Capturing consumes it, so a frame is never reused by a later request.
#[derive(Debug, Default, Clone)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Attachment>>>,
}

impl LatestFrame {
    pub async fn put(&self, frame: Option<Attachment>) {
        *self.slot.lock().await = frame;
    }

    pub async fn clear(&self) {
        self.slot.lock().await.take();
    }
}

#[async_trait]
impl ImageCapture for LatestFrame {
    async fn capture_image(&self) -> anyhow::Result<Attachment> {
        self.slot
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("no frame was supplied with this request"))
    }
}

/// Speech is rendered by the overlay; this just forwards the calls as events.
#[derive(Debug, Clone)]
pub struct BroadcastSpeech {
    events: broadcast::Sender<ServerEvent>,
}

impl BroadcastSpeech {
    pub fn new(events: broadcast::Sender<ServerEvent>) -> Self {
        Self { events }
    }
}

impl SpeechOutput for BroadcastSpeech {
    fn speak(&self, text: &str) {
        let _ = self.events.send(ServerEvent::Speak {
            text: text.to_string(),
        });
    }

    fn stop(&self) {
        let _ = self.events.send(ServerEvent::StopSpeaking);
    }
}
