use anyhow::{Context, Result};
use companion_core::{
    ActionOutcome, Attachment, CommandAction, CommandRouter, SessionController,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::collaborators::{BroadcastSpeech, LatestFrame};
use crate::protocol::{ClientRequest, ServerEvent};

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// --- API Shared State ---
// One controller per process; the mutex serializes every request against it.
pub struct ApiState {
    controller: Mutex<SessionController>,
    router: CommandRouter,
    frame: LatestFrame,
    events: broadcast::Sender<ServerEvent>,
}

impl ApiState {
    /// Wires the overlay-facing collaborators (frames, speech) into `controller`.
    pub fn new(controller: SessionController) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let frame = LatestFrame::default();
        let controller = controller
            .with_capture(Arc::new(frame.clone()))
            .with_speech(Arc::new(BroadcastSpeech::new(events.clone())));

        Self {
            controller: Mutex::new(controller),
            router: CommandRouter::default(),
            frame,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        // No subscribers is fine; the overlay may not be connected yet.
        let _ = self.events.send(event);
    }

    pub async fn start(&self) {
        self.controller.lock().await.start().await;
    }

    /// Re-reads the clock and broadcasts the mood when the energy tier moved.
    pub async fn refresh_energy(&self) {
        let mut controller = self.controller.lock().await;
        if controller.refresh_energy() {
            self.emit(ServerEvent::mood(controller.mood_state()));
        }
    }

    pub async fn handle_request(&self, req: ClientRequest) -> Result<()> {
        match req {
            ClientRequest::Chat {
                message,
                image,
                stream,
            } => {
                let attachment = decode_frame(image)?;
                let started = Instant::now();
                let id = Uuid::new_v4();
                let mut controller = self.controller.lock().await;

                let reply = if stream && attachment.is_none() {
                    let events = self.events.clone();
                    let mut on_chunk = move |chunk: &str| {
                        let _ = events.send(ServerEvent::MessageChunk {
                            id,
                            content_chunk: chunk.to_string(),
                        });
                    };
                    controller
                        .send_message(&message, None, Some(&mut on_chunk))
                        .await
                } else {
                    controller.send_message(&message, attachment, None).await
                };

                self.emit_reply(id, reply, started);
            }
            ClientRequest::AnalyzeScreen { image, prompt } => {
                let frame = decode_frame(Some(image))?;
                let started = Instant::now();
                let mut controller = self.controller.lock().await;
                self.frame.put(frame).await;
                let reply = controller.analyze_screen(prompt.as_deref()).await;
                self.frame.clear().await;
                self.emit_reply(Uuid::new_v4(), reply, started);
            }
            ClientRequest::VoiceCommand { transcript, image } => {
                let frame = decode_frame(image)?;
                match self.router.route(&transcript) {
                    Some(action) => self.run_action(action, frame).await,
                    None => debug!(transcript = %transcript, "Voice transcript ignored"),
                }
            }
            ClientRequest::MenuSelect { id } => match self.router.route(&id) {
                Some(action) => self.run_action(action, None).await,
                None => debug!(menu_id = %id, "Unknown menu id ignored"),
            },
            ClientRequest::OpenApp { name } => {
                self.run_action(CommandAction::OpenApp { name }, None).await
            }
            ClientRequest::SetMood { mood } => {
                self.run_action(CommandAction::ModeSwitch { mood }, None)
                    .await
            }
            ClientRequest::Reset => {
                let mut controller = self.controller.lock().await;
                controller.reset().await;
                let session_id = controller.session().map(|s| s.id().to_string());
                info!(session_id = ?session_id, "Session reset by overlay");
                self.emit(ServerEvent::status("session_reset", session_id));
            }
            ClientRequest::GetMood => {
                let state = self.controller.lock().await.mood_state();
                self.emit(ServerEvent::mood(state));
            }
        }
        Ok(())
    }

    async fn run_action(&self, action: CommandAction, frame: Option<Attachment>) {
        let started = Instant::now();
        let mut controller = self.controller.lock().await;
        self.frame.put(frame).await;
        let outcome = controller.execute(action).await;
        self.frame.clear().await;

        match outcome {
            ActionOutcome::Reply(reply) => self.emit_reply(Uuid::new_v4(), reply, started),
            ActionOutcome::AppLaunch(status) => self.emit(ServerEvent::AppLaunch { status }),
            ActionOutcome::MoodChanged(state) => self.emit(ServerEvent::mood(state)),
        }
    }

    fn emit_reply(&self, id: Uuid, content: String, started: Instant) {
        self.emit(ServerEvent::CompleteMessage {
            id,
            content,
            latency_ms: started.elapsed().as_millis() as u64,
        });
    }
}

fn decode_frame(image: Option<String>) -> Result<Option<Attachment>> {
    image
        .map(|encoded| Attachment::from_base64(&encoded).context("image is not valid base64"))
        .transpose()
}
