use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BackendError, ChunkStream, Credential, LanguageBackend};
use crate::config::CompanionConfig;
use crate::history::{Attachment, Message, Role};
use crate::session::Session;

const DEFAULT_VISION_QUESTION: &str = "What do you see in this image?";

// --- Wire types (Generative Language REST API) ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData(InlineData<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn empty_reason(&self) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return format!("prompt blocked ({reason})");
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            Some(reason) => format!("no text in response (finish reason {reason})"),
            None => "no candidates in response".to_string(),
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn history_contents(history: &[Message]) -> Vec<Content<'_>> {
    history
        .iter()
        .map(|message| Content {
            role: Some(role_name(message.role())),
            parts: vec![Part::Text(message.content())],
        })
        .collect()
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => format!("API returned {status}: {}", envelope.error.message),
        Err(_) if body.trim().is_empty() => format!("API returned {status}"),
        Err(_) => format!("API returned {status}: {}", body.trim()),
    }
}

fn parse_stream_event(data: &str) -> Result<String, BackendError> {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(data) {
        return Err(BackendError::failed(format!(
            "stream error: {}",
            envelope.error.message
        )));
    }
    let event: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| BackendError::failed(format!("malformed stream event: {e}")))?;
    if let Some(reason) = event
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(BackendError::failed(format!("prompt blocked ({reason})")));
    }
    Ok(event.text())
}

// --- Client ---

/// [`LanguageBackend`] over the Gemini `generateContent` family of endpoints.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http_client: Client,
    credential: Credential,
    base_url: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &CompanionConfig) -> Self {
        Self::with_settings(
            Credential::from_key(config.api_key.as_deref()),
            &config.api_base_url,
            &config.model,
            config.max_output_tokens,
        )
    }

    pub fn with_settings(
        credential: Credential,
        base_url: &str,
        model: &str,
        max_output_tokens: u32,
    ) -> Self {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        if credential.is_configured() {
            tracing::info!(model = %model, "Language backend configured");
        } else {
            tracing::error!(
                "GEMINI_API_KEY is missing or a placeholder; language backend disabled for this run"
            );
        }

        Self {
            http_client,
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_output_tokens,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn request<'a>(
        &self,
        persona: &'a str,
        contents: Vec<Content<'a>>,
    ) -> GenerateContentRequest<'a> {
        let system_instruction = (!persona.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::Text(persona)],
        });
        GenerateContentRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    fn session_request<'a>(
        &self,
        session: &'a Session,
        prompt: &'a str,
    ) -> GenerateContentRequest<'a> {
        let mut contents = history_contents(session.history().messages());
        contents.push(Content {
            role: Some(role_name(Role::User)),
            parts: vec![Part::Text(prompt)],
        });
        self.request(session.persona(), contents)
    }

    async fn post(
        &self,
        url: &str,
        key: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<reqwest::Response, BackendError> {
        tracing::debug!(
            url = %url,
            contents = body.contents.len(),
            "Sending request to language backend"
        );

        let response = self
            .http_client
            .post(url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::failed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::failed(api_error_message(status, &text)));
        }

        Ok(response)
    }

    async fn generate_once(
        &self,
        key: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<String, BackendError> {
        let response = self.post(&self.endpoint("generateContent"), key, body).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::failed(format!("malformed response: {e}")))?;

        let text = parsed.text();
        if text.is_empty() {
            return Err(BackendError::failed(parsed.empty_reason()));
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageBackend for GeminiClient {
    async fn generate(&self, session: &Session, prompt: &str) -> Result<String, BackendError> {
        let key = self.credential.require()?;
        let body = self.session_request(session, prompt);
        self.generate_once(key, &body).await
    }

    async fn generate_with_image(
        &self,
        persona: &str,
        prompt: &str,
        image: &Attachment,
    ) -> Result<String, BackendError> {
        let key = self.credential.require()?;
        let question = if prompt.trim().is_empty() {
            DEFAULT_VISION_QUESTION
        } else {
            prompt
        };
        let contents = vec![Content {
            role: Some(role_name(Role::User)),
            parts: vec![
                Part::Text(question),
                Part::InlineData(InlineData {
                    mime_type: image.mime_type(),
                    data: image.to_base64(),
                }),
            ],
        }];
        let body = self.request(persona, contents);
        self.generate_once(key, &body).await
    }

    async fn stream_chunks(
        &self,
        session: &Session,
        prompt: &str,
    ) -> Result<ChunkStream, BackendError> {
        let key = self.credential.require()?;
        let body = self.session_request(session, prompt);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, key, &body).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_stream_event(&event.data),
                Err(e) => Err(BackendError::failed(format!("stream interrupted: {e}"))),
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationHistory;
    use axum::{
        extract::{Path, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    fn reply_body(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    async fn fake_api(
        State(recorded): State<Recorded>,
        Path(call): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        let key = headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        recorded
            .calls
            .lock()
            .unwrap()
            .push((call.clone(), key.clone(), body));

        if key.as_deref() != Some("test-key") {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" } })),
            )
                .into_response();
        }

        if call.ends_with(":streamGenerateContent") {
            let events = [reply_body("Hel"), reply_body("lo")]
                .iter()
                .map(|v| format!("data: {v}\n\n"))
                .collect::<String>();
            return ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response();
        }

        Json(reply_body("Hello there")).into_response()
    }

    async fn spawn_fake_api() -> (String, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/v1beta/models/:call", post(fake_api))
            .with_state(recorded.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1beta"), recorded)
    }

    fn client(base_url: &str, key: Option<&str>) -> GeminiClient {
        GeminiClient::with_settings(Credential::from_key(key), base_url, "gemini-test", 150)
    }

    fn session_with_history() -> Session {
        let mut history = ConversationHistory::new();
        history.push(Message::user("hi"));
        history.push(Message::assistant("hello, friend"));
        Session::new(history, "Be brief.")
    }

    #[tokio::test]
    async fn unconfigured_client_never_reaches_the_network() {
        let (base_url, recorded) = spawn_fake_api().await;
        let backend = client(&base_url, Some("your_api_key_here"));
        let session = session_with_history();

        assert_eq!(
            backend.generate(&session, "hi").await,
            Err(BackendError::Unavailable)
        );
        assert_eq!(
            backend
                .generate_with_image("p", "what", &Attachment::jpeg(vec![1]))
                .await,
            Err(BackendError::Unavailable)
        );
        assert!(matches!(
            backend.stream_chunks(&session, "hi").await,
            Err(BackendError::Unavailable)
        ));
        assert!(recorded.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generate_sends_persona_history_and_prompt() {
        let (base_url, recorded) = spawn_fake_api().await;
        let backend = client(&base_url, Some("test-key"));

        let reply = backend
            .generate(&session_with_history(), "how are you?")
            .await
            .unwrap();
        assert_eq!(reply, "Hello there");

        let calls = recorded.calls.lock().unwrap();
        let (call, key, body) = &calls[0];
        assert_eq!(call, "gemini-test:generateContent");
        assert_eq!(key.as_deref(), Some("test-key"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 150);
        assert_eq!(
            body["contents"],
            json!([
                { "role": "user", "parts": [{ "text": "hi" }] },
                { "role": "model", "parts": [{ "text": "hello, friend" }] },
                { "role": "user", "parts": [{ "text": "how are you?" }] }
            ])
        );
    }

    #[tokio::test]
    async fn stream_decodes_sse_fragments_in_order() {
        let (base_url, recorded) = spawn_fake_api().await;
        let backend = client(&base_url, Some("test-key"));
        let mut seen = Vec::new();

        let reply = backend
            .generate_stream(&session_with_history(), "hi", &mut |c: &str| {
                seen.push(c.to_string())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(reply, "Hello");
        assert_eq!(
            recorded.calls.lock().unwrap()[0].0,
            "gemini-test:streamGenerateContent"
        );
    }

    #[tokio::test]
    async fn api_errors_surface_the_server_message() {
        let (base_url, _recorded) = spawn_fake_api().await;
        let backend = client(&base_url, Some("wrong-key"));

        match backend.generate(&session_with_history(), "hi").await {
            Err(BackendError::Failed { message }) => {
                assert!(message.contains("API key not valid"), "{message}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn vision_turn_is_single_shot_with_inline_image() {
        let (base_url, recorded) = spawn_fake_api().await;
        let backend = client(&base_url, Some("test-key"));
        let image = Attachment::new("image/png", vec![1, 2, 3]);

        let reply = backend
            .generate_with_image("Be brief.", "  ", &image)
            .await
            .unwrap();
        assert_eq!(reply, "Hello there");

        let calls = recorded.calls.lock().unwrap();
        let body = &calls[0].2;
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], DEFAULT_VISION_QUESTION);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transient_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = client(&format!("http://{addr}/v1beta"), Some("test-key"));

        assert!(matches!(
            backend.generate(&session_with_history(), "hi").await,
            Err(BackendError::Failed { .. })
        ));
    }

    #[test]
    fn stream_event_errors_and_empty_events() {
        assert_eq!(
            parse_stream_event(r#"{"error":{"code":500,"message":"overloaded"}}"#),
            Err(BackendError::failed("stream error: overloaded"))
        );
        assert_eq!(parse_stream_event(r#"{"candidates":[]}"#), Ok(String::new()));
        assert!(parse_stream_event("not json").is_err());
    }

    #[test]
    fn blocked_stream_event_fails_like_the_single_shot_path() {
        let blocked = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(
            parse_stream_event(blocked),
            Err(BackendError::failed("prompt blocked (SAFETY)"))
        );
        let parsed: GenerateContentResponse = serde_json::from_str(blocked).unwrap();
        assert_eq!(parsed.empty_reason(), "prompt blocked (SAFETY)");
    }
}
