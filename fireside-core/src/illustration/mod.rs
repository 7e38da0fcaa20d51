//! Companion illustration requests.
//!
//! A two-step external call: (1) summarize the finalized story fragment into
//! an image-generation prompt, (2) submit that prompt to the image endpoint,
//! walking an ordered model list top-down. Quota exhaustion and unknown-model
//! responses move on to the next model; any other failure is terminal for the
//! request. Illustrations are decorative — every failure is logged and the
//! conversation is never blocked.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{FiresideError, Result};

/// Broadcast capacity for illustration results.
const BROADCAST_CAP: usize = 16;

/// Default endpoint; overridable for tests and proxies.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Per-request deadline; image generation is the slow step.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the illustration pipeline.
#[derive(Debug, Clone)]
pub struct IllustrationConfig {
    /// API credential, supplied at process start.
    pub api_key: String,
    /// Model used to distill story text into an image prompt.
    pub prompt_model: String,
    /// Image models consulted top-down until one succeeds.
    pub image_models: Vec<String>,
    /// Character notes folded into the summarization instruction, derived
    /// from the configured listeners.
    pub character_notes: String,
    /// API base URL.
    pub base_url: String,
}

impl IllustrationConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            prompt_model: "gemini-2.5-flash".into(),
            image_models: vec!["imagen-4.0-generate-001".into()],
            character_notes: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

/// A finished illustration, keyed on the turn text that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IllustrationEvent {
    /// The finalized agent turn the image illustrates.
    pub source_text: String,
    /// PNG as a `data:image/png;base64,…` URL.
    pub data_url: String,
}

// -- wire shapes ------------------------------------------------------------

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters,
}

#[derive(Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    aspect_ratio: &'static str,
    output_mime_type: &'static str,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

// ---------------------------------------------------------------------------

/// Outcome of one image-model attempt.
enum Attempt {
    Done(String),
    /// Quota/not-found — consult the next model on the list.
    NextModel(String),
    Fatal(FiresideError),
}

/// Whether an HTTP status means "try the next model" rather than give up.
fn is_retryable_status(status: u16) -> bool {
    // 429: RESOURCE_EXHAUSTED; 404: model id unknown in this project.
    status == 429 || status == 404
}

/// Request-side state, clonable into each fire-and-forget task.
/// `reqwest::Client` is reference-counted internally, so this is cheap.
#[derive(Clone)]
struct RequestCore {
    http: reqwest::Client,
    config: IllustrationConfig,
}

/// Fire-and-forget illustration client.
pub struct Illustrator {
    core: RequestCore,
    event_tx: broadcast::Sender<IllustrationEvent>,
}

impl Illustrator {
    pub fn new(config: IllustrationConfig) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            core: RequestCore {
                http: reqwest::Client::new(),
                config,
            },
            event_tx,
        }
    }

    /// Subscribe to finished illustrations.
    pub fn subscribe(&self) -> broadcast::Receiver<IllustrationEvent> {
        self.event_tx.subscribe()
    }

    /// Request an illustration for a finalized story fragment. Fire and
    /// forget: the result arrives on the event channel; failures only log.
    /// A superseding request does not cancel an outstanding one — at worst an
    /// extra image renders, which is acceptable staleness.
    pub fn request(&self, story_text: String) {
        if story_text.trim().is_empty() {
            return;
        }
        let core = self.core.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match core.generate(&story_text).await {
                Ok(Some(data_url)) => {
                    info!(source_len = story_text.len(), "illustration ready");
                    let _ = event_tx.send(IllustrationEvent {
                        source_text: story_text,
                        data_url,
                    });
                }
                Ok(None) => {
                    warn!("illustration skipped: every image model was exhausted");
                }
                Err(e) => {
                    warn!("illustration failed: {e}");
                }
            }
        });
    }
}

impl RequestCore {
    /// The full two-step round trip. `None` when all image models were
    /// exhausted by retryable failures.
    async fn generate(&self, story_text: &str) -> Result<Option<String>> {
        let prompt = self.summarize(story_text).await?;
        debug!(prompt = %prompt, "image prompt distilled");

        for model in &self.config.image_models {
            match self.generate_image(model, &prompt).await {
                Attempt::Done(b64) => {
                    return Ok(Some(format!("data:image/png;base64,{b64}")));
                }
                Attempt::NextModel(reason) => {
                    warn!(model = %model, reason = %reason, "image model unavailable, consulting next");
                }
                Attempt::Fatal(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Step 1: distill the story fragment into an image prompt.
    async fn summarize(&self, story_text: &str) -> Result<String> {
        let instruction = build_summarize_instruction(&self.config.character_notes, story_text);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, self.config.prompt_model, self.config.api_key
        );
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: &instruction }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FiresideError::Illustration(format!(
                "prompt model error {status}: {body}"
            )));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                FiresideError::Illustration("prompt model returned no text".into())
            })
    }

    /// Step 2: one image-model attempt.
    async fn generate_image(&self, model: &str, prompt: &str) -> Attempt {
        let url = format!(
            "{}/models/{}:predict?key={}",
            self.config.base_url, model, self.config.api_key
        );
        let request = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: "1:1",
                output_mime_type: "image/png",
            },
        };

        let response = match self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Fatal(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_retryable_status(status.as_u16()) {
                return Attempt::NextModel(format!("{status}: {body}"));
            }
            return Attempt::Fatal(FiresideError::Illustration(format!(
                "image model error {status}: {body}"
            )));
        }

        let parsed: PredictResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return Attempt::Fatal(e.into()),
        };

        match parsed
            .predictions
            .into_iter()
            .next()
            .and_then(|p| p.bytes_base64_encoded)
        {
            Some(b64) => Attempt::Done(b64),
            None => Attempt::Fatal(FiresideError::Illustration(
                "image model returned no image bytes".into(),
            )),
        }
    }
}

/// The summarization instruction wrapping a story fragment.
fn build_summarize_instruction(character_notes: &str, story_text: &str) -> String {
    let mut instruction = String::from(
        "Based on the following story segment, create a short, descriptive \
         prompt for an image generation model.",
    );
    if !character_notes.trim().is_empty() {
        instruction.push(' ');
        instruction.push_str(character_notes.trim());
    }
    instruction.push_str(
        " The style should be a simple, friendly, whimsical cartoon for a \
         young child. The prompt should only contain the description of the \
         scene, focusing on the main characters and setting. Story segment: ",
    );
    instruction.push('"');
    instruction.push_str(story_text);
    instruction.push('"');
    instruction
}
