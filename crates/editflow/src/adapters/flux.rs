//! Image generation through the BFL Flux Kontext API.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{AdapterError, GenerationHandle, GenerationPoll, ImageGenerator};

const SERVICE: &str = "image-generator";

/// Default connect timeout for HTTP requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a str,
    input_image: String,
    safety_tolerance: u8,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: Option<String>,
    polling_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<PollResult>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PollResult {
    pub sample: Option<String>,
}

/// What a poll response means for the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum PollState {
    /// Download the finished image from this URL.
    Ready(String),
    Pending,
    Failed(AdapterError),
}

/// Client for the Flux Kontext edit endpoint.
pub struct FluxImageGenerator {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    safety_tolerance: u8,
}

impl FluxImageGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        safety_tolerance: u8,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AdapterError::permanent(SERVICE, format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            safety_tolerance,
        })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status.as_u16(), &body));
        }
        let bytes = response
            .bytes()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

impl ImageGenerator for FluxImageGenerator {
    fn submit(&self, prompt: &str, image: &[u8]) -> Result<GenerationHandle, AdapterError> {
        let request = SubmitRequest {
            prompt,
            input_image: BASE64.encode(image),
            safety_tolerance: self.safety_tolerance,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json")
            .header("x-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status.as_u16(), &body));
        }

        let body: SubmitResponse = response.json().map_err(|e| {
            AdapterError::permanent(SERVICE, format!("Failed to parse submit response: {}", e))
        })?;
        match (body.id, body.polling_url) {
            (Some(id), Some(polling_url)) => {
                log::info!("Generation job {} submitted", id);
                Ok(GenerationHandle { id, polling_url })
            }
            _ => Err(AdapterError::permanent(
                SERVICE,
                "submit response is missing id or polling_url",
            )),
        }
    }

    fn poll(&self, handle: &GenerationHandle) -> Result<GenerationPoll, AdapterError> {
        let response = self
            .client
            .get(&handle.polling_url)
            .header("accept", "application/json")
            .header("x-key", self.api_key.expose_secret())
            .query(&[("id", handle.id.as_str())])
            .send()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status.as_u16(), &body));
        }

        let body: PollResponse = response.json().map_err(|e| {
            AdapterError::permanent(SERVICE, format!("Failed to parse poll response: {}", e))
        })?;

        match interpret_poll(body) {
            PollState::Ready(url) => {
                log::info!("Generation job {} ready", handle.id);
                Ok(GenerationPoll::Ready(self.download(&url)?))
            }
            PollState::Pending => Ok(GenerationPoll::Pending),
            PollState::Failed(err) => Err(err),
        }
    }
}

/// Maps a poll response onto ready / pending / failed.
pub fn interpret_poll(response: PollResponse) -> PollState {
    match response.status.as_str() {
        "Ready" => match response.result.and_then(|r| r.sample) {
            Some(url) => PollState::Ready(url),
            None => PollState::Failed(AdapterError::permanent(
                SERVICE,
                "job is ready but no result image was returned",
            )),
        },
        "Pending" | "Processing" | "Queued" => PollState::Pending,
        "Request Moderated" | "Content Moderated" => PollState::Failed(AdapterError::permanent(
            SERVICE,
            format!("{}: the request was rejected by content moderation", response.status),
        )),
        "Error" | "Failed" | "Task not found" => {
            let detail = response
                .details
                .map(|d| d.to_string())
                .unwrap_or_else(|| "no details".to_string());
            PollState::Failed(AdapterError::permanent(
                SERVICE,
                format!("generation {}: {}", response.status, detail),
            ))
        }
        other => {
            log::debug!("Unrecognized generation status '{}', still waiting", other);
            PollState::Pending
        }
    }
}
