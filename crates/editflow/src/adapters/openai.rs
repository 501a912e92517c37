//! Prompt enhancement through an OpenAI-compatible chat completions API.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::prompt::{downscale_to_jpeg, extract_final_prompt, instructions};
use super::{AdapterError, PromptEnhancer};

const SERVICE: &str = "prompt-enhancer";

/// Default connect timeout for HTTP requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 800;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Enhancer backed by a vision-capable chat model.
pub struct OpenAiPromptEnhancer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    max_image_dimension: u32,
}

impl OpenAiPromptEnhancer {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        max_image_dimension: u32,
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
            model: model.into(),
            api_key,
            max_image_dimension,
        })
    }

    fn build_request(&self, prompt: &str, image_data_url: String) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: instructions(prompt),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_url,
                        },
                    },
                ],
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }
}

impl PromptEnhancer for OpenAiPromptEnhancer {
    fn enhance(&self, prompt: &str, image: &[u8]) -> Result<String, AdapterError> {
        let jpeg = downscale_to_jpeg(SERVICE, image, self.max_image_dimension)?;
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg));
        let request = self.build_request(prompt, data_url);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status.as_u16(), &body));
        }

        let body: ChatResponse = response.json().map_err(|e| {
            AdapterError::permanent(SERVICE, format!("Failed to parse response: {}", e))
        })?;
        let enhanced = final_prompt(body)?;
        log::debug!("Enhanced prompt '{}' -> '{}'", prompt, enhanced);
        Ok(enhanced)
    }
}

fn final_prompt(body: ChatResponse) -> Result<String, AdapterError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AdapterError::permanent(SERVICE, "response had no content"))?;

    extract_final_prompt(&content)
        .ok_or_else(|| AdapterError::permanent(SERVICE, "response did not contain a final prompt"))
}
