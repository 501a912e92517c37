//! Prompt enhancement through the Gemini `generateContent` API.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::prompt::{downscale_to_jpeg, extract_final_prompt, instructions};
use super::{AdapterError, PromptEnhancer};

const SERVICE: &str = "prompt-enhancer";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TEMPERATURE: f32 = 0.1;
const TOP_P: f32 = 0.95;
const MAX_OUTPUT_TOKENS: u32 = 2048;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Enhancer backed by a multimodal Gemini model.
pub struct GeminiPromptEnhancer {
    client: Client,
    url: String,
    api_key: SecretString,
    max_image_dimension: u32,
}

impl GeminiPromptEnhancer {
    /// `endpoint` is the API base, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub fn new(
        endpoint: &str,
        model: &str,
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
            url: generate_url(endpoint, model),
            api_key,
            max_image_dimension,
        })
    }

    fn build_request(&self, prompt: &str, jpeg: &[u8]) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: instructions(prompt),
                    },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: BASE64.encode(jpeg),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

fn generate_url(endpoint: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        endpoint.trim_end_matches('/'),
        model
    )
}

impl PromptEnhancer for GeminiPromptEnhancer {
    fn enhance(&self, prompt: &str, image: &[u8]) -> Result<String, AdapterError> {
        let jpeg = downscale_to_jpeg(SERVICE, image, self.max_image_dimension)?;
        let request = self.build_request(prompt, &jpeg);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status.as_u16(), &body));
        }

        let body: GenerateResponse = response.json().map_err(|e| {
            AdapterError::permanent(SERVICE, format!("Failed to parse response: {}", e))
        })?;
        let enhanced = final_prompt(body)?;
        log::debug!("Enhanced prompt '{}' -> '{}'", prompt, enhanced);
        Ok(enhanced)
    }
}

/// Joins the text parts of the first candidate and extracts the final prompt.
fn final_prompt(body: GenerateResponse) -> Result<String, AdapterError> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AdapterError::permanent(SERVICE, "response had no content"));
    }
    extract_final_prompt(&text)
        .ok_or_else(|| AdapterError::permanent(SERVICE, "response did not contain a final prompt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enhancer() -> GeminiPromptEnhancer {
        GeminiPromptEnhancer::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            "gemini-1.5-flash",
            SecretString::from("k"),
            1024,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_generate_url() {
        assert_eq!(
            enhancer().url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_shape() {
        let request = enhancer().build_request("make it snow", &[1, 2, 3]);
        let json = serde_json::to_value(&request).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(parts[0]["text"].as_str().unwrap().contains("\"make it snow\""));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_final_prompt_joins_parts() {
        let body: GenerateResponse = serde_json::from_str(
            r####"{"candidates": [{"content": {"role": "model", "parts": [
                {"text": "### STEP 2 - VALIDATION:\nNO\n\n### STEP 3 - FINAL PROMPT:\n"},
                {"text": "High-fidelity photorealistic edit.\nTask: turn the sky purple"}
            ]}, "finishReason": "STOP"}]}"####,
        )
        .unwrap();
        assert_eq!(
            final_prompt(body).unwrap(),
            "High-fidelity photorealistic edit.\nTask: turn the sky purple"
        );
    }

    #[test]
    fn test_blocked_response_is_permanent() {
        // Safety-blocked answers come back without content.
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"finishReason": "SAFETY"}], "promptFeedback": {"blockReason": "SAFETY"}}"#,
        )
        .unwrap();
        let err = final_prompt(body).unwrap_err();
        assert!(!err.is_retryable());

        let body: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(final_prompt(body).is_err());
    }

    #[test]
    fn test_answer_without_marker_is_rejected() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Make the sky purple."}]}}]}"#,
        )
        .unwrap();
        assert!(final_prompt(body).is_err());
    }
}
