//! Instructions and answer parsing shared by the prompt enhancers.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use super::AdapterError;

/// Marker that introduces the final prompt in the model's answer.
const FINAL_PROMPT_MARKER: &str = "FINAL PROMPT:";

const INSTRUCTIONS: &str = r####"You prepare instructions for an image editing model. Work through three steps using the attached image and the user's request.

STEP 1 - PLAN
Describe the main subject that must be preserved: its parts, their proportions and how they connect. Then state what should change in the background and which small details on the subject should change.

STEP 2 - CHECK
Compare your subject description with the image. Answer YES if it is accurate, NO otherwise.

STEP 3 - FINAL PROMPT
If the check passed, write:
High-fidelity photorealistic edit.
Keep intact: <comma separated parts of the subject>.
Edits to perform:
<numbered, action oriented list of the edits>
If the check failed, ignore your description and write:
High-fidelity photorealistic edit.
Task: <the user's request rephrased as a clear action>

User request: "{prompt}"

Answer with the headings "### STEP 1 - PLAN:", "### STEP 2 - CHECK:" and "### STEP 3 - FINAL PROMPT:". The final prompt is plain text without markdown or code fences."####;

/// The enhancement instructions for `prompt`.
pub fn instructions(prompt: &str) -> String {
    INSTRUCTIONS.replace("{prompt}", prompt)
}

/// Decodes `image`, shrinks it so neither side exceeds `max_dimension`, and
/// re-encodes it as JPEG.
pub fn downscale_to_jpeg(
    service: &'static str,
    image: &[u8],
    max_dimension: u32,
) -> Result<Vec<u8>, AdapterError> {
    let decoded = image::load_from_memory(image)
        .map_err(|e| AdapterError::permanent(service, format!("Failed to decode image: {}", e)))?;

    let resized = if decoded.width() > max_dimension || decoded.height() > max_dimension {
        decoded.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        decoded
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| AdapterError::permanent(service, format!("Failed to encode image: {}", e)))?;
    Ok(out.into_inner())
}

/// Pulls the final prompt out of a model answer: the non-empty lines after
/// the "FINAL PROMPT:" marker, minus headings and code fences.
pub fn extract_final_prompt(response: &str) -> Option<String> {
    let mut lines = response.lines();
    lines.by_ref().find(|line| line.contains(FINAL_PROMPT_MARKER))?;

    let prompt: Vec<&str> = lines
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("```"))
        .collect();

    if prompt.is_empty() {
        None
    } else {
        Some(prompt.join("\n"))
    }
}
