//! Request builders and response parsers for each [`ApiShape`].
//!
//! Builders return JSON values so the same body can go out over reqwest or
//! into a Bedrock blob. Parsers are lenient: any missing text field reads as
//! an empty string, and only a body that is not JSON at all is an error.

use audit_core::{ApiShape, ChatDialect, CompletionDialect, ModelDescriptor};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::ProviderError;

/// Output cap sent with every request.
pub const MAX_OUTPUT_TOKENS: u32 = 500;

/// Bedrock API version tag for Anthropic messages.
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

fn separator() -> String {
    "#".repeat(80)
}

/// Build the provider-native request body for one call.
pub fn build_request(model: &ModelDescriptor, system_message: &str, prompt: &str) -> JsonValue {
    match model.shape {
        ApiShape::Chat(ChatDialect::OpenAi) => json!({
            "model": model.identifier,
            "messages": [
                {"role": "system", "content": system_message},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": MAX_OUTPUT_TOKENS,
            "response_format": {"type": "json_object"},
        }),
        ApiShape::Chat(ChatDialect::AnthropicMessages) => json!({
            "anthropic_version": BEDROCK_ANTHROPIC_VERSION,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "system": system_message,
            "messages": [
                {
                    "role": "user",
                    "content": [{"type": "text", "text": prompt}],
                },
            ],
        }),
        ApiShape::LegacyCompletion(CompletionDialect::AnthropicText) => json!({
            "prompt": format!(
                "\n\nHuman:{system_message}\n\n{prompt}\n\n{}\n\nAssistant:",
                separator()
            ),
            "max_tokens_to_sample": MAX_OUTPUT_TOKENS,
        }),
        ApiShape::LegacyCompletion(CompletionDialect::Mistral) => json!({
            "prompt": format!("{system_message}\n\n{prompt}\n\n{}", separator()),
            "max_tokens": MAX_OUTPUT_TOKENS,
        }),
        ApiShape::InstructModel => json!({
            "prompt": llama_template(system_message, prompt),
            "max_gen_len": MAX_OUTPUT_TOKENS,
        }),
    }
}

fn llama_template(system_message: &str, prompt: &str) -> String {
    format!(
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n\
         {system_message}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n\
         {prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>"
    )
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlockResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentBlockResponse {
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextCompletion {
    #[serde(default)]
    completion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MistralResponse {
    #[serde(default)]
    outputs: Vec<MistralOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct MistralOutput {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Generation {
    #[serde(default)]
    generation: Option<String>,
}

fn decode<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::ParseError(e.to_string()))
}

/// Extract the response text for `shape` from a raw response body.
pub fn parse_response(shape: ApiShape, body: &[u8]) -> Result<String, ProviderError> {
    let text = match shape {
        ApiShape::Chat(ChatDialect::OpenAi) => decode::<ChatCompletion>(body)?
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect::<Vec<_>>()
            .join(""),
        ApiShape::Chat(ChatDialect::AnthropicMessages) => decode::<MessagesResponse>(body)?
            .content
            .into_iter()
            .filter(|block| block.type_ == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(" "),
        ApiShape::LegacyCompletion(CompletionDialect::AnthropicText) => {
            decode::<TextCompletion>(body)?.completion.unwrap_or_default()
        }
        ApiShape::LegacyCompletion(CompletionDialect::Mistral) => decode::<MistralResponse>(body)?
            .outputs
            .into_iter()
            .filter_map(|output| output.text)
            .collect::<Vec<_>>()
            .join(" "),
        ApiShape::InstructModel => decode::<Generation>(body)?.generation.unwrap_or_default(),
    };

    Ok(text.trim().to_string())
}
