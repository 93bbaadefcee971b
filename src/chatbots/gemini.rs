use core::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    Chatbot, ChatbotCreationError, Citation, ExtractError, Message,
    RawReply, Reply, Role, TransportFault,
};

const GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/";

pub const AVAILABLE_MODELS: [&str; 4] = [
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
];

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GoogleSearchTool {
    google_search: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GoogleSearchTool>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSource {
    uri: String,
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: GeminiContent,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[non_exhaustive]
pub struct GeminiChatbot {
    model: String,
    grounding: bool,
    client: Client,
    timeout: Duration,
}

impl GeminiChatbot {
    #[inline]
    pub fn new(
        model: &str,
        timeout: Duration,
        grounding: bool,
    ) -> Result<Self, ChatbotCreationError> {
        if !AVAILABLE_MODELS.contains(&model) {
            return Err(ChatbotCreationError::UnknownModel);
        }

        Ok(Self {
            model: model.to_owned(),
            grounding,
            client: Client::new(),
            timeout,
        })
    }

    fn convert(messages: &[Message]) -> Vec<GeminiContent> {
        let mut contents = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                // This endpoint has no system role; the prompt rides as
                // the leading user turn.
                Role::System | Role::User => "user",
                Role::Model => "model",
            };
            contents.push(GeminiContent {
                role: Some(role.to_owned()),
                parts: vec![GeminiPart {
                    text: msg.content.clone(),
                }],
            });
        }

        contents
    }
}

#[async_trait]
impl Chatbot for GeminiChatbot {
    #[inline]
    fn name(&self) -> &'static str {
        "Gemini"
    }

    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn exchange(
        &self,
        messages: &[Message],
        key: &str,
    ) -> Result<RawReply, TransportFault> {
        let url = format!(
            "{GEMINI_BASE_URL}{}:generateContent?key={key}",
            self.model
        );

        let request_body = GeminiRequest {
            contents: Self::convert(messages),
            tools: self.grounding.then(|| {
                vec![GoogleSearchTool {
                    google_search: serde_json::Map::new(),
                }]
            }),
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportFault::Timeout
                } else {
                    TransportFault::Network(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                TransportFault::Timeout
            } else {
                TransportFault::Network(err.to_string())
            }
        })?;

        Ok(RawReply::new(status, body))
    }

    #[inline]
    fn extract(&self, body: &str) -> Result<Reply, ExtractError> {
        let response: GeminiResponse = serde_json::from_str(body)?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(ExtractError::NoCandidates)?;

        let text = candidate
            .content
            .parts
            .into_iter()
            .next()
            .map(|part| part.text)
            .ok_or(ExtractError::NoCandidates)?;

        let citations = candidate
            .grounding_metadata
            .map(|metadata| {
                metadata
                    .grounding_chunks
                    .into_iter()
                    .filter_map(|chunk| chunk.web)
                    .map(|web| Citation {
                        uri: web.uri,
                        title: web.title,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Reply { text, citations })
    }
}
