//! OpenAI-compatible embedding and chat providers.
//!
//! Uses the `async-openai` crate, so any OpenAI-compatible endpoint (OpenAI,
//! Azure-hosted deployments, local proxies) works via the base URL override.
//! These providers perform a single attempt each; gating, truncation, and
//! retry live in [`super::EmbeddingClient`] / [`super::ChatClient`].

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateEmbeddingRequest, EmbeddingInput, ImageDetail, ImageUrl,
};
use async_trait::async_trait;

use crate::error::EmbeddingError;

use super::{ChatProvider, EmbeddingProvider};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct AoaiSettings {
    /// API key (fetched from the secret store by the caller).
    pub api_key: String,

    /// Optional base URL override (Azure deployment, proxy).
    pub base_url: Option<String>,

    /// Embedding model or deployment name.
    pub embedding_model: String,

    /// Chat model or deployment name.
    pub chat_model: String,
}

fn build_client(settings: &AoaiSettings) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_key(&settings.api_key);
    if let Some(ref base_url) = settings.base_url {
        config = config.with_api_base(base_url);
    }
    Client::with_config(config)
}

/// Maps an `async-openai` error onto the retry classification.
fn classify(err: &OpenAIError) -> EmbeddingError {
    match err {
        OpenAIError::Reqwest(e) => EmbeddingError::Transient(e.to_string()),
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            let code = api
                .code
                .as_ref()
                .map(std::string::ToString::to_string)
                .unwrap_or_default();
            if message.contains("rate limit") || code.contains("429") || code.contains("rate_limit")
            {
                EmbeddingError::RateLimited { retry_after: None }
            } else if message.contains("unauthorized")
                || message.contains("authentication")
                || code.contains("401")
            {
                EmbeddingError::Auth(api.message.clone())
            } else {
                EmbeddingError::Malformed(api.message.clone())
            }
        }
        other => EmbeddingError::Malformed(other.to_string()),
    }
}

/// OpenAI-compatible [`EmbeddingProvider`].
pub struct AoaiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl AoaiEmbeddingProvider {
    /// Creates a provider from connection settings.
    #[must_use]
    pub fn new(settings: &AoaiSettings) -> Self {
        Self {
            client: build_client(settings),
            model: settings.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for AoaiEmbeddingProvider {
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = CreateEmbeddingRequest {
            model: self.model.clone(),
            input: EmbeddingInput::String(text.to_string()),
            ..Default::default()
        };
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| classify(&e))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".to_string()))
    }

    fn name(&self) -> &'static str {
        "aoai-embeddings"
    }
}

impl std::fmt::Debug for AoaiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AoaiEmbeddingProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// OpenAI-compatible [`ChatProvider`] for captions and summaries.
pub struct AoaiChatProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl AoaiChatProvider {
    /// Creates a provider from connection settings.
    #[must_use]
    pub fn new(settings: &AoaiSettings) -> Self {
        Self {
            client: build_client(settings),
            model: settings.chat_model.clone(),
        }
    }

    fn user_message(prompt: &str, image_base64: Option<&str>) -> ChatCompletionRequestMessage {
        let content = match image_base64 {
            None => ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            Some(image) => ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText {
                        text: prompt.to_string(),
                    },
                ),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{image}"),
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                ),
            ]),
        };
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content,
            name: None,
        })
    }
}

#[async_trait]
impl ChatProvider for AoaiChatProvider {
    async fn complete_once(
        &self,
        prompt: &str,
        image_base64: Option<&str>,
        max_tokens: u32,
    ) -> Result<String, EmbeddingError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                    "You are a helpful assistant.".to_string(),
                ),
                name: None,
            }),
            Self::user_message(prompt, image_base64),
        ];

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_completion_tokens: Some(max_tokens),
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify(&e))?;
        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "aoai-chat"
    }
}

impl std::fmt::Debug for AoaiChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AoaiChatProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "Rate limit reached for requests".to_string(),
            r#type: Some("requests".to_string()),
            param: None,
            code: None,
        });
        assert!(matches!(classify(&err), EmbeddingError::RateLimited { .. }));
    }

    #[test]
    fn test_classify_auth() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "Incorrect API key provided (authentication)".to_string(),
            r#type: None,
            param: None,
            code: None,
        });
        assert!(matches!(classify(&err), EmbeddingError::Auth(_)));
    }

    #[test]
    fn test_classify_other_is_malformed() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "model not found".to_string(),
            r#type: None,
            param: None,
            code: None,
        });
        assert!(matches!(classify(&err), EmbeddingError::Malformed(_)));
    }

    #[test]
    fn test_user_message_with_image_is_multipart() {
        let msg = AoaiChatProvider::user_message("describe", Some("QUJD"));
        if let ChatCompletionRequestMessage::User(user) = msg {
            assert!(matches!(
                user.content,
                ChatCompletionRequestUserMessageContent::Array(_)
            ));
        } else {
            unreachable!("expected user message");
        }
    }
}
