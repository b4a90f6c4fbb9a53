//! Transcription chunker for WebVTT captions.
//!
//! Parses the VTT cue list, coalesces consecutive captions by speaker
//! voice, asks the chat provider for one transcript summary, then splits
//! the flattened transcript with the prose splitter. Every chunk embeds the
//! summary so retrieval sees the whole conversation's context.

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::core::{Chunk, ChunkBuilder, title_from_filename};
use crate::embedding::ChatClient;
use crate::error::Result;
use crate::tokens::TokenEstimator;

use super::splitter::RecursiveTokenSplitter;
use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Prompt for the transcript summary.
const SUMMARY_PROMPT: &str = "Provide clearly elaborated summary along with the keypoints \
                              and values mentioned for the transcript of a conversation: ";

/// Max completion tokens for the summary.
const SUMMARY_MAX_TOKENS: u32 = 800;

/// Chunker for `.vtt` transcription files.
pub struct TranscriptionChunker {
    params: ChunkerParams,
    estimator: TokenEstimator,
    chat: ChatClient,
}

impl TranscriptionChunker {
    /// Creates a transcription chunker.
    #[must_use]
    pub const fn new(params: ChunkerParams, estimator: TokenEstimator, chat: ChatClient) -> Self {
        Self {
            params,
            estimator,
            chat,
        }
    }

    /// Flattens VTT captions into speaker-labelled transcript lines.
    ///
    /// Consecutive captions by the same voice are coalesced into one line;
    /// a voice change starts a new line prefixed with the previous speaker.
    fn parse_vtt(text: &str) -> Result<String> {
        // <v Speaker>text</v> voice spans; timestamps and headers dropped.
        let voice_re = vtt_regex(r"<v\s+([^>]+)>")?;
        let tag_re = vtt_regex(r"</?v[^>]*>")?;
        let timestamp_re = vtt_regex(r"^\d{2}:\d{2}(:\d{2})?\.\d{3}\s+-->")?;

        let mut lines: Vec<String> = Vec::new();
        let mut voice = String::new();
        let mut text_acc = String::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty()
                || line == "WEBVTT"
                || line.starts_with("NOTE")
                || timestamp_re.is_match(line)
                || line.chars().all(|c| c.is_ascii_digit())
            {
                continue;
            }

            let current_voice = voice_re
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let caption = tag_re.replace_all(line, "").trim().to_string();
            if caption.is_empty() {
                continue;
            }

            if current_voice == voice || current_voice.is_empty() {
                text_acc.push_str(&caption);
                text_acc.push(' ');
            } else {
                if !text_acc.is_empty() {
                    lines.push(text_acc.replace('\n', " ").trim().to_string());
                }
                text_acc = format!("{current_voice}: {caption} ");
                voice = current_voice;
            }
        }
        if !text_acc.is_empty() {
            lines.push(text_acc.replace('\n', " ").trim().to_string());
        }
        Ok(lines.join("\n").trim().to_string())
    }
}

fn vtt_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        crate::error::ChunkingError::ParseFailed {
            kind: "vtt".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl Chunker for TranscriptionChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        self.params.validate()?;
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let raw = input.text_utf8()?;
        let transcript = Self::parse_vtt(&raw)?;
        if transcript.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "[transcription_chunker][{}] transcript size: {} chars",
            input.filename,
            transcript.len()
        );

        let summary = self
            .chat
            .complete(
                &format!("{SUMMARY_PROMPT}{transcript} "),
                None,
                SUMMARY_MAX_TOKENS,
            )
            .await?;

        let splitter = RecursiveTokenSplitter::prose(
            self.estimator.clone(),
            self.params.max_chunk_size,
            self.params.token_overlap,
        );

        let title = title_from_filename(&input.filename);
        let mut chunks = Vec::new();
        for (chunk_id, piece) in splitter.split(&transcript).into_iter().enumerate() {
            let tokens = self.estimator.estimate(&piece);
            let content = if tokens > self.params.max_chunk_size {
                warn!(
                    "[transcription_chunker][{}] truncating {tokens} token chunk",
                    input.filename
                );
                self.estimator
                    .truncate_to_tokens(&piece, self.params.max_chunk_size)
            } else {
                piece
            };
            #[allow(clippy::cast_possible_truncation)]
            chunks.push(
                ChunkBuilder::new(chunk_id as u32, content)
                    .embedding_text(summary.clone())
                    .summary(summary.clone())
                    .title(title.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .build(),
            );
        }
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "transcription"
    }
}
