//! Chunk representation for the ingestion pipeline.
//!
//! Chunks are engine-produced fragments of an upstream document. Each chunk
//! carries its position, display metadata, figure attachments, and the texts
//! that drive embedding. Vectors are attached later by the indexer engine so
//! chunkers stay free of provider calls for content embeddings.

use serde::{Deserialize, Serialize};

/// An engine-produced fragment of a document.
///
/// `chunk_id` is dense per document starting at 0; chunk 0 is the body chunk
/// of list items and the first content chunk of files, and its record is the
/// authoritative freshness marker in the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense ordinal within the parent document, starting at 0.
    pub chunk_id: u32,

    /// Chunk text; may contain restored HTML tables, markdown, or figure
    /// placeholders.
    pub content: String,

    /// Text to embed instead of `content` (summaries, row schemas). When
    /// `None`, `content` is embedded.
    pub embedding_text: Option<String>,

    /// Optional summary attached to the chunk.
    pub summary: String,

    /// Display title.
    pub title: String,

    /// Category label (reserved; empty by default).
    pub category: String,

    /// File path or name the chunk came from.
    pub filepath: String,

    /// Source URL of the document.
    pub url: String,

    /// Page the chunk belongs to (best-effort for non-paginated sources).
    pub page: u32,

    /// Character offset within the source content (best-effort).
    pub offset: u32,

    /// Content length in characters.
    pub length: u32,

    /// Ordered image locations attached by the multimodal chunker.
    pub related_images: Vec<String>,

    /// Ordered related file locations.
    pub related_files: Vec<String>,

    /// Combined caption text for figures belonging to this chunk.
    pub image_captions: String,

    /// Dense embedding of `embedding_text` (or `content`); filled by the
    /// engine. Empty when the embedded text is empty.
    pub content_vector: Vec<f32>,

    /// Embedding of the combined figure captions; multimodal chunks only.
    pub caption_vector: Option<Vec<f32>>,
}

impl Chunk {
    /// Returns the text the engine should embed for this chunk.
    #[must_use]
    pub fn text_to_embed(&self) -> &str {
        match &self.embedding_text {
            Some(text) if !text.is_empty() => text,
            _ => &self.content,
        }
    }

    /// Checks whether the chunk carries no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Builder used by chunkers to assemble chunks with consistent defaults.
///
/// `length` defaults to the content's character count and `filepath`/`url`
/// default to the values captured from the chunker input.
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    chunk_id: u32,
    content: String,
    embedding_text: Option<String>,
    summary: String,
    title: String,
    filepath: String,
    url: String,
    page: u32,
    offset: u32,
    related_images: Vec<String>,
    related_files: Vec<String>,
}

impl ChunkBuilder {
    /// Creates a builder for the given chunk ordinal and content.
    #[must_use]
    pub fn new(chunk_id: u32, content: impl Into<String>) -> Self {
        Self {
            chunk_id,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the embedding text (used instead of content).
    #[must_use]
    pub fn embedding_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.embedding_text = Some(text);
        }
        self
    }

    /// Sets the summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the file path.
    #[must_use]
    pub fn filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = filepath.into();
        self
    }

    /// Sets the source URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the page number.
    #[must_use]
    pub const fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Sets the character offset.
    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Sets related images.
    #[must_use]
    pub fn related_images(mut self, images: Vec<String>) -> Self {
        self.related_images = images;
        self
    }

    /// Sets related files.
    #[must_use]
    pub fn related_files(mut self, files: Vec<String>) -> Self {
        self.related_files = files;
        self
    }

    /// Builds the chunk.
    #[must_use]
    pub fn build(self) -> Chunk {
        #[allow(clippy::cast_possible_truncation)]
        let length = self.content.chars().count() as u32;
        Chunk {
            chunk_id: self.chunk_id,
            content: self.content,
            embedding_text: self.embedding_text,
            summary: self.summary,
            title: self.title,
            category: String::new(),
            filepath: self.filepath,
            url: self.url,
            page: self.page,
            offset: self.offset,
            length,
            related_images: self.related_images,
            related_files: self.related_files,
            image_captions: String::new(),
            content_vector: Vec::new(),
            caption_vector: None,
        }
    }
}

/// Derives a display title from a filename.
///
/// Strips the extension, replaces `_`/`-` with spaces, breaks camel-case
/// words apart, and capitalizes each word.
#[must_use]
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);
    let spaced = stem.replace(['_', '-'], " ");

    // Split camelCase boundaries: lowercase/digit followed by uppercase.
    let mut broken = String::with_capacity(spaced.len() + 8);
    let mut prev: Option<char> = None;
    for ch in spaced.chars() {
        if let Some(p) = prev
            && (p.is_lowercase() || p.is_ascii_digit())
            && ch.is_uppercase()
        {
            broken.push(' ');
        }
        broken.push(ch);
        prev = Some(ch);
    }

    broken
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
