//! Recursive token-budgeted text splitting.
//!
//! A separator-priority splitter in the style of the classic recursive
//! character splitters: try the highest-priority separator present, recurse
//! into oversized pieces with lower-priority separators, then greedily merge
//! adjacent pieces up to the token budget with a token-bounded overlap
//! carried between consecutive chunks.

use unicode_segmentation::UnicodeSegmentation;

use crate::tokens::TokenEstimator;

/// Sentence-then-word separators for prose.
const PROSE_SEPARATORS: &[&str] = &[". ", "! ", "? ", "\n", "\t", " "];

/// Markdown structural separators, headers first.
const MARKDOWN_SEPARATORS: &[&str] = &[
    "\n# ", "\n## ", "\n### ", "\n#### ", "\n##### ", "\n\n", "\n", ". ", " ",
];

/// Python structural separators.
const PYTHON_SEPARATORS: &[&str] = &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " "];

/// Separator-priority splitter producing token-bounded chunks.
#[derive(Debug, Clone)]
pub struct RecursiveTokenSplitter {
    separators: &'static [&'static str],
    chunk_size: usize,
    overlap: usize,
    estimator: TokenEstimator,
}

impl RecursiveTokenSplitter {
    /// Creates a prose splitter (sentence endings, then whitespace).
    #[must_use]
    pub const fn prose(estimator: TokenEstimator, chunk_size: usize, overlap: usize) -> Self {
        Self {
            separators: PROSE_SEPARATORS,
            chunk_size,
            overlap,
            estimator,
        }
    }

    /// Creates a markdown splitter (headers, then paragraphs, then prose).
    #[must_use]
    pub const fn markdown(estimator: TokenEstimator, chunk_size: usize, overlap: usize) -> Self {
        Self {
            separators: MARKDOWN_SEPARATORS,
            chunk_size,
            overlap,
            estimator,
        }
    }

    /// Creates a Python code splitter (class/def boundaries first).
    #[must_use]
    pub const fn python(estimator: TokenEstimator, chunk_size: usize, overlap: usize) -> Self {
        Self {
            separators: PYTHON_SEPARATORS,
            chunk_size,
            overlap,
            estimator,
        }
    }

    /// Splits `text` into chunks of at most `chunk_size` tokens.
    ///
    /// Consecutive chunks share up to `overlap` tokens of trailing context.
    /// Empty input yields no chunks.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.estimator.estimate(text) <= self.chunk_size {
            return vec![text.to_string()];
        }
        let pieces = self.decompose(text, self.separators);
        self.merge(pieces)
    }

    /// Recursively splits until every piece fits the budget.
    fn decompose(&self, text: &str, separators: &'static [&'static str]) -> Vec<String> {
        if self.estimator.estimate(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let Some((idx, sep)) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| text.contains(*sep))
        else {
            return self.hard_split(text);
        };
        let remaining = &separators[idx + 1..];

        let mut out = Vec::new();
        for piece in split_inclusive_str(text, sep) {
            if self.estimator.estimate(&piece) > self.chunk_size {
                out.extend(self.decompose(&piece, remaining));
            } else {
                out.push(piece);
            }
        }
        out
    }

    /// Grapheme-boundary fallback when no separator can reduce a piece.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let graphemes: Vec<&str> = text.graphemes(true).collect();
        // Conservative window: ~4 chars per token keeps each probe cheap.
        let window = (self.chunk_size * 4).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < graphemes.len() {
            let end = (start + window).min(graphemes.len());
            let candidate: String = graphemes[start..end].concat();
            let fitted = self.estimator.truncate_to_tokens(&candidate, self.chunk_size);
            let taken = fitted.graphemes(true).count().max(1);
            out.push(fitted);
            start += taken;
        }
        out
    }

    /// Greedy merge with trailing-overlap carry-over.
    fn merge(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for piece in pieces {
            let piece_tokens = self.estimator.estimate(&piece);
            if current_tokens + piece_tokens > self.chunk_size && !current.is_empty() {
                chunks.push(current.concat());

                // Carry trailing pieces into the next chunk as overlap.
                let mut tail: Vec<String> = Vec::new();
                let mut tail_tokens = 0usize;
                for prev in current.iter().rev() {
                    let t = self.estimator.estimate(prev);
                    if tail_tokens + t > self.overlap {
                        break;
                    }
                    tail_tokens += t;
                    tail.push(prev.clone());
                }
                tail.reverse();
                current = tail;
                current_tokens = tail_tokens;
            }
            current_tokens += piece_tokens;
            current.push(piece);
        }

        if !current.is_empty() {
            let last = current.concat();
            if !last.trim().is_empty() {
                chunks.push(last);
            }
        }
        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }
}

/// Splits keeping the separator attached to the preceding piece.
fn split_inclusive_str(text: &str, sep: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(sep) {
        let end = pos + sep.len();
        out.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}
