//! Stable, index-safe keying for documents and chunks.
//!
//! Every upstream document is projected into a URL-path-style `parent_id`
//! (`/<segment>/<segment>/...`). Index record keys are derived from it by
//! sanitization plus a zero-padded chunk ordinal, so that all chunks of one
//! document share a stable prefix and two distinct documents can never
//! collide.
//!
//! All functions here are pure and deterministic; nothing performs I/O.

use sha1::{Digest, Sha1};

/// Maximum sanitized base length before hash disambiguation kicks in.
const MAX_KEY_BASE_LEN: usize = 128;

/// Length the base is cut to when over [`MAX_KEY_BASE_LEN`].
const TRUNCATED_BASE_LEN: usize = 100;

/// Hex characters of the SHA-1 digest appended after truncation.
const DIGEST_LEN: usize = 10;

/// Sanitizes a string for use in a search index key.
///
/// Any run of characters outside `[A-Za-z0-9_-]` becomes a single `-`;
/// repeats are collapsed and leading/trailing `-` trimmed. An empty result
/// falls back to `"doc"`. Inputs whose sanitized form exceeds 128 characters
/// are truncated to 100 and disambiguated with the first 10 hex characters
/// of the SHA-1 of the original string.
#[must_use]
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_dash = false;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
            last_dash = ch == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    let base = if trimmed.is_empty() { "doc" } else { trimmed };

    if base.len() > MAX_KEY_BASE_LEN {
        let digest = short_digest(s);
        format!("{}-{digest}", &base[..TRUNCATED_BASE_LEN])
    } else {
        base.to_string()
    }
}

/// Joins path segments into a `parent_id` with URL path semantics.
///
/// Each segment is stripped of leading/trailing slashes; the result carries
/// a leading slash and no trailing slash. Empty segments are dropped.
///
/// # Examples
///
/// ```
/// use ragsync_rs::keys::parent_key;
///
/// assert_eq!(parent_key(&["documents", "a.pdf"]), "/documents/a.pdf");
/// assert_eq!(parent_key(&["/documents/", "sub/dir/a.pdf"]), "/documents/sub/dir/a.pdf");
/// ```
#[must_use]
pub fn parent_key(segments: &[&str]) -> String {
    let mut out = String::new();
    for seg in segments {
        let trimmed = seg.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    if out.is_empty() { "/".to_string() } else { out }
}

/// Builds the index key for chunk `n` of a document.
///
/// Format: `sanitize(parent_id without leading slash) + "-c" + pad5(n)`.
///
/// # Examples
///
/// ```
/// use ragsync_rs::keys::chunk_key;
///
/// assert_eq!(chunk_key("/documents/a.pdf", 0), "documents-a-pdf-c00000");
/// ```
#[must_use]
pub fn chunk_key(parent_id: &str, n: u32) -> String {
    format!("{}-c{}", key_base(parent_id), pad5(n))
}

/// Builds the wildcard prefix matching every chunk key of a document.
///
/// Example: `/documents/employee_handbook.pdf` ->
/// `documents-employee_handbook-pdf-c*`.
#[must_use]
pub fn chunk_key_prefix(parent_id: &str) -> String {
    format!("{}-c*", key_base(parent_id))
}

/// Formats a chunk ordinal as base-10 with leading zeros to width 5.
#[must_use]
pub fn pad5(n: u32) -> String {
    format!("{n:05}")
}

/// Sanitized key base shared by [`chunk_key`] and [`chunk_key_prefix`].
fn key_base(parent_id: &str) -> String {
    sanitize(parent_id.trim_start_matches('/'))
}

/// First [`DIGEST_LEN`] hex characters of SHA-1 over the original string.
fn short_digest(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(DIGEST_LEN);
    for byte in digest.iter().take(DIGEST_LEN.div_ceil(2)) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(DIGEST_LEN);
    hex
}
