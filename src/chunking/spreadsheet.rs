//! Spreadsheet chunker for `.xlsx`/`.xls` workbooks.
//!
//! Two modes, chosen at construction:
//!
//! - **Per-sheet** (default): each sheet renders as one markdown table with
//!   a chat-generated summary; when the table exceeds the token budget the
//!   summary becomes the chunk body. The summary is always the embedding
//!   text when present.
//! - **Per-row**: one chunk per non-empty data row. The embedding text is a
//!   compact positional schema (`file=...`, `sheet=...`, `row=N`,
//!   `cols=h1|h2|...`, `vals=v1|v2|...`) to keep token pressure low while
//!   preserving column alignment.

use std::io::Cursor;

use async_trait::async_trait;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use tracing::{debug, info};

use crate::core::{Chunk, ChunkBuilder};
use crate::embedding::ChatClient;
use crate::error::{ChunkingError, Result};
use crate::tokens::TokenEstimator;

use super::tables::{clean_markdown_table, markdown_table};
use super::traits::{Chunker, ChunkerInput, ChunkerParams};

/// Prompt for the per-sheet summary.
const SHEET_SUMMARY_PROMPT: &str = "Summarize the table with data in it, by understanding \
                                    the information clearly.\n table_data:";

/// Max completion tokens for sheet summaries.
const SUMMARY_MAX_TOKENS: u32 = 2048;

/// Mode and header options for spreadsheet chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadsheetOptions {
    /// One chunk per row instead of per sheet
    /// (`SPREADSHEET_CHUNKING_BY_ROW`).
    pub by_row: bool,

    /// Include the header row in each row chunk
    /// (`SPREADSHEET_CHUNKING_BY_ROW_INCLUDE_HEADER`).
    pub include_header: bool,
}

impl Default for SpreadsheetOptions {
    fn default() -> Self {
        Self {
            by_row: false,
            include_header: false,
        }
    }
}

/// Chunker for spreadsheet workbooks.
pub struct SpreadsheetChunker {
    params: ChunkerParams,
    options: SpreadsheetOptions,
    estimator: TokenEstimator,
    chat: ChatClient,
}

struct SheetData {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SpreadsheetChunker {
    /// Creates a spreadsheet chunker.
    #[must_use]
    pub const fn new(
        params: ChunkerParams,
        options: SpreadsheetOptions,
        estimator: TokenEstimator,
        chat: ChatClient,
    ) -> Self {
        Self {
            params,
            options,
            estimator,
            chat,
        }
    }

    /// Extracts headers (first row) and non-empty data rows per sheet.
    fn extract_sheets(input: &ChunkerInput) -> Result<Vec<SheetData>> {
        let cursor = Cursor::new(input.bytes.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| {
            ChunkingError::ParseFailed {
                kind: "spreadsheet".to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let Ok(range) = workbook.worksheet_range(&name) else {
                continue;
            };
            let mut rows_iter = range.rows();
            let headers: Vec<String> = rows_iter
                .next()
                .map(|row| row.iter().map(cell_text).collect())
                .unwrap_or_default();
            let rows: Vec<Vec<String>> = rows_iter
                .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
                .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
                .collect();
            sheets.push(SheetData {
                name,
                headers,
                rows,
            });
        }
        Ok(sheets)
    }

    /// Compact per-row text for embeddings.
    fn row_embedding_text(
        &self,
        filename: &str,
        sheet: &str,
        row_index: usize,
        headers: &[String],
        row: &[String],
    ) -> String {
        fn norm(value: &str) -> String {
            value.split_whitespace().collect::<Vec<_>>().join(" ")
        }

        let mut headers: Vec<String> = headers.iter().map(|h| norm(h)).collect();
        let mut values: Vec<String> = row.iter().map(|v| norm(v)).collect();
        let width = headers.len().max(values.len());
        headers.resize(width, String::new());
        values.resize(width, String::new());

        // Drop trailing fully-empty columns but keep inner alignment.
        let last_nonempty = headers
            .iter()
            .zip(&values)
            .rposition(|(h, v)| !h.is_empty() || !v.is_empty());
        if let Some(last) = last_nonempty {
            headers.truncate(last + 1);
            values.truncate(last + 1);
        } else {
            headers.clear();
            values.clear();
        }

        let mut parts = vec![
            format!("file={}", norm(filename)),
            format!("sheet={}", norm(sheet)),
            format!("row={row_index}"),
        ];
        if self.options.include_header {
            parts.push(format!("cols={}", headers.join("|")));
        }
        parts.push(format!("vals={}", values.join("|")));
        parts.join("\n")
    }

    async fn sheet_chunks(&self, input: &ChunkerInput, sheets: Vec<SheetData>) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut chunk_id = 0u32;
        for sheet in sheets {
            let table = clean_markdown_table(&markdown_table(&sheet.headers, &sheet.rows));
            let table_tokens = self.estimator.estimate(&table);

            let summary = self
                .chat
                .complete(
                    &format!("{SHEET_SUMMARY_PROMPT}{table}"),
                    None,
                    SUMMARY_MAX_TOKENS,
                )
                .await?;

            let content = if self.params.max_chunk_size > 0
                && table_tokens > self.params.max_chunk_size
            {
                info!(
                    "[spreadsheet_chunker][{}][{}] table has {table_tokens} tokens (max {}); using summary",
                    input.filename, sheet.name, self.params.max_chunk_size
                );
                summary.clone()
            } else {
                table
            };

            chunks.push(
                ChunkBuilder::new(chunk_id, content)
                    .summary(summary.clone())
                    .embedding_text(summary)
                    .title(sheet.name.clone())
                    .filepath(input.filename.clone())
                    .url(input.url.clone())
                    .build(),
            );
            chunk_id += 1;
            debug!(
                "[spreadsheet_chunker][{}][{}] processed sheet chunk",
                input.filename, sheet.name
            );
        }
        Ok(chunks)
    }

    fn row_chunks(&self, input: &ChunkerInput, sheets: Vec<SheetData>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut chunk_id = 0u32;
        for sheet in sheets {
            for (row_index, row) in sheet.rows.iter().enumerate() {
                let row_number = row_index + 1;
                let table = if self.options.include_header {
                    markdown_table(&sheet.headers, std::slice::from_ref(row))
                } else {
                    markdown_table(row, &[])
                };
                let mut content = clean_markdown_table(&table);
                let mut embedding_text = self.row_embedding_text(
                    &input.filename,
                    &sheet.name,
                    row_number,
                    &sheet.headers,
                    row,
                );

                if self.params.max_chunk_size > 0 {
                    if self.estimator.estimate(&content) > self.params.max_chunk_size {
                        content = self
                            .estimator
                            .truncate_to_tokens(&content, self.params.max_chunk_size);
                    }
                    if self.estimator.estimate(&embedding_text) > self.params.max_chunk_size {
                        embedding_text = self
                            .estimator
                            .truncate_to_tokens(&embedding_text, self.params.max_chunk_size);
                    }
                }

                chunks.push(
                    ChunkBuilder::new(chunk_id, content)
                        .embedding_text(embedding_text)
                        .title(format!("{} - Row {row_number}", sheet.name))
                        .filepath(input.filename.clone())
                        .url(input.url.clone())
                        .build(),
                );
                chunk_id += 1;
            }
        }
        chunks
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Chunker for SpreadsheetChunker {
    async fn get_chunks(&self, input: &ChunkerInput) -> Result<Vec<Chunk>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let sheets = Self::extract_sheets(input)?;
        info!(
            "[spreadsheet_chunker][{}] workbook has {} sheet(s)",
            input.filename,
            sheets.len()
        );

        if self.options.by_row {
            Ok(self.row_chunks(input, sheets))
        } else {
            self.sheet_chunks(input, sheets).await
        }
    }

    fn name(&self) -> &'static str {
        "spreadsheet"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_row_embedding_text_format() {
        let chunker = test_chunker(SpreadsheetOptions {
            by_row: true,
            include_header: true,
        });
        let headers = vec!["Name".to_string(), "Age".to_string(), String::new()];
        let row = vec!["Ada  Lovelace".to_string(), "36".to_string()];
        let text = chunker.row_embedding_text("people.xlsx", "Sheet1", 1, &headers, &row);
        assert_eq!(
            text,
            "file=people.xlsx\nsheet=Sheet1\nrow=1\ncols=Name|Age\nvals=Ada Lovelace|36"
        );
    }

    #[test]
    fn test_row_embedding_text_without_header() {
        let chunker = test_chunker(SpreadsheetOptions {
            by_row: true,
            include_header: false,
        });
        let headers = vec!["h1".to_string()];
        let row = vec!["v1".to_string(), "v2".to_string()];
        let text = chunker.row_embedding_text("f.xlsx", "S", 3, &headers, &row);
        assert!(!text.contains("cols="));
        assert!(text.contains("vals=v1|v2"));
        assert!(text.contains("row=3"));
    }

    #[test]
    fn test_row_embedding_preserves_positional_alignment() {
        let chunker = test_chunker(SpreadsheetOptions {
            by_row: true,
            include_header: true,
        });
        let headers = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let row = vec![String::new(), "middle".to_string(), String::new()];
        let text = chunker.row_embedding_text("f.xlsx", "S", 1, &headers, &row);
        // Empty cells keep their slots so cols and vals stay aligned.
        assert!(text.contains("cols=a|b|c"));
        assert!(text.contains("vals=|middle|"));
    }

    fn test_chunker(options: SpreadsheetOptions) -> SpreadsheetChunker {
        use crate::embedding::ChatProvider;
        use crate::error::EmbeddingError;
        use std::sync::Arc;
        use tokio::sync::Semaphore;

        struct CannedChat;

        #[async_trait]
        impl ChatProvider for CannedChat {
            async fn complete_once(
                &self,
                _prompt: &str,
                _image: Option<&str>,
                _max_tokens: u32,
            ) -> std::result::Result<String, EmbeddingError> {
                Ok("sheet summary".to_string())
            }

            fn name(&self) -> &'static str {
                "canned"
            }
        }

        SpreadsheetChunker::new(
            ChunkerParams {
                max_chunk_size: 200,
                token_overlap: 0,
                min_chunk_size: 1,
            },
            options,
            TokenEstimator::new().unwrap(),
            ChatClient::new(
                Arc::new(CannedChat),
                Arc::new(Semaphore::new(2)),
                TokenEstimator::new().unwrap(),
            ),
        )
    }

    fn sheet(name: &str, headers: &[&str], rows: &[&[&str]]) -> SheetData {
        SheetData {
            name: name.to_string(),
            headers: headers.iter().map(ToString::to_string).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(ToString::to_string).collect())
                .collect(),
        }
    }

    fn sample_input() -> ChunkerInput {
        ChunkerInput::from_bytes(
            "people.xlsx",
            "https://example/people.xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            bytes::Bytes::from_static(b"unused by these tests"),
        )
    }

    #[tokio::test]
    async fn test_sheet_mode_one_chunk_per_sheet() {
        let chunker = test_chunker(SpreadsheetOptions::default());
        let sheets = vec![
            sheet("S1", &["h"], &[&["v1"], &["v2"]]),
            sheet("S2", &["h"], &[&["v3"]]),
        ];
        let chunks = chunker.sheet_chunks(&sample_input(), sheets).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].title, "S1");
        assert_eq!(chunks[0].summary, "sheet summary");
        assert_eq!(chunks[0].text_to_embed(), "sheet summary");
        assert!(chunks[0].content.contains("| v1 |"));
    }

    #[tokio::test]
    async fn test_sheet_mode_oversized_table_uses_summary() {
        let mut chunker = test_chunker(SpreadsheetOptions::default());
        chunker.params.max_chunk_size = 5;
        let sheets = vec![sheet(
            "Big",
            &["column one", "column two"],
            &[&["long cell value here", "another long cell value"]],
        )];
        let chunks = chunker.sheet_chunks(&sample_input(), sheets).await.unwrap();
        assert_eq!(chunks[0].content, "sheet summary");
    }

    #[tokio::test]
    async fn test_row_mode_one_chunk_per_row() {
        let chunker = test_chunker(SpreadsheetOptions {
            by_row: true,
            include_header: true,
        });
        let sheets = vec![sheet("S1", &["name"], &[&["ada"], &["grace"]])];
        let chunks = chunker.row_chunks(&sample_input(), sheets);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title, "S1 - Row 1");
        assert_eq!(chunks[1].title, "S1 - Row 2");
        assert!(chunks[0].content.contains("| ada |"));
        assert!(chunks[0].content.contains("| name |"));
        assert!(chunks[0].text_to_embed().starts_with("file=people.xlsx"));
    }

    #[tokio::test]
    async fn test_empty_input_no_chunks() {
        let chunker = test_chunker(SpreadsheetOptions::default());
        let input = ChunkerInput::from_bytes("e.xlsx", "u", "spreadsheet", bytes::Bytes::new());
        assert!(chunker.get_chunks(&input).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_workbook_errors() {
        let chunker = test_chunker(SpreadsheetOptions::default());
        let input = ChunkerInput::from_bytes(
            "bad.xlsx",
            "u",
            "spreadsheet",
            bytes::Bytes::from_static(b"definitely not a workbook"),
        );
        assert!(chunker.get_chunks(&input).await.is_err());
    }
}
