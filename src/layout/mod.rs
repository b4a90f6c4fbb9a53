//! Document layout analysis contract.
//!
//! The doc-analysis and multimodal chunkers consume an external layout
//! service through [`LayoutAnalyzer`]: ordered content, paragraphs, tables
//! with cell grid positions, pages, and detected figures with bounding
//! regions. Only the contract lives here; deployments supply the provider
//! adapter, tests use a scripted analyzer.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Output text format of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// Markdown with `<!-- PageBreak -->` markers and HTML tables.
    Markdown,
    /// Plain extracted text.
    Text,
}

/// One analyzed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub page_number: u32,
    /// Page width in the analyzer's unit (inches for print formats).
    pub width: f64,
    /// Page height in the analyzer's unit.
    pub height: f64,
}

/// Region of a page covered by an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    /// Page the region is on.
    pub page_number: u32,
    /// Flat polygon coordinates `[x1, y1, x2, y2, ...]`.
    pub polygon: Vec<f64>,
}

/// One analyzed paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Paragraph text.
    pub content: String,
    /// Character offset within the document content.
    pub offset: usize,
    /// Regions the paragraph covers.
    pub bounding_regions: Vec<BoundingRegion>,
}

/// One table cell with its grid position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    /// 0-based row index.
    pub row_index: u32,
    /// 0-based column index.
    pub column_index: u32,
    /// Rows spanned (1 when not merged).
    pub row_span: u32,
    /// Columns spanned (1 when not merged).
    pub column_span: u32,
    /// Cell text.
    pub content: String,
    /// Whether the cell is a column header.
    pub is_header: bool,
}

/// One analyzed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Number of rows.
    pub row_count: u32,
    /// Number of columns.
    pub column_count: u32,
    /// Cells in reading order.
    pub cells: Vec<TableCell>,
    /// Regions the table covers.
    pub bounding_regions: Vec<BoundingRegion>,
}

/// One detected figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// Analyzer-assigned figure identifier (e.g. `"1.2"`).
    pub id: String,
    /// Regions the figure covers.
    pub bounding_regions: Vec<BoundingRegion>,
}

/// Full result of one layout analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResult {
    /// Ordered document content.
    pub content: String,
    /// Content format.
    pub content_format: ContentFormat,
    /// Ordered paragraphs.
    pub paragraphs: Vec<Paragraph>,
    /// Ordered tables.
    pub tables: Vec<Table>,
    /// Pages.
    pub pages: Vec<Page>,
    /// Detected figures, in document order.
    pub figures: Vec<Figure>,
}

/// Asynchronous layout analysis service contract.
#[async_trait]
pub trait LayoutAnalyzer: Send + Sync {
    /// Analyzes a document and returns its structure.
    async fn analyze(&self, bytes: &Bytes, content_type: &str) -> Result<AnalyzeResult>;

    /// Fetches the cropped image of a figure from a prior analysis.
    async fn figure_image(&self, figure_id: &str) -> Result<Bytes>;

    /// Extensions this analyzer accepts.
    fn supported_extensions(&self) -> &[&'static str];
}

/// Analyzer used when no layout service is configured.
///
/// Rejects every document; the factory's text/JSON/spreadsheet chunkers
/// remain fully usable without a layout deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedAnalyzer;

#[async_trait]
impl LayoutAnalyzer for UnsupportedAnalyzer {
    async fn analyze(&self, _bytes: &Bytes, _content_type: &str) -> Result<AnalyzeResult> {
        Err(crate::error::ChunkingError::AnalysisFailed(
            "no layout analyzer configured".to_string(),
        )
        .into())
    }

    async fn figure_image(&self, _figure_id: &str) -> Result<Bytes> {
        Err(crate::error::ChunkingError::AnalysisFailed(
            "no layout analyzer configured".to_string(),
        )
        .into())
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &[]
    }
}

/// Area of a flat polygon `[x1, y1, ...]` via the shoelace formula.
///
/// Returns 0.0 for degenerate polygons (fewer than 3 points).
#[must_use]
pub fn polygon_area(polygon: &[f64]) -> f64 {
    if polygon.len() < 6 {
        return 0.0;
    }
    let points = polygon.len() / 2;
    let mut area = 0.0;
    for i in 0..points {
        let x1 = polygon[2 * i];
        let y1 = polygon[2 * i + 1];
        let x2 = polygon[2 * ((i + 1) % points)];
        let y2 = polygon[2 * ((i + 1) % points) + 1];
        area += x1.mul_add(y2, -(x2 * y1));
    }
    (area / 2.0).abs()
}

/// Percentage of page area a figure covers.
///
/// Sums the figure's polygon areas and divides by the summed area of the
/// pages those regions sit on, normalized explicitly so "percent" means
/// percent regardless of page size.
#[must_use]
pub fn figure_area_percentage(figure: &Figure, pages: &[Page]) -> f64 {
    let mut figure_area = 0.0;
    let mut page_area = 0.0;
    for region in &figure.bounding_regions {
        let Some(page) = pages.iter().find(|p| p.page_number == region.page_number) else {
            continue;
        };
        let area = polygon_area(&region.polygon);
        if area <= 0.0 {
            continue;
        }
        figure_area += area;
        page_area += page.width * page.height;
    }
    if page_area <= 0.0 {
        return 0.0;
    }
    figure_area / page_area * 100.0
}
