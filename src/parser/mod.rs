pub mod columns;
pub mod normalize;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ParseError;
use crate::fetch::RawPage;
use crate::record::RawFlightRecord;
use columns::DepartureColumns;

/// Row class the source puts on sponsored rows inside the schedule table.
const AD_CLASS: &str = "ad";

/// Turn a fetched page into one raw record per qualifying table row.
pub fn extract(page: RawPage) -> Result<Vec<RawFlightRecord>, ParseError> {
    extract_rows(&page.body)
}

/// Row extraction over plain markup. Broken rows are skipped, never fatal;
/// only a body with no markup at all is an error.
pub fn extract_rows(markup: &str) -> Result<Vec<RawFlightRecord>, ParseError> {
    let trimmed = markup.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyPage);
    }
    if !trimmed.contains('<') {
        return Err(ParseError::NotMarkup);
    }

    let columns = DepartureColumns::new()?;
    let rows = selector("tr")?;
    let document = Html::parse_document(markup);

    let mut records = Vec::new();
    let mut ads = 0usize;
    let mut short = 0usize;

    for row in document.select(&rows) {
        if is_ad(&row) {
            ads += 1;
            continue;
        }
        match columns.apply(row) {
            Some(record) => records.push(record),
            None => short += 1,
        }
    }

    debug!(records = records.len(), ads, short, "Extracted schedule rows");
    Ok(records)
}

fn is_ad(row: &ElementRef<'_>) -> bool {
    row.value().classes().any(|class| class == AD_CLASS)
}

pub(crate) fn selector(css: &'static str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector {
        selector: css,
        reason: e.to_string(),
    })
}

// ── Tests ──
