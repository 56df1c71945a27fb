use scraper::{ElementRef, Selector};

use super::selector;
use crate::error::ParseError;
use crate::record::RawFlightRecord;

/// Rows with fewer data cells are layout noise (headers, separators, banners).
pub const MIN_CELLS: usize = 5;

/// Where each departure field lives inside a schedule row.
///
/// The source lays the table out positionally, so any markup change on their
/// side lands here and nowhere else.
pub struct DepartureColumns {
    cell: Selector,
    time_header: Selector,
    image: Selector,
}

impl DepartureColumns {
    const DESTINATION: usize = 0;
    const FLIGHT_NUMBER: usize = 1;
    const CARRIER: usize = 2;
    const STATUS: usize = 3;
    const REMARKS: usize = 4;

    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            cell: selector("td")?,
            time_header: selector(r#"th[data-label="Czas"]"#)?,
            image: selector("img")?,
        })
    }

    /// Read one row, or `None` when it does not carry enough cells.
    pub fn apply(&self, row: ElementRef<'_>) -> Option<RawFlightRecord> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        if cells.len() < MIN_CELLS {
            return None;
        }

        let carrier = cells[Self::CARRIER]
            .select(&self.image)
            .next()
            .and_then(|img| img.value().attr("title"))
            .map(str::to_string);

        Some(RawFlightRecord {
            time: row.select(&self.time_header).next().map(trimmed_text),
            destination: Some(trimmed_text(cells[Self::DESTINATION])),
            flight_number: Some(trimmed_text(cells[Self::FLIGHT_NUMBER])),
            carrier,
            status: Some(trimmed_text(cells[Self::STATUS])),
            remarks: Some(trimmed_text(cells[Self::REMARKS])),
        })
    }
}

fn trimmed_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
