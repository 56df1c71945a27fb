use crate::record::{CleanFlightRecord, RawFlightRecord};

/// The source's "no data" marker.
pub const PLACEHOLDER: &str = "-";

/// Drop absent and placeholder fields from every record. Order is kept and
/// records that end up empty are kept too.
pub fn normalize(records: Vec<RawFlightRecord>) -> Vec<CleanFlightRecord> {
    records.into_iter().map(CleanFlightRecord::from).collect()
}

fn keep(value: Option<String>) -> Option<String> {
    value.filter(|v| v != PLACEHOLDER)
}

impl From<RawFlightRecord> for CleanFlightRecord {
    fn from(r: RawFlightRecord) -> Self {
        CleanFlightRecord {
            time: keep(r.time),
            destination: keep(r.destination),
            flight_number: keep(r.flight_number),
            carrier: keep(r.carrier),
            status: keep(r.status),
            remarks: keep(r.remarks),
        }
    }
}
