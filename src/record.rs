use serde::{Deserialize, Serialize};

/// One departure row as it was read from the schedule table.
///
/// Any field may be missing or hold the source's `"-"` placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFlightRecord {
    pub time: Option<String>,
    pub destination: Option<String>,
    pub flight_number: Option<String>,
    pub carrier: Option<String>,
    pub status: Option<String>,
    pub remarks: Option<String>,
}

/// A departure ready for storage: only fields carrying real data are kept.
///
/// Built exclusively through the normalizer, including when read back from
/// the store, so a present field is never `"-"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFlightRecord")]
pub struct CleanFlightRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) flight_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) carrier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) remarks: Option<String>,
}

impl CleanFlightRecord {
    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn flight_number(&self) -> Option<&str> {
        self.flight_number.as_deref()
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn remarks(&self) -> Option<&str> {
        self.remarks.as_deref()
    }

    /// True when every field was filtered out.
    pub fn is_empty(&self) -> bool {
        self.time.is_none()
            && self.destination.is_none()
            && self.flight_number.is_none()
            && self.carrier.is_none()
            && self.status.is_none()
            && self.remarks.is_none()
    }
}

impl From<CleanFlightRecord> for RawFlightRecord {
    fn from(r: CleanFlightRecord) -> Self {
        RawFlightRecord {
            time: r.time,
            destination: r.destination,
            flight_number: r.flight_number,
            carrier: r.carrier,
            status: r.status,
            remarks: r.remarks,
        }
    }
}
