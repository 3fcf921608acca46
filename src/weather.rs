//! Solar and geomagnetic reports broadcast by WCY beacons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed WCY space-weather report.
///
/// Every index is optional: a beacon that skips a field this cycle simply
/// produces `None` for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    /// Reporting station, e.g. `DK0WCY-2`.
    pub source: String,

    /// UTC hour the report refers to (0-23).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,

    /// Planetary K-index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k_index: Option<u32>,

    /// Expected K-index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_k_index: Option<u32>,

    /// A-index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_index: Option<u32>,

    /// R value (sunspot number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,

    /// 10.7 cm solar flux index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sfi: Option<u32>,

    /// Solar activity code (`qui`, `eru`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solar_activity: Option<String>,

    /// Geomagnetic field code (`qui`, `act`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geomagnetic_field: Option<String>,

    /// Aurora indicator (`no`, `yes`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aurora: Option<String>,

    /// When this service received the line.
    pub received_at: DateTime<Utc>,

    /// The line exactly as it arrived, for diagnostics.
    pub raw_line: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_are_omitted() {
        let report = WeatherReport {
            source: "DK0WCY-2".to_string(),
            hour: Some(12),
            k_index: Some(3),
            expected_k_index: None,
            a_index: None,
            r: None,
            sfi: Some(150),
            solar_activity: None,
            geomagnetic_field: None,
            aurora: None,
            received_at: Utc::now(),
            raw_line: "WCY de DK0WCY-2 <12> : K=3 SFI=150".to_string(),
        };

        let json = serde_json::to_value(&report).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(json["kIndex"], 3);
        assert_eq!(json["sfi"], 150);
        assert_eq!(json["hour"], 12);
        assert!(!object.contains_key("expectedKIndex"));
        assert!(!object.contains_key("aIndex"));
        assert!(!object.contains_key("aurora"));
        assert!(object.contains_key("rawLine"));
    }
}
