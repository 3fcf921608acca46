//! Data structures representing DX cluster spots.
//!
//! A spot is built once by [`crate::parser::parse_spot`] and handed off to the
//! publisher immediately; nothing mutates it afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed spot from a DX cluster.
///
/// A raw spot like:
/// ```text
/// DX de OH0M:      21044.0  K5OHY        WWFF KFF-2989                  1830Z
/// ```
///
/// Would be parsed into a `Spot` with:
/// - `spotter`: "OH0M"
/// - `frequency_khz`: 21044.0
/// - `dx_callsign`: "K5OHY"
/// - `comment`: Some("WWFF KFF-2989")
/// - `time`: today (or yesterday, near midnight) at 18:30 UTC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    /// The callsign of the station that posted the spot, upper-case.
    pub spotter: String,

    /// The frequency in kHz, kept as the exact decimal from the feed.
    #[serde(with = "rust_decimal::serde::float")]
    pub frequency_khz: Decimal,

    /// The callsign of the station being spotted, upper-case.
    pub dx_callsign: String,

    /// Free-text comment, if the spotter left one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// UTC time of the spot at minute precision, with the date inferred.
    pub time: DateTime<Utc>,

    /// When this service received the line.
    pub received_at: DateTime<Utc>,
}

impl Spot {
    /// Returns the amateur radio band for this spot's frequency.
    ///
    /// Returns `None` if the frequency doesn't fall within a recognized band.
    pub fn band(&self) -> Option<&'static str> {
        let khz = self.frequency_khz.trunc().to_u32()?;
        match khz {
            135..=138 => Some("2200m"),
            472..=479 => Some("630m"),
            1800..=2000 => Some("160m"),
            3500..=4000 => Some("80m"),
            5330..=5410 => Some("60m"),
            7000..=7300 => Some("40m"),
            10100..=10150 => Some("30m"),
            14000..=14350 => Some("20m"),
            18068..=18168 => Some("17m"),
            21000..=21450 => Some("15m"),
            24890..=24990 => Some("12m"),
            28000..=29700 => Some("10m"),
            50000..=54000 => Some("6m"),
            70000..=70500 => Some("4m"),
            144000..=148000 => Some("2m"),
            _ => None,
        }
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DX de {}: {:>8} {} {} {}",
            self.spotter,
            self.frequency_khz,
            self.dx_callsign,
            self.comment.as_deref().unwrap_or(""),
            self.time.format("%H%MZ")
        )
    }
}
