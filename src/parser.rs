//! Parser for DX cluster spot lines.
//!
//! This module uses the `nom` parsing library to recognise spots in the
//! free-form text a DX cluster streams to its users. Anything that is not a
//! spot (banners, prompts, talk messages) comes back as a [`ParseError`]
//! describing why it was not one; callers treat that as "not this grammar",
//! never as a failure.
//!
//! # Spot Format
//!
//! ```text
//! DX de SPOTTER:  FREQ  CALLSIGN  [COMMENT ...]  HHMMZ
//! ```
//!
//! Example:
//! ```text
//! DX de OH0M:      21044.0  K5OHY        WWFF KFF-2989                  1830Z
//! ```

use std::borrow::Cow;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use nom::{
    IResult, Parser,
    bytes::complete::{tag_no_case, take_while_m_n, take_while1},
    character::complete::{char, digit0, digit1, multispace1},
    combinator::{map_res, opt, recognize, value},
    sequence::terminated,
};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::spot::Spot;

/// Reasons a line did not match a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty line")]
    Empty,

    #[error("Line does not start with {0:?}")]
    WrongPrefix(&'static str),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid frequency: {0}")]
    InvalidFrequency(String),

    #[error("Missing time group")]
    MissingTime,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Remove ASCII control characters except tab, CR and LF.
///
/// Some clusters ring the terminal bell after every spot.
pub fn strip_control_chars(input: &str) -> Cow<'_, str> {
    let is_noise = |c: char| c.is_ascii_control() && !matches!(c, '\t' | '\r' | '\n');
    if input.contains(is_noise) {
        Cow::Owned(input.chars().filter(|&c| !is_noise(c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

/// ASCII case-insensitive `starts_with`.
pub(crate) fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Valid callsign characters are alphanumeric plus `/` for portable designators.
fn is_callsign_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '/'
}

/// Parse the "DX de " prefix, allowing one or two spaces after `DX`.
fn parse_dx_de_prefix(input: &str) -> IResult<&str, ()> {
    value(
        (),
        (
            tag_no_case("DX"),
            take_while_m_n(1, 2, |c| c == ' '),
            tag_no_case("de"),
            multispace1,
        ),
    )
    .parse(input)
}

fn parse_callsign(input: &str) -> IResult<&str, &str> {
    take_while1(is_callsign_char).parse(input)
}

/// Parse the spotter callsign, which is glued to its colon.
fn parse_spotter(input: &str) -> IResult<&str, &str> {
    terminated(parse_callsign, char(':')).parse(input)
}

/// Parse a frequency in kHz as an exact decimal.
fn parse_frequency(input: &str) -> IResult<&str, Decimal> {
    map_res(recognize((digit1, opt((char('.'), digit0)))), |s: &str| {
        s.trim_end_matches('.').parse::<Decimal>()
    })
    .parse(input)
}

/// Parse everything up to and including the DX callsign.
fn parse_spot_header(input: &str) -> IResult<&str, (&str, Decimal, &str)> {
    let (input, _) = parse_dx_de_prefix(input)?;
    let (input, spotter) = parse_spotter(input)?;
    let (input, _) = multispace1(input)?;
    let (input, frequency) = parse_frequency(input)?;
    let (input, _) = multispace1(input)?;
    let (input, dx_callsign) = parse_callsign(input)?;
    Ok((input, (spotter, frequency, dx_callsign)))
}

/// Split the tail of a spot into `(comment, HHMM)`.
///
/// The time group is the last token: exactly four digits, optionally followed
/// by `Z`, and separated from whatever precedes it by whitespace.
fn split_time_group(tail: &str) -> Option<(&str, &str)> {
    let body = tail.trim_end();
    let body = body.strip_suffix(['Z', 'z']).unwrap_or(body);
    let split = body.len().checked_sub(4)?;
    if !body.is_char_boundary(split) {
        return None;
    }

    let (head, hhmm) = body.split_at(split);
    if !hhmm.bytes().all(|b| b.is_ascii_digit()) || !head.ends_with(char::is_whitespace) {
        return None;
    }

    Some((head.trim(), hhmm))
}

/// Turn an `HHMM` group into a full UTC timestamp.
///
/// Out-of-range hours and minutes are clamped rather than rejected. The date
/// is taken from `now`; a result more than an hour ahead of `now` is assumed
/// to belong to yesterday, which happens for spots posted just before UTC
/// midnight and received just after it.
pub fn resolve_spot_time(hour: u32, minute: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or_default();
    let spot_time = now.date_naive().and_time(time).and_utc();

    if spot_time > now + TimeDelta::hours(1) {
        spot_time - TimeDelta::days(1)
    } else {
        spot_time
    }
}

/// Parse a spot line, stamping it as received now.
///
/// # Example
///
/// ```
/// use dxcluster_mqtt::parser::parse_spot;
///
/// let line = "DX de K4VTE:     21142.3  VE6KIX                                      1829Z";
/// let spot = parse_spot(line).unwrap();
/// assert_eq!(spot.spotter, "K4VTE");
/// assert_eq!(spot.dx_callsign, "VE6KIX");
/// assert!(spot.comment.is_none());
/// ```
pub fn parse_spot(line: &str) -> ParseResult<Spot> {
    parse_spot_at(line, Utc::now())
}

/// Parse a spot line against an explicit "now".
pub fn parse_spot_at(line: &str, now: DateTime<Utc>) -> ParseResult<Spot> {
    let cleaned = strip_control_chars(line);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    if !looks_like_spot(trimmed) {
        return Err(ParseError::WrongPrefix("DX de "));
    }

    let (tail, (spotter, frequency_khz, dx_callsign)) =
        parse_spot_header(trimmed).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    if frequency_khz <= Decimal::ZERO {
        return Err(ParseError::InvalidFrequency(frequency_khz.to_string()));
    }

    let (comment, hhmm) = split_time_group(tail).ok_or(ParseError::MissingTime)?;
    let hour: u32 = hhmm[0..2].parse().map_err(|_| ParseError::MissingTime)?;
    let minute: u32 = hhmm[2..4].parse().map_err(|_| ParseError::MissingTime)?;

    Ok(Spot {
        spotter: spotter.to_ascii_uppercase(),
        frequency_khz,
        dx_callsign: dx_callsign.to_ascii_uppercase(),
        comment: (!comment.is_empty()).then(|| comment.to_string()),
        time: resolve_spot_time(hour, minute, now),
        received_at: now,
    })
}

/// Check if a line looks like a spot (quick pre-filter).
#[inline]
pub fn looks_like_spot(line: &str) -> bool {
    let trimmed = line.trim_start();
    starts_with_ignore_case(trimmed, "DX de ") || starts_with_ignore_case(trimmed, "DX  de ")
}
