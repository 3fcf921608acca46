//! Parser for WCY space-weather broadcasts.
//!
//! ```text
//! WCY de DK0WCY-2 <19> : K=2 expK=0 A=5 R=126 SFI=141 SA=eru GMF=qui Au=no
//! ```
//!
//! The header (source and hour) must match; each `key=value` field after the
//! colon is then looked up on its own, so a beacon that drops some fields still
//! yields a report with the rest.

use chrono::{DateTime, Utc};
use nom::{
    IResult, Parser,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map_res, rest, verify},
    sequence::delimited,
};

use crate::parser::{ParseError, ParseResult, starts_with_ignore_case};
use crate::weather::WeatherReport;

/// Parse the station id: alphanumeric with `-` for SSIDs.
fn parse_source(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-').parse(input)
}

/// Parse the `<HH>` report hour.
fn parse_hour(input: &str) -> IResult<&str, &str> {
    delimited(char('<'), digit1, char('>')).parse(input)
}

/// Parse `WCY de <source> <HH> : <fields>` into its three parts.
fn parse_wcy_header(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, _) =
        (tag_no_case("WCY"), multispace1, tag_no_case("de"), multispace1).parse(input)?;
    let (input, source) = parse_source(input)?;
    let (input, _) = multispace1(input)?;
    let (input, hour) = parse_hour(input)?;
    let (input, _) = (multispace0, char(':'), multispace0).parse(input)?;
    let (input, fields) = verify(rest, |s: &str| !s.is_empty()).parse(input)?;
    Ok((input, (source, hour, fields)))
}

/// Find the value for `key` among the space-separated `key=value` fields.
///
/// Keys compare case-insensitively and as whole tokens, so `K` never picks up
/// the value of `expK`.
fn field<'a>(fields: &'a str, key: &str) -> Option<&'a str> {
    fields.split_whitespace().find_map(|token| {
        let (name, value) = token.split_once('=')?;
        name.eq_ignore_ascii_case(key).then_some(value)
    })
}

/// Integer field: the leading digits of the value.
fn numeric_field(fields: &str, key: &str) -> Option<u32> {
    let value = field(fields, key)?;
    let parsed: IResult<&str, u32> = map_res(digit1, str::parse::<u32>).parse(value);
    parsed.ok().map(|(_, n)| n)
}

/// Text code field: the leading word characters of the value.
fn code_field(fields: &str, key: &str) -> Option<String> {
    let value = field(fields, key)?;
    let parsed: IResult<&str, &str> =
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(value);
    match parsed {
        Ok((_, code)) if !code.is_empty() => Some(code.to_string()),
        _ => None,
    }
}

/// Parse a WCY line, stamping it as received now.
///
/// # Example
///
/// ```
/// use dxcluster_mqtt::wcy::parse_weather;
///
/// let report = parse_weather("WCY de DK0WCY-2 <12> : K=3 SFI=150").unwrap();
/// assert_eq!(report.k_index, Some(3));
/// assert_eq!(report.a_index, None);
/// ```
pub fn parse_weather(line: &str) -> ParseResult<WeatherReport> {
    parse_weather_at(line, Utc::now())
}

/// Parse a WCY line against an explicit receipt time.
pub fn parse_weather_at(line: &str, received_at: DateTime<Utc>) -> ParseResult<WeatherReport> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    if !looks_like_weather(trimmed) {
        return Err(ParseError::WrongPrefix("WCY de "));
    }

    let (_, (source, hour, fields)) =
        parse_wcy_header(trimmed).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    Ok(WeatherReport {
        source: source.to_string(),
        hour: hour.parse::<u8>().ok().filter(|h| *h < 24),
        k_index: numeric_field(fields, "K"),
        expected_k_index: numeric_field(fields, "expK"),
        a_index: numeric_field(fields, "A"),
        r: numeric_field(fields, "R"),
        sfi: numeric_field(fields, "SFI"),
        solar_activity: code_field(fields, "SA"),
        geomagnetic_field: code_field(fields, "GMF"),
        aurora: code_field(fields, "Au"),
        received_at,
        raw_line: line.to_string(),
    })
}

/// Check if a line looks like a WCY report (quick pre-filter).
#[inline]
pub fn looks_like_weather(line: &str) -> bool {
    starts_with_ignore_case(line.trim_start(), "WCY de ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "WCY de DK0WCY-2 <19> : K=2 expK=0 A=5 R=126 SFI=141 SA=eru GMF=qui Au=no";

    #[test]
    fn test_parse_full_report() {
        let report = parse_weather(FULL).expect("Should parse successfully");

        assert_eq!(report.source, "DK0WCY-2");
        assert_eq!(report.hour, Some(19));
        assert_eq!(report.k_index, Some(2));
        assert_eq!(report.expected_k_index, Some(0));
        assert_eq!(report.a_index, Some(5));
        assert_eq!(report.r, Some(126));
        assert_eq!(report.sfi, Some(141));
        assert_eq!(report.solar_activity.as_deref(), Some("eru"));
        assert_eq!(report.geomagnetic_field.as_deref(), Some("qui"));
        assert_eq!(report.aurora.as_deref(), Some("no"));
        assert_eq!(report.raw_line, FULL);
    }

    #[test]
    fn test_parse_leading_zero_hour() {
        let line = "WCY de DK0WCY-2 <06> : K=1 expK=1 A=3 R=100 SFI=135 SA=qui GMF=qui Au=no";
        let report = parse_weather(line).unwrap();

        assert_eq!(report.hour, Some(6));
        assert_eq!(report.k_index, Some(1));
        assert_eq!(report.sfi, Some(135));
    }

    #[test]
    fn test_partial_report() {
        let report = parse_weather("WCY de DK0WCY-2 <12> : K=3 SFI=150").unwrap();

        assert_eq!(report.source, "DK0WCY-2");
        assert_eq!(report.hour, Some(12));
        assert_eq!(report.k_index, Some(3));
        assert_eq!(report.sfi, Some(150));
        assert_eq!(report.expected_k_index, None);
        assert_eq!(report.a_index, None);
        assert_eq!(report.r, None);
        assert_eq!(report.solar_activity, None);
        assert_eq!(report.aurora, None);
    }

    #[test]
    fn test_keys_match_whole_tokens() {
        let report = parse_weather("WCY de DK0WCY-2 <12> : expK=5 SA=act Au=yes").unwrap();

        assert_eq!(report.expected_k_index, Some(5));
        assert_eq!(report.k_index, None);
        assert_eq!(report.a_index, None);
        assert_eq!(report.solar_activity.as_deref(), Some("act"));
        assert_eq!(report.aurora.as_deref(), Some("yes"));
    }

    #[test]
    fn test_fields_are_case_insensitive() {
        let report = parse_weather("wcy DE DK0WCY-2 <01>: k=4 sfi=99 gmf=act").unwrap();

        assert_eq!(report.hour, Some(1));
        assert_eq!(report.k_index, Some(4));
        assert_eq!(report.sfi, Some(99));
        assert_eq!(report.geomagnetic_field.as_deref(), Some("act"));
    }

    #[test]
    fn test_malformed_values_are_absent() {
        let report = parse_weather("WCY de DK0WCY-2 <12> : K=? A= SFI=12x SA=").unwrap();

        assert_eq!(report.k_index, None);
        assert_eq!(report.a_index, None);
        assert_eq!(report.sfi, Some(12));
        assert_eq!(report.solar_activity, None);
    }

    #[test]
    fn test_out_of_range_hour_is_absent() {
        let report = parse_weather("WCY de DK0WCY-2 <99> : K=3").unwrap();
        assert_eq!(report.hour, None);
        assert_eq!(report.k_index, Some(3));
    }

    #[test]
    fn test_raw_line_is_verbatim() {
        let line = format!("  {FULL}\r");
        let report = parse_weather(&line).unwrap();
        assert_eq!(report.raw_line, line);
    }

    #[test]
    fn test_non_weather_lines() {
        let lines = [
            "",
            "   ",
            "login: m0lte",
            "Hello Tom, this is G4BFG-9 in Warminster, Wiltshire",
            "DX de K4VTE:     21142.3  VE6KIX                                      1829Z",
            "WCY de DK0WCY-2 : K=2",
            "WCY de DK0WCY-2 <19> :",
            "WCY de DK0WCY-2 <19> K=2",
        ];

        for line in lines {
            assert!(parse_weather(line).is_err(), "Should not parse: {line:?}");
        }
    }

    #[test]
    fn test_reparse_is_identical_except_receipt() {
        let first = parse_weather(FULL).unwrap();
        let second = parse_weather(FULL).unwrap();

        assert_eq!(
            WeatherReport {
                received_at: first.received_at,
                ..second
            },
            first
        );
    }
}
