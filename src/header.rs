//! Synthetic message headers.
//!
//! Each accepted datagram is introduced to the message consumer by a one-line
//! header in the layout ngrep prints for UDP traffic:
//!
//! ```text
//! U 2024/01/15 10:30:00.123456 10.0.0.1:5060 -> 10.0.0.2:5060
//! ```
//!
//! The layout is a data contract with the consumer and must stay byte-exact.

use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::domain::{Endpoint, Timestamp};

/// Transport tag for UDP.
const UDP_TAG: &str = "U";
/// Direction marker between source and destination.
const ARROW: &str = "->";
const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Render the header using the local time zone.
pub fn format_header(timestamp: Timestamp, src: Endpoint, dst: Endpoint) -> String {
    format_header_in(timestamp, src, dst, &Local)
}

/// Render the header in the given time zone.
pub fn format_header_in<Tz>(timestamp: Timestamp, src: Endpoint, dst: Endpoint, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let utc: DateTime<Utc> = DateTime::from_timestamp(timestamp.secs, 0).unwrap_or_default();
    let local = utc.with_timezone(tz);

    format!(
        "{} {}.{:06} {} {} {}",
        UDP_TAG,
        local.format(DATE_FORMAT),
        timestamp.micros,
        src,
        ARROW,
        dst
    )
}

/// A header parsed back into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticHeader {
    /// Date and time text, e.g. `2024/01/15 10:30:00.123456`
    pub timestamp: String,
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl SyntheticHeader {
    /// Parse a header produced by [`format_header`].
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();

        if fields.next()? != UDP_TAG {
            return None;
        }
        let date = fields.next()?;
        let time = fields.next()?;
        let src = fields.next()?.parse().ok()?;
        if fields.next()? != ARROW {
            return None;
        }
        let dst = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            timestamp: format!("{} {}", date, time),
            src,
            dst,
        })
    }
}
