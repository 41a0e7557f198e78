//! PRTG datetime normalization.
//!
//! PRTG renders timestamps in the server's local time using whatever locale the
//! server runs with, and historic rows carry ranges such as
//! `"06.03.2025 15:11:00 - 15:12:00"`. [`DateTimeParser`] turns all of these into
//! absolute UTC instants using one configured source timezone.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Datetime parse error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse datetime '{input}': {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

impl ParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// Carries its own offset.
    Rfc3339,
    /// Local date and time.
    DateTime(&'static str),
    /// Local date, midnight.
    Date(&'static str),
}

/// Layouts in match order. Day-first numeric layouts come before month-first
/// ones because PRTG's native locale is European.
const LAYOUTS: &[Layout] = &[
    Layout::DateTime("%d.%m.%Y %H:%M:%S"),
    Layout::Rfc3339,
    Layout::DateTime("%Y-%m-%dT%H:%M:%S"),
    Layout::DateTime("%Y-%m-%d %H:%M:%S"),
    Layout::DateTime("%Y/%m/%d %H:%M:%S"),
    Layout::DateTime("%m/%d/%Y %I:%M:%S %p"),
    Layout::DateTime("%m/%d/%Y %H:%M:%S"),
    Layout::DateTime("%d %b %Y %H:%M:%S"),
    Layout::DateTime("%d %b %Y %I:%M:%S %p"),
    Layout::DateTime("%b %d, %Y %H:%M:%S"),
    Layout::DateTime("%d-%m-%Y %H:%M:%S"),
    Layout::Date("%Y-%m-%d"),
    Layout::Date("%d.%m.%Y"),
    Layout::Date("%m/%d/%Y"),
];

const TIME_ONLY_LAYOUTS: &[&str] = &["%H:%M:%S", "%I:%M:%S %p"];

/// Parser bound to the PRTG server's timezone.
#[derive(Debug, Clone, Copy)]
pub struct DateTimeParser {
    tz: Tz,
}

impl DateTimeParser {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parse a PRTG timestamp or timestamp range.
    ///
    /// Returns the UTC instant together with its Unix-seconds rendering. For a
    /// range only the end governs the result; an end that falls before the
    /// start is moved to the next calendar day.
    pub fn parse(&self, text: &str) -> Result<(DateTime<Utc>, String), ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::new(text, "empty input"));
        }

        let at = match text.split_once(" - ") {
            Some((start, end)) => self.parse_range(text, start.trim(), end.trim())?,
            None => self.parse_single(text)?,
        };

        Ok((at, at.timestamp().to_string()))
    }

    fn parse_range(&self, input: &str, start: &str, end: &str) -> Result<DateTime<Utc>, ParseError> {
        // "15:11:00 - 15:12:00" style ranges only carry the date on the start.
        let end_text = if is_time_only(end) {
            let date_part = start.split_whitespace().next().unwrap_or_default();
            format!("{} {}", date_part, end)
        } else {
            end.to_string()
        };

        let end_at = self
            .parse_single(&end_text)
            .map_err(|e| ParseError::new(input, e.reason))?;

        match self.parse_single(start) {
            Ok(start_at) if end_at < start_at => self.next_day(end_at).ok_or_else(|| {
                ParseError::new(input, "day rollover produced an invalid local time")
            }),
            _ => Ok(end_at),
        }
    }

    fn parse_single(&self, text: &str) -> Result<DateTime<Utc>, ParseError> {
        let mut last_err = String::from("no layout matched");

        for layout in LAYOUTS {
            let attempt = match layout {
                Layout::Rfc3339 => DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| e.to_string()),
                Layout::DateTime(fmt) => NaiveDateTime::parse_from_str(text, fmt)
                    .map_err(|e| e.to_string())
                    .and_then(|naive| self.localize(naive)),
                Layout::Date(fmt) => NaiveDate::parse_from_str(text, fmt)
                    .map_err(|e| e.to_string())
                    .and_then(|date| self.localize(date.and_time(NaiveTime::MIN))),
            };

            match attempt {
                Ok(at) => return Ok(at),
                Err(e) => last_err = e,
            }
        }

        tracing::debug!(input = text, error = %last_err, "Failed to parse datetime");
        Err(ParseError::new(text, last_err))
    }

    fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<Utc>, String> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(format!("{} does not exist in {}", naive, self.tz)),
        }
    }

    /// Same local wall-clock time, one calendar day later.
    fn next_day(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = at.with_timezone(&self.tz).naive_local();
        let next = local.checked_add_days(Days::new(1))?;
        self.localize(next).ok()
    }
}

fn is_time_only(text: &str) -> bool {
    TIME_ONLY_LAYOUTS
        .iter()
        .any(|fmt| NaiveTime::parse_from_str(text, fmt).is_ok())
}
