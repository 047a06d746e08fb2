use std::fmt;
use std::str::FromStr;

use jiff::civil::Date;
use jiff::ToSpan;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("{0}")]
pub struct ParseError(pub String);

/// A calendar month, e.g. the reporting period of a monthly extract.
/// Serialized as its token, e.g. "2025_07".
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(Date);

impl Month {
    pub fn new(year: i16, month: i8) -> Result<Month, ParseError> {
        Date::new(year, month, 1)
            .map(Month)
            .map_err(|e| ParseError(format!("Invalid month {}-{}: {}", year, month, e)))
    }

    /// Return the month that contains this date.
    pub fn containing(date: Date) -> Month {
        Month(date.first_of_month())
    }

    pub fn year(&self) -> i16 {
        self.0.year()
    }

    pub fn month(&self) -> i8 {
        self.0.month()
    }

    pub fn start_date(&self) -> Date {
        self.0
    }

    pub fn end_date(&self) -> Date {
        self.0.last_of_month()
    }

    pub fn next(&self) -> Month {
        Month(self.0.saturating_add(1.month()))
    }

    /// The token used in file names and urls, e.g. "2025_07".
    pub fn token(&self) -> String {
        format!("{}_{:02}", self.year(), self.month())
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.strftime("%Y-%m").to_string())
    }
}

/// Accepts "2025_07" and "2025-07".
impl FromStr for Month {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(['_', '-']).collect();
        if parts.len() != 2 || parts[0].len() != 4 || parts[1].is_empty() || parts[1].len() > 2 {
            return Err(ParseError(format!("Failed parsing {} as a month", s)));
        }
        let year = parts[0]
            .parse::<i16>()
            .map_err(|_| ParseError(format!("Invalid year in {}", s)))?;
        let month = parts[1]
            .parse::<i8>()
            .map_err(|_| ParseError(format!("Invalid month of year in {}", s)))?;
        if !(1..=12).contains(&month) {
            return Err(ParseError(format!("Month of year {} not in 1..=12", month)));
        }
        Month::new(year, month)
    }
}

impl TryFrom<String> for Month {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Month> for String {
    fn from(value: Month) -> Self {
        value.token()
    }
}
