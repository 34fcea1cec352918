//! Calendar quarters: the time axis of every join in the build.
//!
//! Financial reports are stamped with a quarter-end date, complaints are
//! mapped to the quarter they were sent in, and registry validity windows
//! are tested at the quarter-end date.

use crate::error::{BuildError, BuildResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Stand-in for an open-ended validity window ("still active").
pub fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Stand-in for a missing start date.
pub fn far_past() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quarter {
    pub year: i32,
    /// 1..=4
    pub q: u8,
}

impl Quarter {
    pub fn new(year: i32, q: u8) -> BuildResult<Self> {
        if !(1..=4).contains(&q) {
            return Err(BuildError::InvalidQuarter {
                value: format!("{year}Q{q}"),
            });
        }
        Ok(Self { year, q })
    }

    /// The quarter containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            q: (date.month0() / 3 + 1) as u8,
        }
    }

    /// Last calendar day of the quarter (03-31, 06-30, 09-30, 12-31).
    pub fn end_date(self) -> NaiveDate {
        let (month, day) = match self.q {
            1 => (3, 31),
            2 => (6, 30),
            3 => (9, 30),
            _ => (12, 31),
        };
        NaiveDate::from_ymd_opt(self.year, month, day).unwrap_or_else(far_future)
    }

    /// The immediately preceding quarter. Q1 rolls back to Q4 of the prior year.
    pub fn prev(self) -> Self {
        if self.q == 1 {
            Self { year: self.year - 1, q: 4 }
        } else {
            Self { year: self.year, q: self.q - 1 }
        }
    }

    /// Ordinal position on an unbounded quarter line.
    fn ordinal(self) -> i64 {
        self.year as i64 * 4 + (self.q as i64 - 1)
    }
}

/// Quarter-end date of the quarter before the one containing `date`.
/// `2021-03-31` maps to `2020-12-31`; `2021-06-30` maps to `2021-03-31`.
pub fn lag_quarter_end(date: NaiveDate) -> NaiveDate {
    Quarter::from_date(date).prev().end_date()
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.q)
    }
}

impl FromStr for Quarter {
    type Err = BuildError;

    /// Accepts `2020Q1`, `2020q1` and `2020-Q1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuildError::InvalidQuarter { value: s.to_string() };
        let upper = s.trim().to_uppercase();
        let (year, q) = upper.split_once('Q').ok_or_else(invalid)?;
        let year: i32 = year.trim_end_matches('-').parse().map_err(|_| invalid())?;
        let q: u8 = q.parse().map_err(|_| invalid())?;
        Quarter::new(year, q).map_err(|_| invalid())
    }
}

impl Serialize for Quarter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quarter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A fixed, inclusive range of quarters. Every temporal table in the build
/// is laid out over one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterGrid {
    pub start: Quarter,
    pub end: Quarter,
}

impl QuarterGrid {
    pub fn new(start: Quarter, end: Quarter) -> BuildResult<Self> {
        if start > end {
            return Err(BuildError::Config {
                message: format!("quarter grid start {start} is after end {end}"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.end.ordinal() - self.start.ordinal() + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Position of `quarter` in the grid, if it lies inside it.
    pub fn index_of(&self, quarter: Quarter) -> Option<usize> {
        if quarter < self.start || quarter > self.end {
            return None;
        }
        Some((quarter.ordinal() - self.start.ordinal()) as usize)
    }

    pub fn quarter_at(&self, index: usize) -> Option<Quarter> {
        if index >= self.len() {
            return None;
        }
        let ord = self.start.ordinal() + index as i64;
        Some(Quarter {
            year: ord.div_euclid(4) as i32,
            q: (ord.rem_euclid(4) + 1) as u8,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Quarter> + '_ {
        (0..self.len()).filter_map(move |i| self.quarter_at(i))
    }
}

/// Lenient date parsing for registry and report cells.
///
/// Handles `2020-12-31`, `12/31/2020`, `20201231`, and any of those followed
/// by a time component (`12/31/2020 12:00:00 AM`). Blank and unparseable
/// cells coerce to `None`.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d", "%Y/%m/%d", "%d-%b-%Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn lag_rolls_over_year_at_q1() {
        assert_eq!(lag_quarter_end(d(2021, 3, 31)), d(2020, 12, 31));
        assert_eq!(lag_quarter_end(d(2021, 6, 30)), d(2021, 3, 31));
        assert_eq!(lag_quarter_end(d(2021, 12, 31)), d(2021, 9, 30));
    }

    #[test]
    fn quarter_parses_and_displays() {
        let q: Quarter = "2020Q1".parse().unwrap();
        assert_eq!(q, Quarter { year: 2020, q: 1 });
        assert_eq!(q.to_string(), "2020Q1");
        assert!("2020Q5".parse::<Quarter>().is_err());
        assert!("garbage".parse::<Quarter>().is_err());
    }

    #[test]
    fn grid_indexes_round_trip() {
        let grid = QuarterGrid::new("2010Q1".parse().unwrap(), "2025Q2".parse().unwrap()).unwrap();
        assert_eq!(grid.len(), 62);
        let q: Quarter = "2021Q2".parse().unwrap();
        let idx = grid.index_of(q).unwrap();
        assert_eq!(grid.quarter_at(idx), Some(q));
        assert_eq!(grid.index_of("2009Q4".parse().unwrap()), None);
        assert_eq!(grid.iter().count(), grid.len());
    }

    #[test]
    fn loose_dates_accept_registry_formats() {
        assert_eq!(parse_loose_date("12/31/2020 12:00:00 AM"), Some(d(2020, 12, 31)));
        assert_eq!(parse_loose_date("20200331"), Some(d(2020, 3, 31)));
        assert_eq!(parse_loose_date("2020-06-30"), Some(d(2020, 6, 30)));
        assert_eq!(parse_loose_date(""), None);
        assert_eq!(parse_loose_date("not a date"), None);
    }
}
