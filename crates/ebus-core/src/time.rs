//! Monthly and annual time axes.
//!
//! CESM-LE monthly output is relabelled on load with a fresh month-end axis
//! starting at 1920-01; the native model time encoding is never decoded.
use std::fmt;
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    /// 1..=12
    pub month: u32,
}

impl YearMonth {
    pub const fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    fn ordinal(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_ordinal(n: i64) -> Self {
        Self {
            year: n.div_euclid(12) as i32,
            month: (n.rem_euclid(12) + 1) as u32,
        }
    }

    /// The month `n` months after (or before, if negative) this one.
    pub fn offset(self, n: i64) -> Self {
        Self::from_ordinal(self.ordinal() + n)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(self, other: YearMonth) -> i64 {
        other.ordinal() - self.ordinal()
    }

    /// Last day of the month, used as the time label.
    pub fn month_end(self) -> NaiveDate {
        let next = self.offset(1);
        NaiveDate::from_ymd_opt(next.year, next.month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for YearMonth {
    type Err = Error;

    /// Parses `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InsufficientData(format!("invalid year-month '{s}'"));
        let (y, m) = s.split_once('-').ok_or_else(bad)?;
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&month) {
            return Err(bad());
        }
        Ok(Self { year, month })
    }
}

/// Contiguous axis of `len` steps, `step` months apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub start: YearMonth,
    pub len: usize,
    /// Months per step: 1 for monthly, 12 for annual.
    #[serde(default = "monthly_step")]
    pub step: u32,
}

fn monthly_step() -> u32 {
    1
}

impl TimeAxis {
    pub fn new(start: YearMonth, len: usize) -> Self {
        Self { start, len, step: 1 }
    }

    /// One step per calendar year, each labelled by its January.
    pub fn annual(first_year: i32, len: usize) -> Self {
        Self { start: YearMonth::new(first_year, 1), len, step: 12 }
    }

    pub fn is_annual(&self) -> bool {
        self.step == 12
    }

    /// Full CESM-LE monthly axis: 1920-01 through 2100-12.
    pub fn cesm_raw() -> Self {
        Self::spanning(YearMonth::new(1920, 1), YearMonth::new(2100, 12))
    }

    /// Inclusive axis from `first` to `last`.
    pub fn spanning(first: YearMonth, last: YearMonth) -> Self {
        let len = first.months_until(last).max(-1) + 1;
        Self::new(first, len as usize)
    }

    pub fn end(&self) -> YearMonth {
        self.start.offset((self.len as i64 - 1) * self.step as i64)
    }

    pub fn at(&self, i: usize) -> YearMonth {
        self.start.offset(i as i64 * self.step as i64)
    }

    /// Calendar month (1..=12) of step `i`.
    pub fn month_of(&self, i: usize) -> u32 {
        self.at(i).month
    }

    /// Step labelled `ym`, if `ym` falls exactly on the axis.
    pub fn index_of(&self, ym: YearMonth) -> Option<usize> {
        let k = self.start.months_until(ym);
        let step = self.step.max(1) as i64;
        if k < 0 || k % step != 0 {
            return None;
        }
        let i = (k / step) as usize;
        (i < self.len).then_some(i)
    }

    /// Index range covering `from..=to` together with the sliced axis.
    pub fn slice(&self, from: YearMonth, to: YearMonth) -> Result<(Range<usize>, TimeAxis)> {
        let a = self.index_of(from);
        let b = self.index_of(to);
        match (a, b) {
            (Some(a), Some(b)) if a <= b => Ok((a..b + 1, TimeAxis { start: from, len: b + 1 - a, step: self.step })),
            _ => Err(Error::InsufficientData(format!(
                "cannot slice {from}..{to} from axis {}..{}",
                self.start,
                self.end()
            ))),
        }
    }

    /// Drop the first `n` steps (what a trailing rolling mean discards).
    pub fn skip(&self, n: usize) -> TimeAxis {
        TimeAxis { start: self.at(n), len: self.len.saturating_sub(n), step: self.step }
    }

    pub fn truncate(&self, len: usize) -> TimeAxis {
        TimeAxis { len: self.len.min(len), ..*self }
    }

    /// Month-end date labels of each step.
    pub fn labels(&self) -> Vec<NaiveDate> {
        (0..self.len).map(|i| self.at(i).month_end()).collect()
    }

    /// Indices grouped by calendar year, in order. Partial years are kept.
    pub fn years(&self) -> Vec<(i32, Vec<usize>)> {
        let mut out: Vec<(i32, Vec<usize>)> = Vec::new();
        for i in 0..self.len {
            let y = self.at(i).year;
            match out.last_mut() {
                Some((yy, idx)) if *yy == y => idx.push(i),
                _ => out.push((y, vec![i])),
            }
        }
        out
    }
}
