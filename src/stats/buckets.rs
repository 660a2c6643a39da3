//! Report time buckets

use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Start of the bucket containing `date`.
    pub fn align(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - Days::new(u64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// Start of the `n`th bucket after the aligned `anchor`.
    fn nth_start(&self, anchor: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Granularity::Daily => anchor.checked_add_days(Days::new(u64::from(n))),
            Granularity::Weekly => anchor.checked_add_days(Days::new(7 * u64::from(n))),
            Granularity::Monthly => anchor.checked_add_months(Months::new(n)),
        }
    }

    /// Start of the bucket before the one containing `date`.
    fn previous_start(&self, date: NaiveDate) -> NaiveDate {
        let current = self.align(date);
        let previous = match self {
            Granularity::Daily => current.checked_sub_days(Days::new(1)),
            Granularity::Weekly => current.checked_sub_days(Days::new(7)),
            Granularity::Monthly => current.checked_sub_months(Months::new(1)),
        };
        previous.unwrap_or(current)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open date range `[start, end)`, both at midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Bucket {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start_millis(&self) -> i64 {
        self.start.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Lazy sequence of consecutive buckets, ending with the one that contains
/// `today`. Cloning gives an independent iterator from the same position.
#[derive(Debug, Clone)]
pub struct Buckets {
    granularity: Granularity,
    anchor: NaiveDate,
    index: u32,
    today: NaiveDate,
}

impl Buckets {
    /// Every bucket from the one containing `epoch` up to `today`.
    pub fn backfill(granularity: Granularity, epoch: NaiveDate, today: NaiveDate) -> Self {
        Self {
            granularity,
            anchor: granularity.align(epoch),
            index: 0,
            today,
        }
    }

    /// The last completed bucket and the current partial one. Never starts
    /// before the bucket containing `epoch`.
    pub fn incremental(granularity: Granularity, epoch: NaiveDate, today: NaiveDate) -> Self {
        let start = granularity.previous_start(today).max(granularity.align(epoch));
        Self::backfill(granularity, start, today)
    }

    pub fn new(granularity: Granularity, epoch: NaiveDate, today: NaiveDate, incremental: bool) -> Self {
        if incremental {
            Self::incremental(granularity, epoch, today)
        } else {
            Self::backfill(granularity, epoch, today)
        }
    }
}

impl Iterator for Buckets {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        let start = self.granularity.nth_start(self.anchor, self.index)?;
        if start > self.today {
            return None;
        }
        let end = self.granularity.nth_start(self.anchor, self.index + 1)?;
        self.index += 1;
        Some(Bucket::new(start, end))
    }
}
