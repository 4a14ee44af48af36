use crate::types::{CompositeError, CompositeResult, PeriodDescriptor};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Number of periods produced by the bi-weekly scheme
pub const BIWEEKLY_PERIODS: usize = 24;
/// Length of one bi-weekly period in days
pub const BIWEEKLY_DAYS: i64 = 15;
/// Bi-weekly periods never end past this day of year
pub const BIWEEKLY_LAST_DAY: i64 = 365;

/// How a year is cut into reporting periods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodScheme {
    /// Twelve calendar months
    CalendarMonth,
    /// Consecutive n-day periods, the last one truncated at year end
    FixedDays { days: u32 },
    /// 24 fixed 15-day periods
    Biweekly,
    /// Short output periods with a (possibly longer) acquisition window
    SlidingWindow { output_days: u32, acquisition_days: u32 },
}

impl std::fmt::Display for PeriodScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodScheme::CalendarMonth => write!(f, "CALENDAR_MONTH"),
            PeriodScheme::FixedDays { days } => write!(f, "FIXED_DAYS({})", days),
            PeriodScheme::Biweekly => write!(f, "BIWEEKLY"),
            PeriodScheme::SlidingWindow { output_days, acquisition_days } => {
                write!(f, "SLIDING_WINDOW({}, {})", output_days, acquisition_days)
            }
        }
    }
}

/// Generates the ordered period windows of one run
#[derive(Debug, Clone)]
pub struct PeriodPartitioner {
    scheme: PeriodScheme,
    year: i32,
    period_limit: Option<usize>,
    year_start: NaiveDate,
    year_end: NaiveDate,
}

impl PeriodPartitioner {
    /// Validate scheme parameters and create a partitioner
    pub fn new(scheme: PeriodScheme, year: i32, period_limit: Option<usize>) -> CompositeResult<Self> {
        let year_start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| CompositeError::Configuration(format!("Unsupported year {}", year)))?;
        let year_end = year
            .checked_add(1)
            .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1))
            .ok_or_else(|| CompositeError::Configuration(format!("Unsupported year {}", year)))?;

        match scheme {
            PeriodScheme::FixedDays { days } if days == 0 => {
                return Err(CompositeError::Configuration(
                    "FIXED_DAYS period length must be positive".to_string(),
                ));
            }
            PeriodScheme::SlidingWindow { output_days, acquisition_days } => {
                if output_days == 0 || acquisition_days == 0 {
                    return Err(CompositeError::Configuration(
                        "SLIDING_WINDOW lengths must be positive".to_string(),
                    ));
                }
                if acquisition_days < output_days {
                    return Err(CompositeError::Configuration(format!(
                        "SLIDING_WINDOW acquisition window ({} days) is shorter than the output period ({} days)",
                        acquisition_days, output_days
                    )));
                }
            }
            _ => {}
        }

        if period_limit == Some(0) {
            return Err(CompositeError::Configuration(
                "period_limit must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            scheme,
            year,
            period_limit,
            year_start,
            year_end,
        })
    }

    pub fn scheme(&self) -> &PeriodScheme {
        &self.scheme
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Produce the ordered period sequence
    pub fn partition(&self) -> CompositeResult<Vec<PeriodDescriptor>> {
        let mut periods = match self.scheme {
            PeriodScheme::CalendarMonth => self.calendar_months(),
            PeriodScheme::FixedDays { days } => self.fixed_days(days as i64)?,
            PeriodScheme::Biweekly => self.biweekly(),
            PeriodScheme::SlidingWindow { output_days, acquisition_days } => {
                self.sliding_window(output_days as i64, acquisition_days as i64)?
            }
        };

        if let Some(limit) = self.period_limit {
            periods.truncate(limit);
        }

        validate_partition(&periods)?;

        log::info!(
            "Partitioned {} into {} periods ({} to {})",
            self.year,
            periods.len(),
            periods.first().map(|p| p.label.as_str()).unwrap_or("-"),
            periods.last().map(|p| p.label.as_str()).unwrap_or("-"),
        );

        Ok(periods)
    }

    fn year_days(&self) -> i64 {
        (self.year_end - self.year_start).num_days()
    }

    fn calendar_months(&self) -> Vec<PeriodDescriptor> {
        let mut periods = Vec::with_capacity(12);
        let mut start = self.year_start;

        for month in 1..=12u32 {
            let end = if month == 12 {
                self.year_end
            } else {
                NaiveDate::from_ymd_opt(self.year, month + 1, 1).unwrap_or(self.year_end)
            };

            periods.push(PeriodDescriptor {
                index: periods.len(),
                acquisition_start: start,
                acquisition_end: end,
                output_start: start,
                output_end: end,
                label: start.format("%Y-%m").to_string(),
            });
            start = end;
        }

        periods
    }

    fn fixed_days(&self, days: i64) -> CompositeResult<Vec<PeriodDescriptor>> {
        // Periods never extend past year end
        let days = days.min(self.year_days());
        let count = (self.year_days() + days - 1) / days;

        (0..count)
            .map(|i| {
                let start = add_days(self.year_start, i * days)?;
                let end = add_days(start, days)?.min(self.year_end);
                let last_day = end.pred_opt().unwrap_or(end);

                Ok(PeriodDescriptor {
                    index: i as usize,
                    acquisition_start: start,
                    acquisition_end: end,
                    output_start: start,
                    output_end: end,
                    label: format!("{}_{}", start.format("%Y-%m-%d"), last_day.format("%Y-%m-%d")),
                })
            })
            .collect()
    }

    fn biweekly(&self) -> Vec<PeriodDescriptor> {
        (1..=BIWEEKLY_PERIODS as i64)
            .map(|period| {
                let start_day = (period - 1) * BIWEEKLY_DAYS + 1;
                let end_day = (period * BIWEEKLY_DAYS).min(BIWEEKLY_LAST_DAY);

                let start = self.year_start + Duration::days(start_day - 1);
                let end = self.year_start + Duration::days(end_day);

                PeriodDescriptor {
                    index: (period - 1) as usize,
                    acquisition_start: start,
                    acquisition_end: end,
                    output_start: start,
                    output_end: end,
                    label: start.format("%Y-%m-%d").to_string(),
                }
            })
            .collect()
    }

    fn sliding_window(&self, output_days: i64, acquisition_days: i64) -> CompositeResult<Vec<PeriodDescriptor>> {
        let output_days = output_days.min(self.year_days());
        let count = (self.year_days() + output_days - 1) / output_days;

        (0..count)
            .map(|i| {
                let start = add_days(self.year_start, i * output_days)?;
                let output_end = add_days(start, output_days)?.min(self.year_end);
                // May run past year end: only the gathering window grows
                let acquisition_end = add_days(start, acquisition_days)?;

                Ok(PeriodDescriptor {
                    index: i as usize,
                    acquisition_start: start,
                    acquisition_end,
                    output_start: start,
                    output_end,
                    label: start.format("%Y-%m-%d").to_string(),
                })
            })
            .collect()
    }
}

fn add_days(date: NaiveDate, days: i64) -> CompositeResult<NaiveDate> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or_else(|| {
            CompositeError::Configuration(format!(
                "{} plus {} days is outside the supported date range",
                date, days
            ))
        })
}

/// Check ordering and non-overlap of a period sequence
pub fn validate_partition(periods: &[PeriodDescriptor]) -> CompositeResult<()> {
    for (position, period) in periods.iter().enumerate() {
        if period.index != position {
            return Err(CompositeError::Configuration(format!(
                "Period '{}' has index {} but sits at position {}",
                period.label, period.index, position
            )));
        }
        if period.acquisition_end < period.acquisition_start || period.output_end < period.output_start {
            return Err(CompositeError::Configuration(format!(
                "Period '{}' ends before it starts",
                period.label
            )));
        }
    }

    for pair in periods.windows(2) {
        if pair[1].output_start < pair[0].output_end {
            return Err(CompositeError::Configuration(format!(
                "Output periods '{}' and '{}' overlap",
                pair[0].label, pair[1].label
            )));
        }
    }

    Ok(())
}

/// Convenience wrapper around [`PeriodPartitioner`]
pub fn partition_periods(
    scheme: PeriodScheme,
    year: i32,
    period_limit: Option<usize>,
) -> CompositeResult<Vec<PeriodDescriptor>> {
    PeriodPartitioner::new(scheme, year, period_limit)?.partition()
}

/// Contiguous group of periods exported together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodChunk {
    /// First period index (0-based, inclusive)
    pub first: usize,
    /// Last period index (0-based, inclusive)
    pub last: usize,
    /// Period numbers, e.g. "01_02"
    pub label: String,
}

impl PeriodChunk {
    pub fn period_count(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.first && index <= self.last
    }
}

/// Split `total_periods` into consecutive chunks of `chunk_size` (last may be shorter)
pub fn periods_to_chunks(total_periods: usize, chunk_size: usize) -> CompositeResult<Vec<PeriodChunk>> {
    if chunk_size == 0 {
        return Err(CompositeError::Configuration(
            "Chunk size must be positive".to_string(),
        ));
    }

    let chunks = (0..total_periods)
        .step_by(chunk_size)
        .map(|first| {
            let last = (first + chunk_size).min(total_periods) - 1;
            let label = if first == last {
                format!("{:02}", first + 1)
            } else {
                format!("{:02}_{:02}", first + 1, last + 1)
            };
            PeriodChunk { first, last, label }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_months_cover_year_once() {
        let periods = partition_periods(PeriodScheme::CalendarMonth, 2021, None).unwrap();

        assert_eq!(periods.len(), 12);
        assert_eq!(periods[0].output_start, ymd(2021, 1, 1));
        assert_eq!(periods[11].output_end, ymd(2022, 1, 1));
        assert_eq!(periods[1].label, "2021-02");

        let total: i64 = periods.iter().map(|p| p.output_days()).sum();
        assert_eq!(total, 365);
        for pair in periods.windows(2) {
            assert_eq!(pair[0].output_end, pair[1].output_start);
        }
    }

    #[test]
    fn test_fixed_days_truncates_last_period() {
        let periods = partition_periods(PeriodScheme::FixedDays { days: 15 }, 2021, None).unwrap();

        assert_eq!(periods.len(), 25);
        let last = periods.last().unwrap();
        assert_eq!(last.output_days(), 5);
        assert_eq!(last.output_end, ymd(2022, 1, 1));
        assert_eq!(periods[0].label, "2021-01-01_2021-01-15");
    }

    #[test]
    fn test_fixed_days_leap_year() {
        let periods = partition_periods(PeriodScheme::FixedDays { days: 15 }, 2024, None).unwrap();
        assert_eq!(periods.len(), 25);
        assert_eq!(periods.last().unwrap().output_days(), 6);
    }

    #[test]
    fn test_biweekly_periods() {
        let periods = partition_periods(PeriodScheme::Biweekly, 2021, None).unwrap();

        assert_eq!(periods.len(), 24);
        assert!(periods.iter().all(|p| p.output_days() == 15));
        assert_eq!(periods[1].label, "2021-01-16");
        assert_eq!(periods[23].last_output_day(), ymd(2021, 12, 26));
    }

    #[test]
    fn test_sliding_window_extends_acquisition() {
        let scheme = PeriodScheme::SlidingWindow { output_days: 15, acquisition_days: 21 };
        let periods = partition_periods(scheme, 2020, None).unwrap();

        let first = &periods[0];
        assert_eq!(first.output_days(), 15);
        assert_eq!(first.acquisition_days(), 21);
        assert!(first.acquisition_end > first.output_end);

        // Acquisition of the last period may run into the next year
        let last = periods.last().unwrap();
        assert_eq!(last.output_end, ymd(2021, 1, 1));
        assert!(last.acquisition_end > ymd(2021, 1, 1));
    }

    #[test]
    fn test_period_limit() {
        let periods = partition_periods(PeriodScheme::Biweekly, 2025, Some(16)).unwrap();
        assert_eq!(periods.len(), 16);
        assert!(partition_periods(PeriodScheme::Biweekly, 2025, Some(0)).is_err());
    }

    #[test]
    fn test_invalid_scheme_parameters() {
        assert!(matches!(
            PeriodPartitioner::new(PeriodScheme::FixedDays { days: 0 }, 2021, None),
            Err(CompositeError::Configuration(_))
        ));
        assert!(PeriodPartitioner::new(
            PeriodScheme::SlidingWindow { output_days: 15, acquisition_days: 10 },
            2021,
            None
        )
        .is_err());
    }

    #[test]
    fn test_huge_lengths_do_not_overflow_dates() {
        // Longer than a year collapses to a single period
        let periods = partition_periods(PeriodScheme::FixedDays { days: u32::MAX }, 2021, None).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].output_end, ymd(2022, 1, 1));

        let scheme = PeriodScheme::SlidingWindow { output_days: 15, acquisition_days: u32::MAX };
        assert!(matches!(
            partition_periods(scheme, 2021, None),
            Err(CompositeError::Configuration(_))
        ));

        assert!(PeriodPartitioner::new(PeriodScheme::CalendarMonth, i32::MAX, None).is_err());
    }

    #[test]
    fn test_validate_partition_detects_overlap() {
        let mut periods = partition_periods(PeriodScheme::CalendarMonth, 2021, None).unwrap();
        periods[1].output_start = ymd(2021, 1, 20);
        assert!(validate_partition(&periods).is_err());
    }

    #[test]
    fn test_periods_to_chunks() {
        let chunks = periods_to_chunks(24, 2).unwrap();
        assert_eq!(chunks.len(), 12);
        assert_eq!(chunks[0].label, "01_02");
        assert_eq!(chunks[11].label, "23_24");

        let odd = periods_to_chunks(5, 2).unwrap();
        assert_eq!(odd.len(), 3);
        assert_eq!(odd[2].label, "05");
        assert_eq!(odd[2].period_count(), 1);

        assert!(periods_to_chunks(12, 0).is_err());
        assert!(periods_to_chunks(0, 2).unwrap().is_empty());
    }
}
