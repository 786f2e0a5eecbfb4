//! Period arithmetic: how a start date and a [`Frequency`] turn "today" into a period key and a
//! count of elapsed periods.
//!
//! Everything here is pure. Callers pass the current date in explicitly so the results are
//! deterministic and testable.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

/// How often the habit is supposed to be done.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

/// The length of a period and the rule that maps a date onto the first day of its period.
#[derive(Debug)]
pub struct Period {
    pub days: i64,
    anchor: fn(NaiveDate) -> NaiveDate,
}

const DAILY: Period = Period {
    days: 1,
    anchor: same_day,
};

const WEEKLY: Period = Period {
    days: 7,
    anchor: previous_sunday,
};

fn same_day(date: NaiveDate) -> NaiveDate {
    date
}

/// Weeks start on Sunday. A Sunday is its own week start.
fn previous_sunday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

impl Frequency {
    pub const ALL: [Frequency; 2] = [Frequency::Daily, Frequency::Weekly];

    pub fn period(self) -> &'static Period {
        match self {
            Frequency::Daily => &DAILY,
            Frequency::Weekly => &WEEKLY,
        }
    }
}

impl Period {
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        (self.anchor)(date)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown frequency `{0}` (expected Daily or Weekly)")]
pub struct UnknownFrequency(pub String);

impl FromStr for Frequency {
    type Err = UnknownFrequency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Frequency::ALL
            .into_iter()
            .find(|frequency| frequency.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFrequency(s.to_string()))
    }
}

/// Canonical name of a period: the `YYYY-MM-DD` date of its first day.
///
/// Keys are kept as plain strings on the wire, and old keys are never reinterpreted when the
/// frequency changes, so this does not validate its contents.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeriodKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for PeriodKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Key of the period containing `today`.
pub fn current_period_key(frequency: Frequency, today: NaiveDate) -> PeriodKey {
    PeriodKey::from_date(frequency.period().start_of(today))
}

/// Number of periods from `started` up to and including the one containing `today`.
///
/// Always at least 1. A start date in the future counts as a single period rather than
/// measuring the distance backwards.
pub fn total_periods(started: NaiveDate, frequency: Frequency, today: NaiveDate) -> u32 {
    let elapsed_days = (today - started).num_days();
    if elapsed_days < 0 {
        return 1;
    }
    let periods = elapsed_days / frequency.period().days + 1;
    u32::try_from(periods).unwrap_or(u32::MAX)
}

/// `round(counter / total_periods * 100)`, clamped to `0..=100`.
pub fn percentage(counter: u32, started: NaiveDate, frequency: Frequency, today: NaiveDate) -> u8 {
    let total = total_periods(started, frequency, today) as u64;
    if total == 0 {
        return 0;
    }
    // integer round-half-up of counter * 100 / total
    let rounded = (counter as u64 * 200 + total) / (total * 2);
    rounded.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_daily_same_day_is_one_period() {
        let today = date("2024-03-14");
        assert_eq!(total_periods(today, Frequency::Daily, today), 1);
    }

    #[test]
    fn test_daily_counts_both_endpoints() {
        assert_eq!(
            total_periods(date("2024-03-04"), Frequency::Daily, date("2024-03-14")),
            11
        );
    }

    #[test]
    fn test_weekly_fourteen_day_span() {
        // Sunday 2024-03-03 .. Sunday 2024-03-17 crosses two week boundaries
        assert_eq!(
            total_periods(date("2024-03-03"), Frequency::Weekly, date("2024-03-17")),
            3
        );
        assert_eq!(
            total_periods(date("2024-03-03"), Frequency::Weekly, date("2024-03-16")),
            2
        );
    }

    #[test]
    fn test_forward_dated_start_is_single_period() {
        // a start date after today does not count backwards
        assert_eq!(
            total_periods(date("2024-04-01"), Frequency::Daily, date("2024-03-01")),
            1
        );
        assert_eq!(
            total_periods(date("2024-04-01"), Frequency::Weekly, date("2024-03-01")),
            1
        );
    }

    #[test]
    fn test_daily_key_is_the_date() {
        assert_eq!(
            current_period_key(Frequency::Daily, date("2024-03-14")).as_str(),
            "2024-03-14"
        );
    }

    #[test]
    fn test_weekly_key_is_previous_sunday() {
        // 2024-03-14 is a Thursday
        assert_eq!(
            current_period_key(Frequency::Weekly, date("2024-03-14")).as_str(),
            "2024-03-10"
        );
        // Sunday is its own week start
        assert_eq!(
            current_period_key(Frequency::Weekly, date("2024-03-10")).as_str(),
            "2024-03-10"
        );
        // Saturday belongs to the week that started six days earlier
        assert_eq!(
            current_period_key(Frequency::Weekly, date("2024-03-16")).as_str(),
            "2024-03-10"
        );
    }

    #[test]
    fn test_percentage_scenario() {
        let today = date("2024-03-14");
        let started = today - Duration::days(10);
        assert_eq!(percentage(7, started, Frequency::Daily, today), 64);
    }

    #[test]
    fn test_percentage_matches_formula_for_every_valid_counter() {
        let today = date("2024-06-30");
        for offset in [0, 1, 6, 7, 13, 30, 99] {
            let started = today - Duration::days(offset);
            for frequency in Frequency::ALL {
                let total = total_periods(started, frequency, today);
                for counter in 0..=total {
                    let expected = (counter as f64 / total as f64 * 100.0).round() as u8;
                    let actual = percentage(counter, started, frequency, today);
                    assert!(actual <= 100);
                    assert_eq!(
                        actual, expected,
                        "counter {counter} of {total} ({frequency})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_percentage_clamps_overfull_counter() {
        let today = date("2024-03-14");
        assert_eq!(percentage(5, today, Frequency::Daily, today), 100);
    }

    #[test]
    fn test_frequency_parse_and_display() {
        assert_eq!("Weekly".parse::<Frequency>(), Ok(Frequency::Weekly));
        assert_eq!("daily".parse::<Frequency>(), Ok(Frequency::Daily));
        assert!("Monthly".parse::<Frequency>().is_err());
        assert_eq!(Frequency::Weekly.to_string(), "Weekly");
    }

    #[test]
    fn test_frequency_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&Frequency::Weekly).unwrap(),
            "\"Weekly\""
        );
    }
}
