//! The tracked state of the habit and the transitions the view can apply to it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::period::{self, Frequency, PeriodKey};

/// Everything that is persisted about the habit. This is also the `habitData` payload exchanged
/// with the server.
///
/// Apart from `startedDate`, missing fields fall back to their defaults when deserializing, so
/// older or partial snapshots still load. A snapshot can still break the invariants (e.g. a counter
/// past `total_periods`); [`HabitData::repair`] fixes that once the current date is known.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitData {
    pub started_date: NaiveDate,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub counter: u32,
    #[serde(default)]
    pub completed_dates: BTreeSet<PeriodKey>,
    #[serde(default)]
    pub not_done_dates: BTreeSet<PeriodKey>,
    #[serde(default)]
    pub why_entries: BTreeMap<PeriodKey, String>,
}

/// A single view interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HabitEvent {
    ToggleComplete(PeriodKey),
    ToggleNotDone { period: PeriodKey, reason: String },
    SetReason { period: PeriodKey, reason: String },
    SetFrequency(Frequency),
    SetStartDate(NaiveDate),
    SetCounter(i64),
}

impl HabitData {
    /// Fresh state for a habit started on `started_date`.
    pub fn new(started_date: NaiveDate) -> Self {
        Self {
            started_date,
            frequency: Frequency::default(),
            counter: 0,
            completed_dates: BTreeSet::new(),
            not_done_dates: BTreeSet::new(),
            why_entries: BTreeMap::new(),
        }
    }

    /// Pure transition: returns the state after `event`, evaluated as of `today`.
    pub fn apply(mut self, event: HabitEvent, today: NaiveDate) -> Self {
        match event {
            HabitEvent::ToggleComplete(period) => self.toggle_complete(period, today),
            HabitEvent::ToggleNotDone { period, reason } => self.toggle_not_done(period, reason),
            HabitEvent::SetReason { period, reason } => self.set_reason(period, reason),
            HabitEvent::SetFrequency(frequency) => self.set_frequency(frequency),
            HabitEvent::SetStartDate(date) => self.set_start_date(date, today),
            HabitEvent::SetCounter(value) => self.set_counter(value, today),
        }
        self
    }

    /// Marking done bumps the counter, un-marking lowers it again. A period can't be marked done
    /// while the counter is already at `total_periods`, so the two always move together.
    pub fn toggle_complete(&mut self, period: PeriodKey, today: NaiveDate) {
        if self.completed_dates.remove(&period) {
            self.counter = self.counter.saturating_sub(1);
            return;
        }
        if self.counter >= self.total_periods(today) {
            log::info!("Not marking {period} done: counter is already at its maximum");
            return;
        }
        self.not_done_dates.remove(&period);
        self.completed_dates.insert(period);
        self.counter += 1;
    }

    /// Marking a period not-done records `reason` for it. Un-marking keeps the old reason around,
    /// but it is no longer shown.
    pub fn toggle_not_done(&mut self, period: PeriodKey, reason: String) {
        if self.not_done_dates.remove(&period) {
            return;
        }
        if self.completed_dates.remove(&period) {
            self.counter = self.counter.saturating_sub(1);
        }
        self.not_done_dates.insert(period.clone());
        self.why_entries.insert(period, reason);
    }

    /// Only periods that are currently marked not-done take a reason.
    pub fn set_reason(&mut self, period: PeriodKey, reason: String) {
        if self.not_done_dates.contains(&period) {
            self.why_entries.insert(period, reason);
        } else {
            log::debug!("Ignoring reason for {period}: not marked as not done");
        }
    }

    /// Existing keys are left as they are, even if they no longer line up with the new period
    /// length.
    pub fn set_frequency(&mut self, frequency: Frequency) {
        self.frequency = frequency;
    }

    pub fn set_start_date(&mut self, date: NaiveDate, today: NaiveDate) {
        self.started_date = date;
        self.counter = self.counter.min(self.total_periods(today));
    }

    pub fn set_counter(&mut self, value: i64, today: NaiveDate) {
        let max = self.total_periods(today) as i64;
        self.counter = value.clamp(0, max) as u32;
    }

    pub fn total_periods(&self, today: NaiveDate) -> u32 {
        period::total_periods(self.started_date, self.frequency, today)
    }

    pub fn percentage(&self, today: NaiveDate) -> u8 {
        period::percentage(self.counter, self.started_date, self.frequency, today)
    }

    pub fn current_period(&self, today: NaiveDate) -> PeriodKey {
        period::current_period_key(self.frequency, today)
    }

    pub fn is_done(&self, period: &PeriodKey) -> bool {
        self.completed_dates.contains(period)
    }

    pub fn is_not_done(&self, period: &PeriodKey) -> bool {
        self.not_done_dates.contains(period)
    }

    /// Restores the invariants on data that came from outside: the two sets are made disjoint
    /// (done wins) and the counter is clamped to `[0, total_periods]`. Returns whether anything
    /// changed.
    pub fn repair(&mut self, today: NaiveDate) -> bool {
        let overlap: Vec<PeriodKey> = self
            .completed_dates
            .intersection(&self.not_done_dates)
            .cloned()
            .collect();
        for period in &overlap {
            self.not_done_dates.remove(period);
        }
        let max = self.total_periods(today);
        let clamped = self.counter > max;
        if clamped {
            self.counter = max;
        }
        if !overlap.is_empty() || clamped {
            log::warn!(
                "Repaired habit data: {} overlapping period(s), counter clamped: {clamped}",
                overlap.len()
            );
        }
        !overlap.is_empty() || clamped
    }

    /// The reason for a not-done period, if it is currently marked not-done.
    pub fn reason(&self, period: &PeriodKey) -> Option<&str> {
        if !self.is_not_done(period) {
            return None;
        }
        self.why_entries.get(period).map(String::as_str)
    }
}
