//! Review interval scheduling.
//!
//! Pure functions only: the caller supplies `now` and persists the result.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

pub const MILLIS_PER_DAY: f64 = 86_400_000.0;

// A freshly created item is first due one day after creation
pub const INITIAL_INTERVAL_DAYS: f64 = 1.0;

/// Performance tier that selects the interval growth formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalBand {
    /// performance >= 0.90, interval doubles per prior review
    High,
    /// 0.70 <= performance < 0.90, interval grows by 1.5x per prior review
    Mid,
    /// performance < 0.70, interval resets to one day
    Low,
}

impl IntervalBand {
    /// Classifies an attempt. Compares `10 * score` against the total so the
    /// 0.90 and 0.70 boundaries are exact.
    pub fn classify(score: u32, total_questions: u32) -> Self {
        let scaled = u64::from(score) * 10;
        let total = u64::from(total_questions);

        if scaled >= total * 9 {
            IntervalBand::High
        } else if scaled >= total * 7 {
            IntervalBand::Mid
        } else {
            IntervalBand::Low
        }
    }

    /// Interval in days, using the pre-attempt review count as the exponent base.
    pub fn interval_days(&self, review_count: u32) -> f64 {
        let exponent = i32::try_from(u64::from(review_count) + 1).unwrap_or(i32::MAX);
        match self {
            IntervalBand::High => 2f64.powi(exponent),
            IntervalBand::Mid => 1.5f64.powi(exponent),
            IntervalBand::Low => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalBand::High => "high",
            IntervalBand::Mid => "mid",
            IntervalBand::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduleOutcome {
    pub next_review_at: DateTime<Utc>,
    pub new_review_count: u32,
    pub band: IntervalBand,
    pub interval_days: f64,
}

pub fn validate_score(score: u32, total_questions: u32) -> Result<()> {
    if total_questions == 0 {
        return Err(Error::invalid("total_questions must be greater than zero"));
    }
    if score > total_questions {
        return Err(Error::invalid(format!(
            "score {} exceeds total_questions {}",
            score, total_questions
        )));
    }
    Ok(())
}

/// `score / total_questions`, or an error when the attempt cannot be scored.
pub fn performance(score: u32, total_questions: u32) -> Result<f64> {
    validate_score(score, total_questions)?;
    Ok(score as f64 / total_questions as f64)
}

/// Computes the next due date and review count after a completed attempt.
///
/// A low-band attempt resets the interval to one day but the review count
/// still increments, so a later high-band attempt resumes growth from the
/// accumulated count.
pub fn schedule_next_review(
    current_review_count: u32,
    score: u32,
    total_questions: u32,
    now: DateTime<Utc>,
) -> Result<ScheduleOutcome> {
    validate_score(score, total_questions)?;

    let new_review_count = current_review_count
        .checked_add(1)
        .ok_or_else(|| Error::invalid("review count cannot be incremented further"))?;

    let band = IntervalBand::classify(score, total_questions);
    let interval_days = band.interval_days(current_review_count);

    Ok(ScheduleOutcome {
        next_review_at: add_days(now, interval_days),
        new_review_count,
        band,
        interval_days,
    })
}

/// Due date assigned to an item created at `now`.
pub fn initial_review_at(now: DateTime<Utc>) -> DateTime<Utc> {
    add_days(now, INITIAL_INTERVAL_DAYS)
}

/// Latest due date the scheduler hands out, aligned to the millisecond
/// resolution timestamps are stored with.
pub fn latest_review_at() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC.trunc_subsecs(3)
}

// Rounds to the nearest millisecond; saturates at `latest_review_at` when the
// interval is too large for chrono.
fn add_days(now: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    let latest = latest_review_at();
    let millis = (days * MILLIS_PER_DAY).round();
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return latest;
    }

    TimeDelta::try_milliseconds(millis as i64)
        .and_then(|delta| now.checked_add_signed(delta))
        .map_or(latest, |at| at.min(latest))
}
