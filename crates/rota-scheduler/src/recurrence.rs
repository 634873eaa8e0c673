use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

use rota_core::Schedule;

use crate::error::{Result, SchedulerError};

/// Upper bound on window-advance steps, so a pathological schedule (an
/// every-second cron after a week of downtime, say) can't spin the executor.
const MAX_ADVANCE_STEPS: u32 = 10_000;

/// Compute the next UTC occurrence of `schedule` strictly after `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` whose instant
/// has passed) or when a cron expression fails to parse.
pub fn next_occurrence(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Interval { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),

        Schedule::Daily { hour, minute } => {
            let candidate = on_day_at(from, *hour, *minute)?;
            if candidate > from {
                Some(candidate)
            } else {
                // Today's window has passed, advance to tomorrow.
                on_day_at(from + Duration::days(1), *hour, *minute)
            }
        }

        Schedule::Weekly { day, hour, minute } => {
            // `day` follows ISO weekday numbering: 0=Monday … 6=Sunday,
            // which matches chrono's `num_days_from_monday`.
            let today = from.weekday().num_days_from_monday() as i64;
            let ahead = ((*day).min(6) as i64 - today).rem_euclid(7);
            let candidate = on_day_at(from + Duration::days(ahead), *hour, *minute)?;
            if candidate > from {
                Some(candidate)
            } else {
                // The time on the target weekday has already passed, push 7 days.
                on_day_at(from + Duration::days(ahead + 7), *hour, *minute)
            }
        }

        Schedule::Cron { expression } => match cron::Schedule::from_str(expression) {
            Ok(cron_schedule) => cron_schedule.after(&from).next(),
            Err(e) => {
                warn!(%expression, error = %e, "invalid cron expression, no next occurrence");
                None
            }
        },
    }
}

/// Reject schedules that can never produce a sane occurrence stream.
pub fn validate_schedule(schedule: &Schedule) -> Result<()> {
    match schedule {
        Schedule::Once { .. } => Ok(()),
        Schedule::Interval { every_secs } => {
            if *every_secs == 0 {
                Err(SchedulerError::InvalidSchedule(
                    "interval must be at least 1 second".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        Schedule::Daily { hour, minute } => check_time(*hour, *minute),
        Schedule::Weekly { day, hour, minute } => {
            if *day > 6 {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "weekday {day} out of range 0-6"
                )));
            }
            check_time(*hour, *minute)
        }
        Schedule::Cron { expression } => cron::Schedule::from_str(expression)
            .map(|_| ())
            .map_err(|e| {
                SchedulerError::InvalidSchedule(format!("bad cron expression {expression:?}: {e}"))
            }),
    }
}

/// From the window claimed at `started_at`, find the first window strictly
/// after `finished_at`. Everything in between can no longer fire (skipped,
/// never queued) and comes back as the missed count.
pub fn advance_window(
    schedule: &Schedule,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, u32) {
    let mut cursor = started_at;
    let mut missed = 0u32;
    for _ in 0..MAX_ADVANCE_STEPS {
        match next_occurrence(schedule, cursor) {
            None => return (None, missed),
            Some(next) if next > finished_at => return (Some(next), missed),
            Some(next) => {
                missed += 1;
                cursor = next;
            }
        }
    }
    warn!(
        ?schedule,
        %finished_at,
        "window advance exceeded step budget, jumping past finish time"
    );
    (next_occurrence(schedule, finished_at), missed)
}

fn on_day_at(day: DateTime<Utc>, hour: u8, minute: u8) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        day.year(),
        day.month(),
        day.day(),
        hour as u32,
        minute as u32,
        0,
    )
    .single()
}

fn check_time(hour: u8, minute: u8) -> Result<()> {
    if hour > 23 || minute > 59 {
        Err(SchedulerError::InvalidSchedule(format!(
            "time {hour:02}:{minute:02} out of range"
        )))
    } else {
        Ok(())
    }
}
