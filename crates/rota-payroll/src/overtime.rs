use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{PayrollError, Result};
use crate::types::{MinuteSplit, OvertimeRule, TimeEntry, WindowAggregate};

/// Split one pay window's entries into regular/overtime/double-time buckets
/// under `rule`, and distribute the window buckets back onto the entries.
///
/// The window-level invariant `regular + overtime + double_time == total
/// worked minutes` holds for every rule. Per entry, each bucket share is
/// proportional to the entry's fraction of the window's worked minutes,
/// rounded so that the shares of a bucket sum exactly to the window bucket
/// and each share stays within one minute of its unrounded value.
///
/// Entries are validated first: a clock-out before its clock-in or a break
/// longer than the entry span is an error naming the offending entry.
pub fn aggregate(entries: &[TimeEntry], rule: &OvertimeRule) -> Result<WindowAggregate> {
    let mut worked = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        worked.push(worked_minutes(index, entry)?);
    }
    let total: i64 = worked.iter().sum();

    let window = match rule {
        OvertimeRule::Exempt => MinuteSplit::all_regular(total),
        OvertimeRule::FederalWeekly {
            weekly_overtime_after,
            weekly_double_after,
        } => federal_split(
            total,
            i64::from(*weekly_overtime_after),
            weekly_double_after.map(i64::from),
        ),
        OvertimeRule::CaliforniaHybrid {
            daily_overtime_after,
            daily_double_after,
            weekly_overtime_after,
        } => {
            let days: Vec<NaiveDate> = entries.iter().map(|e| e.clock_in.date_naive()).collect();
            california_split(
                &worked,
                &days,
                i64::from(*daily_overtime_after),
                i64::from(*daily_double_after),
                i64::from(*weekly_overtime_after),
            )
        }
    };

    Ok(WindowAggregate {
        entries: distribute(&window, &worked, total),
        window,
    })
}

/// Minutes actually worked in one entry: span minus unpaid breaks.
fn worked_minutes(index: usize, entry: &TimeEntry) -> Result<i64> {
    if entry.clock_out < entry.clock_in {
        return Err(PayrollError::NegativeSpan {
            index,
            clock_in: entry.clock_in,
            clock_out: entry.clock_out,
        });
    }
    let span = (entry.clock_out - entry.clock_in).num_minutes();
    if i64::from(entry.break_minutes) > span {
        return Err(PayrollError::BreakExceedsSpan {
            index,
            break_minutes: entry.break_minutes,
            span_minutes: span,
        });
    }
    Ok(span - i64::from(entry.break_minutes))
}

/// Band a total: regular up to `overtime_after`, double-time beyond
/// `double_after`, overtime in between.
fn band_split(total: i64, overtime_after: i64, double_after: i64) -> MinuteSplit {
    // crossed thresholds are straightened so the bands stay ordered
    let double_after = double_after.max(overtime_after);
    let regular = total.min(overtime_after);
    let double_time = (total - double_after).max(0);
    MinuteSplit {
        regular,
        overtime: total - regular - double_time,
        double_time,
    }
}

fn federal_split(total: i64, overtime_after: i64, double_after: Option<i64>) -> MinuteSplit {
    match double_after {
        Some(double_after) => band_split(total, overtime_after, double_after),
        None => {
            let regular = total.min(overtime_after);
            MinuteSplit {
                regular,
                overtime: total - regular,
                double_time: 0,
            }
        }
    }
}

fn california_split(
    worked: &[i64],
    days: &[NaiveDate],
    daily_overtime_after: i64,
    daily_double_after: i64,
    weekly_overtime_after: i64,
) -> MinuteSplit {
    let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for (minutes, day) in worked.iter().zip(days) {
        *per_day.entry(*day).or_insert(0) += minutes;
    }

    let mut split = MinuteSplit::default();
    for day_total in per_day.values() {
        let day = band_split(*day_total, daily_overtime_after, daily_double_after);
        split.regular += day.regular;
        split.overtime += day.overtime;
        split.double_time += day.double_time;
    }

    // weekly re-check: regular minutes past the weekly threshold become
    // overtime, daily overtime and double-time stay as classified
    if split.regular > weekly_overtime_after {
        let excess = split.regular - weekly_overtime_after;
        split.regular -= excess;
        split.overtime += excess;
    }
    split
}

/// Distribute each window bucket over the entries in proportion to worked
/// minutes.
fn distribute(window: &MinuteSplit, worked: &[i64], total: i64) -> Vec<MinuteSplit> {
    if total == 0 {
        return vec![MinuteSplit::default(); worked.len()];
    }
    let regular = apportion(window.regular, worked, total);
    let overtime = apportion(window.overtime, worked, total);
    let double_time = apportion(window.double_time, worked, total);
    (0..worked.len())
        .map(|i| MinuteSplit {
            regular: regular[i],
            overtime: overtime[i],
            double_time: double_time[i],
        })
        .collect()
}

/// Proportional shares of `bucket` that sum to `bucket` exactly.
///
/// Each entry's share is the difference of consecutive rounded cumulative
/// targets, so rounding drift cancels instead of accumulating: the last
/// cumulative target is `bucket` itself, and every share is within one
/// minute of its unrounded proportional value.
fn apportion(bucket: i64, worked: &[i64], total: i64) -> Vec<i64> {
    let mut shares = Vec::with_capacity(worked.len());
    let mut cumulative = 0i64;
    let mut allocated = 0i64;
    for minutes in worked {
        cumulative += minutes;
        let target = (bucket * cumulative + total / 2) / total;
        shares.push(target - allocated);
        allocated = target;
    }
    shares
}
