//! Burst smoothing: rewrites future `next_run_at` values so no single
//! calendar minute holds more than the configured cap.

use crate::common::entity_ids::JobId;
use crate::domains::jobs::models::job::Job;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

const HYSTERESIS_THRESHOLD_SECS: i64 = 30;
const WINDOW_MINUTES: i64 = 3; // +/- 180s

/// A `next_run_at` rewrite the scheduler should persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothingMove {
    pub job_id: JobId,
    pub new_next_run_at: DateTime<Utc>,
}

fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

/// Computes the set of moves needed to bring every minute in `jobs` under
/// `max_per_minute`. Only moves that shift a job by more than the
/// hysteresis threshold are returned, and a move never lands before `now`
/// (clock-skew clamp). Idempotent: re-running on the post-move distribution
/// yields no further moves, since every minute is at or under the cap.
pub fn compute_burst_smoothing(
    jobs: &[Job],
    now: DateTime<Utc>,
    max_per_minute: u32,
) -> Vec<SmoothingMove> {
    let mut by_minute: BTreeMap<i64, Vec<&Job>> = BTreeMap::new();
    for job in jobs {
        by_minute.entry(minute_bucket(job.next_run_at)).or_default().push(job);
    }

    let mut counts: HashMap<i64, u32> = by_minute
        .iter()
        .map(|(minute, group)| (*minute, group.len() as u32))
        .collect();

    let mut moves = Vec::new();

    for (&minute, group) in by_minute.iter() {
        let current_count = counts[&minute];
        if current_count <= max_per_minute {
            continue;
        }

        // Keep the first `max_per_minute` by ascending job id (deterministic
        // tie-break), move the rest.
        let mut ordered: Vec<&&Job> = group.iter().collect();
        ordered.sort_by_key(|j| j.id);
        let overflow = &ordered[max_per_minute as usize..];

        for job in overflow {
            let mut placed = false;
            for offset in 1..=WINDOW_MINUTES {
                for candidate in [minute + offset, minute - offset] {
                    let slot = counts.entry(candidate).or_insert(0);
                    if *slot < max_per_minute {
                        *slot += 1;
                        *counts.get_mut(&minute).unwrap() -= 1;

                        let shift = Duration::minutes(candidate - minute);
                        let mut new_time = job.next_run_at + shift;
                        if new_time < now {
                            new_time = now;
                        }

                        if (new_time - job.next_run_at).num_seconds().abs()
                            > HYSTERESIS_THRESHOLD_SECS
                        {
                            moves.push(SmoothingMove {
                                job_id: job.id,
                                new_next_run_at: new_time,
                            });
                        }
                        placed = true;
                        break;
                    }
                }
                if placed {
                    break;
                }
            }
            // If no room was found within the window, the job stays put;
            // the tick's quota/collision gates still apply to it normally.
        }
    }

    moves
}
