// src/scheduler/table.rs
//! Job table and the due-job decision, kept free of I/O so it can be driven
//! with a synthetic clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{JobFn, JobSpec, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    Run,
    /// Previous invocation still in flight; firing dropped.
    Coalesced,
    /// Later than the misfire grace; firing skipped.
    Missed,
}

pub(crate) struct DueJob {
    pub id: String,
    pub due: Due,
    pub scheduled_for: DateTime<Utc>,
    pub callback: JobFn,
    pub running: Arc<AtomicBool>,
}

pub(crate) struct JobEntry {
    pub spec: JobSpec,
    pub next_fire: Option<DateTime<Utc>>,
    pub paused: bool,
    pub running: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct JobTable {
    jobs: BTreeMap<String, JobEntry>,
    /// In-flight flags by job id. Outlives `remove` so a re-registered id
    /// still sees an invocation started under its previous registration.
    flags: HashMap<String, Arc<AtomicBool>>,
}

impl JobTable {
    /// Insert or replace by id. The in-flight flag is shared per id, so a
    /// running invocation still blocks the new trigger.
    pub fn upsert(&mut self, spec: JobSpec, now: DateTime<Utc>) -> bool {
        let next_fire = spec.trigger.next_after(now);
        match self.jobs.get_mut(&spec.id) {
            Some(entry) => {
                entry.spec = spec;
                entry.next_fire = next_fire;
                true
            }
            None => {
                let running = self
                    .flags
                    .entry(spec.id.clone())
                    .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                    .clone();
                self.jobs.insert(
                    spec.id.clone(),
                    JobEntry {
                        spec,
                        next_fire,
                        paused: false,
                        running,
                    },
                );
                false
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.jobs.remove(id).is_some()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut JobEntry> {
        self.jobs.get_mut(id)
    }

    /// Drop every job. Only called once in-flight invocations have drained.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.flags.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobEntry> {
        self.jobs.values()
    }

    /// Recompute every next fire time from `now`, e.g. after a restart.
    pub fn reschedule_all(&mut self, now: DateTime<Utc>) {
        for entry in self.jobs.values_mut() {
            entry.next_fire = entry.spec.trigger.next_after(now);
        }
    }

    /// Earliest pending fire time among active jobs.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|e| !e.paused)
            .filter_map(|e| e.next_fire)
            .min()
    }

    /// Decide what happens to every job due at `now` and advance its next fire time.
    pub fn collect_due(&mut self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut out = Vec::new();
        for (id, entry) in self.jobs.iter_mut() {
            if entry.paused {
                continue;
            }
            let Some(first_due) = entry.next_fire.filter(|t| *t <= now) else {
                continue;
            };

            let (scheduled_for, next) = if entry.spec.coalesce {
                let (latest, next) = latest_due(&entry.spec.trigger, first_due, now);
                (latest, next)
            } else {
                (first_due, entry.spec.trigger.next_after(first_due))
            };
            entry.next_fire = next;

            let late = now.signed_duration_since(scheduled_for);
            let grace = chrono::Duration::from_std(entry.spec.misfire_grace)
                .unwrap_or(chrono::Duration::MAX);
            let due = if late > grace {
                Due::Missed
            } else if entry.running.load(Ordering::Acquire) {
                Due::Coalesced
            } else {
                Due::Run
            };

            out.push(DueJob {
                id: id.clone(),
                due,
                scheduled_for,
                callback: entry.spec.callback.clone(),
                running: entry.running.clone(),
            });
        }
        out
    }
}

/// Most recent fire time `<= now` starting from `first`, and the one after it.
fn latest_due(
    trigger: &Trigger,
    first: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    if let Trigger::Interval(every) = trigger {
        if let (Ok(step), Ok(behind)) = (
            chrono::Duration::from_std(*every),
            now.signed_duration_since(first).to_std(),
        ) {
            let skipped = (behind.as_nanos() / every.as_nanos().max(1)) as i32;
            if let Some(latest) = step
                .checked_mul(skipped)
                .and_then(|d| first.checked_add_signed(d))
            {
                return (latest, latest.checked_add_signed(step));
            }
        }
    }

    let mut latest = first;
    let mut next = trigger.next_after(first);
    while let Some(t) = next.filter(|t| *t <= now) {
        latest = t;
        next = trigger.next_after(t);
    }
    (latest, next)
}
