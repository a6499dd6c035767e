//! One reconciliation cycle: prune, cancel what vanished upstream, insert what
//! is new and overwrite what was rescheduled, all inside one transaction.
//!
//! A fresh record whose scheduled time equals the stored one is skipped
//! outright, so edits to its name, provider, location or image are not
//! persisted until the launch is rescheduled.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::{self, Store, StoreError};
use crate::models::{Launch, ReconcileSummary};

/// Applies `fresh` to the store as of `now`. On error nothing is committed.
pub fn reconcile(
    store: &mut Store,
    fresh: &[Launch],
    now: DateTime<Utc>,
) -> Result<ReconcileSummary, StoreError> {
    let tx = store.transaction()?;
    let mut summary = ReconcileSummary {
        pruned: db::prune(&tx, now)?,
        ..ReconcileSummary::default()
    };

    let existing = db::load_key_set(&tx)?;
    let fresh_ids: HashSet<&str> = fresh.iter().map(|launch| launch.id.as_str()).collect();

    for id in existing.keys().filter(|id| !fresh_ids.contains(id.as_str())) {
        db::mark_cancelled(&tx, id, now)?;
        summary.cancelled += 1;
    }

    for launch in fresh {
        if launch.id.trim().is_empty() {
            return Err(StoreError::MalformedInput(format!(
                "launch {:?} has an empty id",
                launch.name
            )));
        }

        match existing.get(&launch.id) {
            // never stored and already flown
            None if launch.scheduled_time < now => {
                summary.stale += 1;
            }
            None => {
                db::insert_launch(&tx, launch, now)?;
                summary.inserted += 1;
            }
            Some(stored) if *stored == launch.scheduled_time_stored() => {
                summary.unchanged += 1;
            }
            Some(stored) => {
                debug!(id = %launch.id, from = %stored, to = %launch.scheduled_time, "launch rescheduled");
                db::update_launch(&tx, launch, now)?;
                summary.updated += 1;
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}
