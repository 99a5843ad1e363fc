//! Pick one message per thread to draft a reply for.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::mail::types::ThreadedMessage;

/// Keep the latest message of each non-blank thread.
///
/// A known arrival time beats an unknown one; ties keep the candidate seen
/// first. Output is newest first with unknown times last.
pub fn select_latest_per_thread<T: ThreadedMessage>(candidates: Vec<T>) -> Vec<T> {
    let mut slot_by_thread: HashMap<String, usize> = HashMap::new();
    let mut picked: Vec<T> = Vec::new();

    for candidate in candidates {
        let thread_id = candidate.thread_id().trim();
        if thread_id.is_empty() {
            continue;
        }

        match slot_by_thread.get(thread_id) {
            None => {
                slot_by_thread.insert(thread_id.to_string(), picked.len());
                picked.push(candidate);
            }
            Some(&slot) => {
                if is_newer(candidate.received_at(), picked[slot].received_at()) {
                    picked[slot] = candidate;
                }
            }
        }
    }

    picked.sort_by(|a, b| newest_first(a.received_at(), b.received_at()));
    picked
}

fn is_newer(candidate: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c > k,
        (Some(_), None) => true,
        _ => false,
    }
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
