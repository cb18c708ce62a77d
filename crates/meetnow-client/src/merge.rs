//! Reconciliation of fetched pages with the local log.
//!
//! Messages are immutable and carry a unique server id, so reconciling is a
//! union by id followed by a sort on creation time. The result depends only
//! on the set of messages involved, which makes merges idempotent and lets
//! overlapping polls complete in any order.

use std::collections::HashSet;

use meetnow_shared::{Message, MessageId};

/// Merge `fetched` (any order) into `local` (ascending).
///
/// Duplicates keep their first occurrence, and fetched copies come first.
/// The output is sorted by `(created_at, id)`.
pub fn merge_messages(fetched: Vec<Message>, local: &[Message]) -> Vec<Message> {
    let mut seen: HashSet<MessageId> = HashSet::with_capacity(fetched.len() + local.len());
    let mut merged = Vec::with_capacity(fetched.len() + local.len());

    for message in fetched.into_iter().chain(local.iter().cloned()) {
        if seen.insert(message.id.clone()) {
            merged.push(message);
        }
    }

    merged.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

/// Id of the newest message in an ascending log, used as the fetch cursor.
pub fn newest_id(log: &[Message]) -> Option<&MessageId> {
    log.last().map(|m| &m.id)
}
