// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The process-wide reader roster: the set of subscribed readers and, per
//! reader, the outstanding `info_update` acknowledgment count for each
//! SegmentInfo it has been asked to switch.
//!
//! Membership here is a relation, not ownership: a SegmentInfo tracks which
//! readers point at it, but the roster owns reader *identity* (subscribed or
//! not), matching the design note that SegmentInfo must not own reader
//! identity itself.

use std::collections::HashMap;

use tracing::warn;

use crate::{ReaderId, SegmentInfoKey};

/// mapping reader-id -> mapping SegmentInfoKey -> outstanding ack count.
/// Absence of a SegmentInfoKey entry means zero outstanding, per the spec's
/// data model.
#[derive(Default)]
pub struct ReaderRoster {
    readers: HashMap<ReaderId, HashMap<SegmentInfoKey, u32>>,
}

impl ReaderRoster {
    pub fn new() -> Self {
        ReaderRoster {
            readers: HashMap::new(),
        }
    }

    pub fn is_subscribed(&self, reader: &ReaderId) -> bool {
        self.readers.contains_key(reader)
    }

    /// `r` joins the roster with no outstanding acks.
    pub fn subscribe(&mut self, reader: ReaderId) {
        self.readers.entry(reader).or_default();
    }

    /// `r` leaves the roster entirely, regardless of outstanding counts
    /// (the caller is responsible for evicting it from every SegmentInfo it
    /// was tracked by).
    pub fn unsubscribe(&mut self, reader: &ReaderId) {
        self.readers.remove(reader);
    }

    /// Record that an `info_update` was sent to `reader` for `key`,
    /// incrementing its outstanding count.
    pub fn mark_sent(&mut self, reader: &ReaderId, key: &SegmentInfoKey) {
        let Some(per_segment) = self.readers.get_mut(reader) else {
            warn!(reader = %reader, "mark_sent called for an unsubscribed reader");
            return;
        };
        *per_segment.entry(key.clone()).or_insert(0) += 1;
    }

    /// Record an `info_update_ack` from `reader` for `key`. Decrements the
    /// outstanding count; if it reaches zero the key is removed and `true`
    /// is returned, meaning the caller should invoke `sync_reader` on the
    /// matching SegmentInfo. Returns an error if the reader or segment is
    /// unknown, so the caller can log-and-swallow per the `info_update_ack`
    /// error policy.
    pub fn mark_acked(&mut self, reader: &ReaderId, key: &SegmentInfoKey) -> Result<bool, ()> {
        let per_segment = self.readers.get_mut(reader).ok_or(())?;
        let count = per_segment.get_mut(key).ok_or(())?;
        *count = count.saturating_sub(1);
        if *count == 0 {
            per_segment.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Outstanding count for (reader, key); zero if the reader is unknown or
    /// has no outstanding acks for that key.
    pub fn outstanding(&self, reader: &ReaderId, key: &SegmentInfoKey) -> u32 {
        self.readers
            .get(reader)
            .and_then(|per_segment| per_segment.get(key))
            .copied()
            .unwrap_or(0)
    }

    pub fn reader_ids(&self) -> impl Iterator<Item = &ReaderId> {
        self.readers.keys()
    }
}
