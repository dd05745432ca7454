// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The SegmentInfo state machine: per (data-source, RR-class) pair, tracks
//! which of two segments is readable vs. writable, which readers point at
//! which, and the queue of pending build events.
//!
//! Unlike `clock_state_fsm.rs`'s phantom-typed FSM (a good fit for a
//! push-only status value), this state machine's transitions are driven by
//! operations that return a command for the *caller* to forward to the
//! builder — a shape phantom typestate doesn't express cleanly. A plain enum
//! plus `Option<BuilderCommand>` return values matches the spec's operations
//! directly.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::builder::BuilderCommand;
use crate::segment::{Segment, SegmentRole, ResetParam};
use crate::{ReaderId, SegmentInfoKey, ZoneName};

/// The four states a SegmentInfo can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    Ready,
    Updating,
    Synchronizing,
    Copying,
}

/// One pending build event: "run a load of this zone (or every zone, if
/// `zone_name` is `None`) against the writable segment."
///
/// Events are not coalesced: two `load`s of the same zone enqueued twice run
/// twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildEvent {
    pub zone_name: Option<ZoneName>,
}

/// Per (data-source, RR-class) segment pair and its reader bookkeeping.
pub struct SegmentInfo {
    key: SegmentInfoKey,
    state: SegmentState,
    /// `None` only while checked out to the builder thread for an in-flight
    /// build (see `dispatch_head`); always `Some` otherwise.
    writable_segment: Option<Box<dyn Segment>>,
    /// Always `Some` once constructed; a segment that has never been loaded
    /// simply reports `reset_param() == None`.
    readable_segment: Option<Box<dyn Segment>>,
    events: VecDeque<BuildEvent>,
    readers: HashSet<ReaderId>,
    old_readers: HashSet<ReaderId>,
}

impl SegmentInfo {
    /// Construct a fresh SegmentInfo in state READY, given the pair of
    /// segment handles it owns. Neither segment need have been loaded yet.
    pub fn new(
        key: SegmentInfoKey,
        writable_segment: Box<dyn Segment>,
        readable_segment: Box<dyn Segment>,
    ) -> Self {
        SegmentInfo {
            key,
            state: SegmentState::Ready,
            writable_segment: Some(writable_segment),
            readable_segment: Some(readable_segment),
            events: VecDeque::new(),
            readers: HashSet::new(),
            old_readers: HashSet::new(),
        }
    }

    pub fn key(&self) -> &SegmentInfoKey {
        &self.key
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SegmentState::Ready
    }

    /// Number of (readers, old_readers) currently tracked, for logging.
    pub fn reader_counts(&self) -> (usize, usize) {
        (self.readers.len(), self.old_readers.len())
    }

    pub fn readers(&self) -> &HashSet<ReaderId> {
        &self.readers
    }

    pub fn old_readers(&self) -> &HashSet<ReaderId> {
        &self.old_readers
    }

    /// `r` joins `readers`. Precondition: `r` is not already tracked by this
    /// SegmentInfo. Returns `false` (and logs a warning) if the precondition
    /// is violated instead of panicking, since roster bookkeeping bugs
    /// should not bring the manager down.
    pub fn add_reader(&mut self, r: ReaderId) -> bool {
        if self.readers.contains(&r) || self.old_readers.contains(&r) {
            warn!(reader = %r, segment = %self.key, "add_reader called for a reader already tracked");
            return false;
        }
        self.readers.insert(r);
        true
    }

    /// Removes `r` from whichever set it is tracked in. If removing it from
    /// `old_readers` empties that set while SYNCHRONIZING, advances to
    /// COPYING and returns the follow-up build command if one is due.
    pub fn remove_reader(&mut self, r: &ReaderId) -> Option<BuilderCommand> {
        if self.readers.remove(r) {
            return None;
        }
        if self.old_readers.remove(r)
            && self.old_readers.is_empty()
            && self.state == SegmentState::Synchronizing
        {
            self.state = SegmentState::Copying;
            return self.advance_copying();
        }
        None
    }

    /// Appends a build event. Does not by itself start work.
    pub fn add_event(&mut self, event: BuildEvent) {
        self.events.push_back(event);
    }

    /// If READY and events are pending, transitions to UPDATING and returns
    /// the head event as a builder command. Otherwise returns `None`.
    pub fn start_update(&mut self) -> Option<BuilderCommand> {
        if self.state == SegmentState::Ready && !self.events.is_empty() {
            self.dispatch_head()
        } else {
            None
        }
    }

    /// Invoked on builder completion: swaps the segment roles, moves current
    /// readers en masse into `old_readers`, pops the completed event, and
    /// either starts the copy-phase build or returns to READY.
    pub fn complete_update(&mut self, built_segment: Box<dyn Segment>) -> Option<BuilderCommand> {
        debug_assert_eq!(self.state, SegmentState::Updating);

        let previous_readable = self
            .readable_segment
            .take()
            .expect("readable segment is always present outside of an in-flight swap");
        self.readable_segment = Some(built_segment);
        self.writable_segment = Some(previous_readable);

        self.old_readers = std::mem::take(&mut self.readers);
        self.events.pop_front();

        if self.old_readers.is_empty() {
            self.state = SegmentState::Copying;
            self.advance_copying()
        } else {
            self.state = SegmentState::Synchronizing;
            debug!(segment = %self.key, old_readers = self.old_readers.len(), "build complete, synchronizing readers");
            None
        }
    }

    /// Invoked when a reader acks its switch. Moves it from `old_readers` to
    /// `readers`; if that drains `old_readers` while SYNCHRONIZING, advances
    /// to COPYING as `remove_reader` does.
    pub fn sync_reader(&mut self, r: ReaderId) -> Option<BuilderCommand> {
        if self.old_readers.remove(&r) {
            self.readers.insert(r);
            if self.old_readers.is_empty() && self.state == SegmentState::Synchronizing {
                self.state = SegmentState::Copying;
                return self.advance_copying();
            }
        } else {
            warn!(reader = %r, segment = %self.key, "sync_reader called for a reader not in old_readers");
        }
        None
    }

    /// The opaque attach parameters for the requested role's segment, or
    /// `None` if that segment has not yet been initialized (or is currently
    /// checked out to the builder).
    pub fn get_reset_param(&self, role: SegmentRole) -> Option<ResetParam> {
        match role {
            SegmentRole::Reader => self.readable_segment.as_deref().and_then(Segment::reset_param),
            SegmentRole::Writer => self.writable_segment.as_deref().and_then(Segment::reset_param),
        }
    }

    /// While COPYING, either dispatches the next queued event against the
    /// now-writable segment, or, if none remain, returns to READY.
    fn advance_copying(&mut self) -> Option<BuilderCommand> {
        debug_assert_eq!(self.state, SegmentState::Copying);
        if self.events.is_empty() {
            self.state = SegmentState::Ready;
            None
        } else {
            self.dispatch_head()
        }
    }

    /// Takes the writable segment and the head event, builds a
    /// `BuilderCommand::Load`, and transitions to UPDATING. Shared by
    /// `start_update` (from READY) and `advance_copying` (from COPYING):
    /// both cases run the next queued event against the writable segment.
    fn dispatch_head(&mut self) -> Option<BuilderCommand> {
        let event = self.events.front()?.clone();
        let segment = self
            .writable_segment
            .take()
            .expect("writable segment must be present to start a build");
        self.state = SegmentState::Updating;
        Some(BuilderCommand::Load {
            key: self.key.clone(),
            zone_name: event.zone_name,
            segment,
        })
    }
}
