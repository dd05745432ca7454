// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The manager event loop: a single-threaded cooperative orchestrator
//! multiplexing bus commands/notifications, configuration callbacks, and
//! builder completions.
//!
//! No handler blocks on I/O other than the multiplexer itself. Any handler
//! that needs to cause a build forwards the `BuilderCommand` the SegmentInfo
//! operation returned to the builder channel. Every externally invoked
//! callback is total: `dispatch_total` catches a `MemMgrError` and converts
//! it to either a bus answer or a logged-and-swallowed event, never letting
//! it escape as a panic.

use std::str::FromStr;
use std::sync::Arc;

use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, error, info, warn};

use crate::builder::{BuilderChannel, BuilderCommand, BuilderResponse, LoadOutcome};
use crate::bus::{
    Answer, Bus, InfoUpdate, InfoUpdateAck, LoadZoneCommand, ManagerEvent, MembershipEvent,
    ZoneUpdatedNotification, SEGMENT_READER_GROUP,
};
use crate::config::Config;
use crate::datasrc_info::DataSrcInfoRegistry;
use crate::error::MemMgrError;
use crate::reader_roster::ReaderRoster;
use crate::segment::{SegmentFactory, SegmentRole};
use crate::{ReaderId, RrClass, SegmentInfoKey};

/// Owns every piece of manager-thread-only state: the DataSrcInfo
/// generations, the reader roster, the builder channel handle, and the bus.
/// SegmentInfo, the DataSrcInfo list, and ReaderRoster are touched only from
/// this struct's methods, all of which run on the manager thread.
pub struct Manager {
    registry: DataSrcInfoRegistry,
    roster: ReaderRoster,
    builder_channel: Arc<BuilderChannel>,
    bus: Box<dyn Bus>,
    next_generation_id: u64,
    /// `None` unless the caller wired one up via
    /// [`Manager::with_segment_factory`]. Without it, a `ConfigUpdate` event
    /// is rejected with `MemMgrError::Config` rather than silently ignored,
    /// since there is no way to build the new generation's `Segment`s.
    segment_factory: Option<Box<dyn SegmentFactory>>,
}

impl Manager {
    pub fn new(bus: Box<dyn Bus>, builder_channel: Arc<BuilderChannel>) -> Self {
        Manager {
            registry: DataSrcInfoRegistry::new(),
            roster: ReaderRoster::new(),
            builder_channel,
            bus,
            next_generation_id: 1,
            segment_factory: None,
        }
    }

    /// As [`Manager::new`], additionally wiring a [`SegmentFactory`] so the
    /// manager can build and adopt new generations itself when a
    /// `ConfigUpdate` event arrives after startup, not only at the one-time
    /// startup call to [`Manager::adopt_generation`].
    pub fn with_segment_factory(
        bus: Box<dyn Bus>,
        builder_channel: Arc<BuilderChannel>,
        segment_factory: Box<dyn SegmentFactory>,
    ) -> Self {
        Manager {
            segment_factory: Some(segment_factory),
            ..Manager::new(bus, builder_channel)
        }
    }

    pub fn registry(&self) -> &DataSrcInfoRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DataSrcInfoRegistry {
        &mut self.registry
    }

    /// Apply a validated configuration: start a fresh generation with one
    /// (empty, not-yet-loaded) SegmentInfo per configured data source, then
    /// enqueue and start a `load` for every one of them. Construction of the
    /// `SegmentInfo`'s pair of segment handles is left to the caller, who
    /// has the concrete `Segment`/`ZoneLoader` implementations; this method
    /// takes the already-built `DataSrcInfo` to keep the manager ignorant of
    /// the actual mmap primitive.
    pub fn adopt_generation(
        &mut self,
        generation: crate::datasrc_info::DataSrcInfo,
    ) -> Vec<BuilderCommand> {
        let generation_id = generation.generation_id();
        self.registry.push_generation(generation);
        self.next_generation_id = generation_id + 1;

        // A reader already subscribed when this generation is adopted must
        // end up notified once the generation's segments are first built,
        // exactly as it would be notified for an existing SegmentInfo it
        // subscribes to mid-flight: add it to `readers` now (the segment
        // isn't loaded yet, so no `info_update` is due), and the first
        // `complete_update` will move it into `old_readers` and trigger the
        // usual SYNCHRONIZING notification.
        let subscribed: Vec<ReaderId> = self.roster.reader_ids().cloned().collect();

        let mut commands = Vec::new();
        if let Some(gen) = self.registry.current_generation_mut() {
            for (_, info) in gen.iter_mut() {
                for reader in &subscribed {
                    info.add_reader(reader.clone());
                }
                info.add_event(crate::segment_info::BuildEvent { zone_name: None });
                if let Some(cmd) = info.start_update() {
                    commands.push(cmd);
                }
            }
        }
        commands
    }

    pub fn next_generation_id(&self) -> u64 {
        self.next_generation_id
    }

    /// One step of the event loop: poll the bus and the builder wake pipe,
    /// and dispatch whatever is ready. Returns `false` when told to stop.
    pub fn step(&mut self, timeout_ms: i32) -> bool {
        let wake_fd = self.builder_channel.wake_fd();
        let bus_fd = self.bus.pollable_fd();

        let mut fds = Vec::new();
        if bus_fd >= 0 {
            fds.push(PollFd::new(bus_fd, PollFlags::POLLIN));
        }
        if wake_fd >= 0 {
            fds.push(PollFd::new(wake_fd, PollFlags::POLLIN));
        }

        if !fds.is_empty() {
            match poll(&mut fds, timeout_ms as nix::libc::c_int) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "poll failed");
                    return true;
                }
            }
        }

        for response in self.builder_channel.drain_responses() {
            self.handle_builder_response(response);
        }

        if let Some(event) = self.bus.next_event(0) {
            self.dispatch_total(event);
        }

        true
    }

    /// The total callback wrapper: every bus event passes through here so
    /// that no internal error escapes as a panic.
    fn dispatch_total(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::LoadZone(cmd) => {
                let answer = match self.handle_loadzone(cmd) {
                    Ok(()) => Answer::ok(),
                    Err(e) => Answer::error(e.to_string()),
                };
                self.bus.send_loadzone_answer(answer);
            }
            ManagerEvent::ZoneUpdated(notification) => {
                if let Err(e) = self.handle_zone_updated(notification) {
                    warn!(error = %e, "zone_updated handling reported an error");
                }
            }
            ManagerEvent::InfoUpdateAck(ack) => {
                if let Err(e) = self.handle_info_update_ack(ack) {
                    warn!(error = %e, "info_update_ack ignored");
                }
            }
            ManagerEvent::Membership(membership) => self.handle_membership(membership),
            ManagerEvent::ConfigUpdate(config) => {
                let answer = match self.handle_config_update(config) {
                    Ok(()) => Answer::ok(),
                    Err(e) => {
                        warn!(error = %e, "configuration update rejected, prior configuration retained");
                        Answer::error(e.to_string())
                    }
                };
                self.bus.send_config_answer(answer);
            }
            ManagerEvent::Unknown => {
                debug!("ignoring unknown bus event");
            }
        }
    }

    /// Validate `config`, then build and adopt a fresh generation from it.
    /// Validation runs strictly before any state is touched (§4.5's strong
    /// exception safety: either the new config is fully applied or nothing
    /// changes), so a rejected reconfiguration leaves the prior generation,
    /// its readers, and any in-flight builds completely untouched.
    fn handle_config_update(&mut self, config: Config) -> Result<(), MemMgrError> {
        config.validate()?;

        let factory = self.segment_factory.as_ref().ok_or_else(|| {
            MemMgrError::Config("no segment factory configured; cannot build a new generation".to_string())
        })?;

        let generation_id = self.next_generation_id;
        let generation = factory.build_generation(generation_id, &config);
        for builder_cmd in self.adopt_generation(generation) {
            self.builder_channel.send_command(builder_cmd);
        }
        info!(generation_id, "configuration update adopted");
        Ok(())
    }

    fn handle_loadzone(&mut self, cmd: LoadZoneCommand) -> Result<(), MemMgrError> {
        let rr_class = RrClass::from_str(&cmd.rr_class).map_err(MemMgrError::BadLoadZoneArgs)?;
        if cmd.datasource.is_empty() {
            return Err(MemMgrError::BadLoadZoneArgs("missing datasource".to_string()));
        }
        if cmd.origin.is_empty() {
            return Err(MemMgrError::BadLoadZoneArgs("missing origin".to_string()));
        }

        let generation_id = self
            .registry
            .current_generation_id()
            .ok_or(MemMgrError::NoDataSource)?;

        let generation = self
            .registry
            .current_generation_mut()
            .ok_or(MemMgrError::NoDataSource)?;
        let info = generation
            .get_mut(rr_class, &cmd.datasource)
            .ok_or(MemMgrError::NoDataSource)?;

        info.add_event(crate::segment_info::BuildEvent {
            zone_name: Some(cmd.origin),
        });
        if let Some(builder_cmd) = info.start_update() {
            self.builder_channel.send_command(builder_cmd);
        }
        debug!(generation_id, "loadzone accepted");
        Ok(())
    }

    fn handle_zone_updated(&mut self, notification: ZoneUpdatedNotification) -> Result<(), MemMgrError> {
        let rr_class = RrClass::from_str(&notification.rr_class).map_err(MemMgrError::BadLoadZoneArgs)?;

        let Some(generation) = self.registry.current_generation_mut() else {
            debug!("zone_updated received with no data source configured, ignoring (local segment case)");
            return Ok(());
        };

        let Some(info) = generation.get_mut(rr_class, &notification.datasource) else {
            debug!(datasource = %notification.datasource, "zone_updated for unknown segment, tolerated");
            return Ok(());
        };

        info.add_event(crate::segment_info::BuildEvent {
            zone_name: Some(notification.origin),
        });
        if let Some(builder_cmd) = info.start_update() {
            self.builder_channel.send_command(builder_cmd);
        }
        Ok(())
    }

    fn handle_info_update_ack(&mut self, ack: InfoUpdateAck) -> Result<(), MemMgrError> {
        let rr_class = RrClass::from_str(&ack.rr_class)
            .map_err(|_| MemMgrError::UnknownReaderOrSegment(ack.rr_class.clone()))?;
        let key = SegmentInfoKey {
            generation_id: ack.generation_id,
            rr_class,
            datasrc_name: ack.datasource.clone(),
        };

        if !self.roster.is_subscribed(&ack.reader) {
            return Err(MemMgrError::UnknownReaderOrSegment(ack.reader.clone()));
        }

        let now_zero = self
            .roster
            .mark_acked(&ack.reader, &key)
            .map_err(|_| MemMgrError::UnknownReaderOrSegment(format!("{key}")))?;

        if !now_zero {
            return Ok(());
        }

        let Some(info) = self.registry.find_segment_info_mut(&key) else {
            warn!(segment = %key, "ack drained roster count but SegmentInfo no longer exists");
            return Ok(());
        };

        if let Some(builder_cmd) = info.sync_reader(ack.reader) {
            self.builder_channel.send_command(builder_cmd);
        }
        Ok(())
    }

    fn handle_membership(&mut self, event: MembershipEvent) {
        match event {
            MembershipEvent::Subscribed { group, client } => {
                if group != SEGMENT_READER_GROUP {
                    return;
                }
                self.subscribe_reader(client);
            }
            MembershipEvent::Unsubscribed { group, client } => {
                if group != SEGMENT_READER_GROUP {
                    return;
                }
                self.unsubscribe_reader(&client);
            }
        }
    }

    fn subscribe_reader(&mut self, reader: ReaderId) {
        self.roster.subscribe(reader.clone());
        let mut to_notify = Vec::new();
        for info in self.registry.all_segments_mut() {
            if !info.add_reader(reader.clone()) {
                continue;
            }
            if let Some(params) = info.get_reset_param(SegmentRole::Reader) {
                to_notify.push((info.key().clone(), params));
            }
        }
        for (key, params) in to_notify {
            self.roster.mark_sent(&reader, &key);
            self.bus.send_info_update(InfoUpdate {
                rr_class: key.rr_class.to_string(),
                datasource: key.datasrc_name.clone(),
                segment_params: params,
                reader: reader.clone(),
                generation_id: key.generation_id,
            });
        }
        info!(reader = %reader, "reader subscribed");
    }

    fn unsubscribe_reader(&mut self, reader: &ReaderId) {
        self.roster.unsubscribe(reader);
        let mut commands = Vec::new();
        for info in self.registry.all_segments_mut() {
            if let Some(cmd) = info.remove_reader(reader) {
                commands.push(cmd);
            }
        }
        for cmd in commands {
            self.builder_channel.send_command(cmd);
        }
        info!(reader = %reader, "reader unsubscribed");
    }

    fn handle_builder_response(&mut self, response: BuilderResponse) {
        let BuilderResponse::LoadCompleted {
            key,
            zone_name,
            segment,
            outcome,
        } = response;

        if let LoadOutcome::LoaderFailed(reason) = &outcome {
            let err = MemMgrError::BuilderFailure(reason.clone());
            error!(segment = %key, zone = ?zone_name, error = %err, "builder reported a load failure; advancing state machine anyway");
        }

        let Some(info) = self.registry.find_segment_info_mut(&key) else {
            warn!(segment = %key, "builder completion for a SegmentInfo that no longer exists");
            return;
        };

        let readers_before = info.readers().clone();
        let follow_up = info.complete_update(segment);

        if info.state() == crate::segment_info::SegmentState::Synchronizing {
            for reader in &readers_before {
                if let Some(params) = info.get_reset_param(SegmentRole::Reader) {
                    self.roster.mark_sent(reader, &key);
                    self.bus.send_info_update(InfoUpdate {
                        rr_class: key.rr_class.to_string(),
                        datasource: key.datasrc_name.clone(),
                        segment_params: params,
                        reader: reader.clone(),
                        generation_id: key.generation_id,
                    });
                }
            }
        }

        if let Some(cmd) = follow_up {
            self.builder_channel.send_command(cmd);
        }
    }
}
