// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving a real `Manager` against a real builder
//! thread (spawned via `thread_manager::spawn_builder`) and a `LoopbackBus`,
//! exercising the reader hand-off protocol the way a bus transport and the
//! builder thread actually would, rather than calling manager internals
//! directly as the unit tests in `manager.rs` do.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::rstest;
use tempfile::tempdir;

use zone_memmgr::builder::BuilderChannel;
use zone_memmgr::bus::{
    InfoUpdate, InfoUpdateAck, LoadZoneCommand, LoopbackBus, LoopbackBusHandle, ManagerEvent,
    MembershipEvent, SEGMENT_READER_GROUP,
};
use zone_memmgr::config::{Config, DataSourceConfig};
use zone_memmgr::datasrc_info::DataSrcInfo;
use zone_memmgr::manager::Manager;
use zone_memmgr::segment::{
    FileMarkerSegment, FileMarkerSegmentFactory, MarkerFileLoader, Segment, SegmentRole, ZoneLoader,
};
use zone_memmgr::segment_info::{SegmentInfo, SegmentState};
use zone_memmgr::thread_manager::spawn_builder;
use zone_memmgr::{RrClass, SegmentInfoKey};

/// A `ZoneLoader` that always fails, for scenarios verifying the state
/// machine still advances on a builder-reported error instead of wedging in
/// UPDATING. `segment::test_support::AlwaysFailsLoader` plays the same role
/// inside the crate's own unit tests, but is `pub(crate)` and unreachable
/// from here.
struct FailingLoader;

impl ZoneLoader for FailingLoader {
    fn load(
        &self,
        _segment: &mut dyn Segment,
        _rr_class: RrClass,
        _datasrc_name: &str,
        _zone_name: Option<&str>,
    ) -> Result<(), String> {
        Err("synthetic loader failure".to_string())
    }
}

struct Harness {
    manager: Manager,
    bus: LoopbackBusHandle,
    builder_channel: Arc<BuilderChannel>,
    _builder: std::thread::JoinHandle<()>,
    mapped_file_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_loader(Arc::new(MarkerFileLoader))
    }

    fn with_loader(loader: Arc<dyn ZoneLoader>) -> Self {
        let bus = LoopbackBus::new();
        let bus_handle = bus.handle();
        let builder_channel = BuilderChannel::new().expect("pipe creation should not fail in tests");
        let (builder, _lifecycle) = spawn_builder(builder_channel.clone(), loader);
        let manager = Manager::with_segment_factory(
            Box::new(bus),
            builder_channel.clone(),
            Box::new(FileMarkerSegmentFactory),
        );
        Harness {
            manager,
            bus: bus_handle,
            builder_channel,
            _builder: builder,
            mapped_file_dir: tempdir().expect("tempdir should not fail"),
        }
    }

    fn segment_paths(&self, rr_class: RrClass, datasrc: &str) -> (PathBuf, PathBuf) {
        let a = self.mapped_file_dir.path().join(format!("{rr_class}.{datasrc}.a"));
        let b = self.mapped_file_dir.path().join(format!("{rr_class}.{datasrc}.b"));
        (a, b)
    }

    fn one_segment_generation(&self, generation_id: u64, rr_class: RrClass, datasrc: &str) -> DataSrcInfo {
        let (a, b) = self.segment_paths(rr_class, datasrc);
        let key = SegmentInfoKey {
            generation_id,
            rr_class,
            datasrc_name: datasrc.to_string(),
        };
        let mut generation = DataSrcInfo::new(generation_id);
        generation.insert(
            rr_class,
            datasrc.to_string(),
            SegmentInfo::new(key, Box::new(FileMarkerSegment::new(a)), Box::new(FileMarkerSegment::new(b))),
        );
        generation
    }

    fn adopt(&mut self, generation: DataSrcInfo) {
        for command in self.manager.adopt_generation(generation) {
            self.builder_channel.send_command(command);
        }
    }

    fn subscribe(&mut self, reader: &str) {
        self.bus.push_event(ManagerEvent::Membership(MembershipEvent::Subscribed {
            group: SEGMENT_READER_GROUP.to_string(),
            client: reader.to_string(),
        }));
        self.pump();
    }

    fn unsubscribe(&mut self, reader: &str) {
        self.bus.push_event(ManagerEvent::Membership(MembershipEvent::Unsubscribed {
            group: SEGMENT_READER_GROUP.to_string(),
            client: reader.to_string(),
        }));
        self.pump();
    }

    fn loadzone(&mut self, rr_class: RrClass, datasrc: &str, origin: &str) {
        self.bus.push_event(ManagerEvent::LoadZone(LoadZoneCommand {
            rr_class: rr_class.to_string(),
            datasource: datasrc.to_string(),
            origin: origin.to_string(),
        }));
        self.pump();
    }

    fn ack(&mut self, reader: &str, rr_class: RrClass, datasrc: &str, generation_id: u64) {
        self.bus.push_event(ManagerEvent::InfoUpdateAck(InfoUpdateAck {
            rr_class: rr_class.to_string(),
            datasource: datasrc.to_string(),
            reader: reader.to_string(),
            generation_id,
        }));
        self.pump();
    }

    /// Acks the most recent `info_update` actually sent to `reader`, the way
    /// a real reader would: it copies `generation_id` out of the message it
    /// received rather than a value the test already knows, so a bug where
    /// `InfoUpdate` and `InfoUpdateAck` disagree on that field would surface
    /// here instead of being hidden by [`Harness::ack`]'s hardcoded literal.
    fn ack_for(&mut self, reader: &str, update: &InfoUpdate) {
        self.ack(reader, update.rr_class.parse().unwrap(), &update.datasource, update.generation_id);
    }

    fn config_update(&mut self, config: Config) {
        self.bus.push_event(ManagerEvent::ConfigUpdate(config));
        self.pump();
    }

    /// Drive `Manager::step` until the builder has reported everything it
    /// currently has in flight. The builder runs on a real OS thread, so this
    /// polls with a short timeout rather than assuming synchronous delivery.
    fn pump(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            self.manager.step(10);
            if Instant::now() >= deadline {
                break;
            }
            // Give the builder thread a chance to run and wake the pipe if
            // nothing is immediately ready.
            std::thread::sleep(Duration::from_millis(5));
            if self.all_segments_settled() {
                break;
            }
        }
    }

    /// True once every tracked segment has either returned to READY or is
    /// waiting on a reader ack (SYNCHRONIZING) -- the two states a build
    /// dispatched by the builder thread can be expected to reach without
    /// further external stimulus.
    fn all_segments_settled(&self) -> bool {
        self.manager
            .registry()
            .generations()
            .iter()
            .flat_map(|g| g.iter())
            .all(|(_, info)| info.is_idle() || info.state() == SegmentState::Synchronizing)
    }
}

#[test]
fn cold_configuration_with_no_readers_builds_to_ready_silently() {
    let mut harness = Harness::new();
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();

    assert!(harness.bus.sent_updates().is_empty());
    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(info.is_idle());
    assert!(info.get_reset_param(SegmentRole::Reader).is_some());
}

#[test]
fn reader_subscribed_before_any_configuration_is_notified_on_first_build() {
    let mut harness = Harness::new();
    harness.subscribe("r1");

    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();

    let updates = harness.bus.sent_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].reader, "r1");

    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert_eq!(info.state(), SegmentState::Synchronizing);
}

#[test]
fn reader_acks_and_segment_returns_to_ready() {
    let mut harness = Harness::new();
    harness.subscribe("r1");
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();
    let updates = harness.bus.sent_updates();
    assert_eq!(updates.len(), 1);

    let update = updates[0].clone();
    harness.ack_for("r1", &update);

    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(info.is_idle());
    assert!(info.readers().contains("r1"));
    assert!(info.old_readers().is_empty());
}

#[test]
fn unsubscribe_of_the_sole_lagging_reader_advances_without_an_ack() {
    let mut harness = Harness::new();
    harness.subscribe("r1");
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();
    assert_eq!(
        harness
            .manager
            .registry()
            .current_generation()
            .unwrap()
            .get(RrClass::In, "mem")
            .unwrap()
            .state(),
        SegmentState::Synchronizing
    );

    harness.unsubscribe("r1");

    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(info.is_idle());
}

#[test]
fn loadzone_after_ready_runs_a_fresh_build_and_resynchronizes_readers() {
    let mut harness = Harness::new();
    harness.subscribe("r1");
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();
    let first_update = harness.bus.sent_updates()[0].clone();
    harness.ack_for("r1", &first_update);
    assert_eq!(harness.bus.sent_updates().len(), 1);

    harness.loadzone(RrClass::In, "mem", "example.com");

    let updates = harness.bus.sent_updates();
    assert_eq!(updates.len(), 2, "r1 should be resynchronized by the second build");
    assert_eq!(updates[1].reader, "r1");

    let answers = harness.bus.sent_answers();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].code, 0);
}

#[test]
fn ack_for_a_superseded_generation_is_still_resolved_correctly() {
    let mut harness = Harness::new();
    harness.subscribe("r1");
    let gen1 = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(gen1);
    harness.pump();
    assert_eq!(harness.bus.sent_updates().len(), 1);

    // A second generation is adopted while r1 is still lagging on gen 1.
    let gen2 = harness.one_segment_generation(2, RrClass::Ch, "other");
    harness.adopt(gen2);
    harness.pump();

    // r1's ack names generation 1, which is no longer `current_generation`.
    harness.ack("r1", RrClass::In, "mem", 1);

    let gen1_info = harness
        .manager
        .registry()
        .generations()
        .iter()
        .find(|g| g.generation_id() == 1)
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(gen1_info.is_idle());
    assert!(gen1_info.old_readers().is_empty());
}

#[rstest]
#[case::succeeds(true, true)]
#[case::fails(false, false)]
fn builder_completion_always_returns_the_segment_to_ready(
    #[case] loader_succeeds: bool,
    #[case] expect_reset_param: bool,
) {
    let loader: Arc<dyn ZoneLoader> = if loader_succeeds {
        Arc::new(MarkerFileLoader)
    } else {
        Arc::new(FailingLoader)
    };
    let mut harness = Harness::with_loader(loader);
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();

    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(info.is_idle(), "a loader failure must not wedge the state machine in UPDATING");
    assert_eq!(info.get_reset_param(SegmentRole::Reader).is_some(), expect_reset_param);
}

#[test]
fn config_update_with_a_valid_config_adopts_a_new_generation_and_answers_positively() {
    let mut harness = Harness::new();
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();

    let next_dir = tempdir().expect("tempdir should not fail");
    let config = Config {
        mapped_file_dir: next_dir.path().to_path_buf(),
        data_sources: vec![DataSourceConfig { rr_class: RrClass::In, name: "mem".to_string() }],
    };
    harness.config_update(config);

    let answers = harness.bus.sent_answers();
    assert_eq!(answers.len(), 0, "a config answer is distinct from a loadzone answer");
    let config_answers = harness.bus.sent_config_answers();
    assert_eq!(config_answers.len(), 1);
    assert_eq!(config_answers[0].code, 0);

    assert_eq!(harness.manager.next_generation_id(), 3);
    let info = harness
        .manager
        .registry()
        .generations()
        .iter()
        .find(|g| g.generation_id() == 2)
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert!(info.is_idle(), "the new generation's build should run to completion");
    assert!(info.get_reset_param(SegmentRole::Reader).is_some());
}

#[test]
fn config_update_with_an_unwritable_dir_is_rejected_and_prior_generation_survives() {
    let mut harness = Harness::new();
    let generation = harness.one_segment_generation(1, RrClass::In, "mem");
    harness.adopt(generation);
    harness.pump();

    let config = Config {
        mapped_file_dir: PathBuf::from("/does/not/exist/for-sure"),
        data_sources: vec![DataSourceConfig { rr_class: RrClass::In, name: "mem".to_string() }],
    };
    harness.config_update(config);

    let config_answers = harness.bus.sent_config_answers();
    assert_eq!(config_answers.len(), 1);
    assert_eq!(config_answers[0].code, 1);

    // The prior generation is untouched: still generation 1, still READY.
    assert_eq!(harness.manager.next_generation_id(), 2);
    let info = harness
        .manager
        .registry()
        .current_generation()
        .unwrap()
        .get(RrClass::In, "mem")
        .unwrap();
    assert_eq!(info.key().generation_id, 1);
    assert!(info.is_idle());
}
