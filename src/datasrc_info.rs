// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! DataSrcInfo registry: a generation-tagged snapshot of configured data
//! sources, mapping (RR-class, data-source-name) to its SegmentInfo.
//!
//! Generations are append-only; only the newest accepts new events in the
//! current design, but older generations are retained so readers still
//! attached to them (e.g. lagging across a reconfiguration) remain valid.
//! Garbage-collecting a generation once none of its SegmentInfos have any
//! reader is left as a future extension, as the design this core is modeled
//! on leaves it: `TODO(gc): drop a generation once every SegmentInfo within
//! it has no readers and no pending events.`

use std::collections::HashMap;

use tracing::debug;

use crate::segment_info::SegmentInfo;
use crate::{RrClass, SegmentInfoKey};

/// One generation's worth of configured data sources.
pub struct DataSrcInfo {
    generation_id: u64,
    segments: HashMap<(RrClass, String), SegmentInfo>,
}

impl DataSrcInfo {
    pub fn new(generation_id: u64) -> Self {
        DataSrcInfo {
            generation_id,
            segments: HashMap::new(),
        }
    }

    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }

    pub fn insert(&mut self, rr_class: RrClass, name: String, info: SegmentInfo) {
        self.segments.insert((rr_class, name), info);
    }

    pub fn get_mut(&mut self, rr_class: RrClass, name: &str) -> Option<&mut SegmentInfo> {
        self.segments.get_mut(&(rr_class, name.to_string()))
    }

    pub fn get(&self, rr_class: RrClass, name: &str) -> Option<&SegmentInfo> {
        self.segments.get(&(rr_class, name.to_string()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&(RrClass, String), &mut SegmentInfo)> {
        self.segments.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(RrClass, String), &SegmentInfo)> {
        self.segments.iter()
    }
}

/// The append-only list of generations. Only the newest accepts new
/// `loadzone`/`zone_updated` events; acks and reader subscription/unsubscribe
/// events are resolved by identity across every retained generation (see the
/// design note on acks targeting an older generation).
#[derive(Default)]
pub struct DataSrcInfoRegistry {
    generations: Vec<DataSrcInfo>,
}

impl DataSrcInfoRegistry {
    pub fn new() -> Self {
        DataSrcInfoRegistry {
            generations: Vec::new(),
        }
    }

    /// Append a new generation, becoming the only one that accepts new
    /// events going forward.
    pub fn push_generation(&mut self, generation: DataSrcInfo) {
        debug!(generation_id = generation.generation_id(), "new data-source generation registered");
        self.generations.push(generation);
    }

    pub fn current_generation(&self) -> Option<&DataSrcInfo> {
        self.generations.last()
    }

    pub fn current_generation_mut(&mut self) -> Option<&mut DataSrcInfo> {
        self.generations.last_mut()
    }

    pub fn current_generation_id(&self) -> Option<u64> {
        self.generations.last().map(DataSrcInfo::generation_id)
    }

    /// Look up a SegmentInfo by full key identity across every retained
    /// generation, not only the newest one. Used to resolve `info_update_ack`
    /// messages that may target a SegmentInfo from a generation a slow
    /// reader is still lagging on.
    pub fn find_segment_info_mut(&mut self, key: &SegmentInfoKey) -> Option<&mut SegmentInfo> {
        let generation = self
            .generations
            .iter_mut()
            .find(|g| g.generation_id == key.generation_id)?;
        generation.get_mut(key.rr_class, &key.datasrc_name)
    }

    /// Every SegmentInfo across every generation, mutable, for broadcasting
    /// membership events (subscribe/unsubscribe) to all of them.
    pub fn all_segments_mut(&mut self) -> impl Iterator<Item = &mut SegmentInfo> {
        self.generations.iter_mut().flat_map(|g| g.segments.values_mut())
    }

    pub fn generations(&self) -> &[DataSrcInfo] {
        &self.generations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::test_support::FakeSegment;

    fn make_info(generation_id: u64) -> SegmentInfo {
        SegmentInfo::new(
            SegmentInfoKey {
                generation_id,
                rr_class: RrClass::In,
                datasrc_name: "mem".to_string(),
            },
            Box::new(FakeSegment::new("/tmp/a")),
            Box::new(FakeSegment::new("/tmp/b")),
        )
    }

    #[test]
    fn find_segment_info_resolves_across_older_generations() {
        let mut registry = DataSrcInfoRegistry::new();
        let mut gen1 = DataSrcInfo::new(1);
        gen1.insert(RrClass::In, "mem".to_string(), make_info(1));
        registry.push_generation(gen1);

        let gen2 = DataSrcInfo::new(2);
        registry.push_generation(gen2);

        let key = SegmentInfoKey {
            generation_id: 1,
            rr_class: RrClass::In,
            datasrc_name: "mem".to_string(),
        };
        assert!(registry.find_segment_info_mut(&key).is_some());
        assert_eq!(registry.current_generation_id(), Some(2));
    }

    #[test]
    fn find_segment_info_returns_none_for_unknown_key() {
        let mut registry = DataSrcInfoRegistry::new();
        registry.push_generation(DataSrcInfo::new(1));

        let key = SegmentInfoKey {
            generation_id: 99,
            rr_class: RrClass::In,
            datasrc_name: "mem".to_string(),
        };
        assert!(registry.find_segment_info_mut(&key).is_none());
    }
}
