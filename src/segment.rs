// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The Segment and ZoneLoader trait boundaries.
//!
//! The actual memory-mapping primitive and the DNS zone loader are external
//! collaborators (see the crate's module docs). This core only ever holds a
//! `Box<dyn Segment>` or generic `S: Segment`, the same shape
//! `clock-bound-shm` uses for `ShmWrite` in `ShmUpdater<W: ShmWrite>`: the
//! concrete byte layout of the segment is none of this core's business.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::datasrc_info::DataSrcInfo;
use crate::segment_info::SegmentInfo;
use crate::{RrClass, SegmentInfoKey};

/// Which of a SegmentInfo's two segments a caller is asking about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentRole {
    Reader,
    Writer,
}

/// How a reset parameter's underlying file should be attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentMode {
    ReadOnly,
    ReadWrite,
}

/// The opaque, serializable description a reader needs to attach to a
/// segment: sufficient to identify it, nothing about its internal layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetParam {
    pub file_path: PathBuf,
    pub mode: SegmentMode,
}

/// An abstract handle to a region of memory holding one generation of loaded
/// zone data.
///
/// Implementations are provided by the out-of-scope mmap collaborator; this
/// crate never inspects the bytes a Segment holds, only whether it has been
/// loaded at least once (via [`Segment::reset_param`]).
pub trait Segment: Send {
    /// The attach parameters for this segment, or `None` if it has never
    /// been loaded (the "first load" case from `SegmentInfo::get_reset_param`).
    fn reset_param(&self) -> Option<ResetParam>;

    /// Downcast support for zone loader test doubles that need to mutate a
    /// concrete segment type behind the `&mut dyn Segment` the builder hands
    /// them.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// The external zone loader collaborator. Invoked by the builder thread
/// against a writable Segment.
///
/// A `zone_name` of `None` means "load all zones defined for this data
/// source". Errors are returned, not panicked: a loader failure still drives
/// a synthetic completion (see `builder::run`), it must never abort the
/// builder thread.
#[cfg_attr(test, mockall::automock)]
pub trait ZoneLoader: Send + Sync {
    fn load(
        &self,
        segment: &mut dyn Segment,
        rr_class: RrClass,
        datasrc_name: &str,
        zone_name: Option<&str>,
    ) -> Result<(), String>;
}

/// A minimal placeholder `Segment` backed by a marker file on disk: its
/// existence is the only state tracked. Stands in for the out-of-scope mmap
/// primitive so the standalone binary has something concrete to hand the
/// builder until a real shared-memory segment implementation is wired in,
/// the same role `StdioBus` plays for the bus transport.
pub struct FileMarkerSegment {
    path: PathBuf,
}

impl FileMarkerSegment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileMarkerSegment { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Segment for FileMarkerSegment {
    fn reset_param(&self) -> Option<ResetParam> {
        if self.path.exists() {
            Some(ResetParam {
                file_path: self.path.clone(),
                mode: SegmentMode::ReadOnly,
            })
        } else {
            None
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// A placeholder `ZoneLoader` that creates an empty marker file rather than
/// parsing real zone data, standing in for the out-of-scope DNS wire parser
/// and zone data structures until a real loader is wired in.
pub struct MarkerFileLoader;

impl ZoneLoader for MarkerFileLoader {
    fn load(
        &self,
        segment: &mut dyn Segment,
        _rr_class: RrClass,
        _datasrc_name: &str,
        _zone_name: Option<&str>,
    ) -> Result<(), String> {
        if let Some(marker) = segment.as_any_mut().downcast_mut::<FileMarkerSegment>() {
            std::fs::write(marker.path(), b"").map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Builds a generation's worth of `SegmentInfo`s from a validated `Config`.
///
/// Abstracts the concrete `Segment` wiring out of `Manager`, which must stay
/// ignorant of the real mmap primitive: `Manager` is handed a
/// `Box<dyn SegmentFactory>` at construction and calls it both for the
/// initial startup generation and for every later reconfiguration, rather
/// than duplicating per-data-source segment construction in the manager
/// event loop.
pub trait SegmentFactory: Send {
    fn build_generation(&self, generation_id: u64, config: &Config) -> DataSrcInfo;
}

/// The standalone binary's placeholder `SegmentFactory`, wiring each
/// configured data source up to a pair of `FileMarkerSegment`s under
/// `config.mapped_file_dir`, the same role `FileMarkerSegment` itself plays
/// until a real mmap primitive is wired in.
pub struct FileMarkerSegmentFactory;

impl SegmentFactory for FileMarkerSegmentFactory {
    fn build_generation(&self, generation_id: u64, config: &Config) -> DataSrcInfo {
        let mut generation = DataSrcInfo::new(generation_id);
        for ds in &config.data_sources {
            let key = SegmentInfoKey {
                generation_id,
                rr_class: ds.rr_class,
                datasrc_name: ds.name.clone(),
            };
            let a = config.mapped_file_dir.join(format!("{}.{}.a", ds.rr_class, ds.name));
            let b = config.mapped_file_dir.join(format!("{}.{}.b", ds.rr_class, ds.name));
            generation.insert(
                ds.rr_class,
                ds.name.clone(),
                SegmentInfo::new(key, Box::new(FileMarkerSegment::new(a)), Box::new(FileMarkerSegment::new(b))),
            );
        }
        generation
    }
}
