// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! zone-memmgr
//!
//! In-memory zone data lifecycle manager. Coordinates loading DNS zone data
//! from configured data sources into shared memory segments and hands those
//! segments safely between one writer thread (the builder) and many
//! out-of-process reader processes.
//!
//! The DNS wire parser, RRset/zone data structures, the actual
//! memory-mapping primitive, the inter-process message bus, the
//! configuration file format, and the DNS query engine are all external
//! collaborators: this crate only consumes the trait boundaries they offer
//! ([`segment::Segment`], [`segment::ZoneLoader`], [`bus::Bus`]).

pub mod builder;
pub mod bus;
pub mod channels;
pub mod config;
pub mod datasrc_info;
pub mod error;
pub mod manager;
pub mod reader_roster;
pub mod segment;
pub mod segment_info;
pub mod signal;
pub mod thread_manager;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque, bus-assigned identifier of a reader process.
pub type ReaderId = String;

/// A zone origin name. Kept as an owned string: parsing/validating wire-format
/// names is the DNS wire parser's job, not this core's.
pub type ZoneName = String;

/// A DNS resource record class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RrClass {
    In,
    Ch,
    Hs,
}

impl fmt::Display for RrClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RrClass::In => "IN",
            RrClass::Ch => "CH",
            RrClass::Hs => "HS",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RrClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(RrClass::In),
            "CH" => Ok(RrClass::Ch),
            "HS" => Ok(RrClass::Hs),
            other => Err(format!("bad class: {other}")),
        }
    }
}

/// Identifies one SegmentInfo: a (generation, RR class, data-source name)
/// triple. Used to look a SegmentInfo up across every retained generation,
/// not only the newest one (see the ack-targeting-an-older-generation design
/// note).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentInfoKey {
    pub generation_id: u64,
    pub rr_class: RrClass,
    pub datasrc_name: String,
}

impl fmt::Display for SegmentInfoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen={} class={} datasrc={}",
            self.generation_id, self.rr_class, self.datasrc_name
        )
    }
}
