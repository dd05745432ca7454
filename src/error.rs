// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Structured error kinds surfaced by the manager.
//!
//! Every externally invoked callback is total: it never escapes to the bus
//! as a Rust panic. The manager's dispatch wrapper catches a `MemMgrError`
//! and converts it to either a bus answer or a logged-and-swallowed event,
//! per the propagation policy each variant's doc comment describes.

use thiserror::Error;

/// Errors this core can report. Each variant corresponds to one error kind
/// named by the design: `ConfigError`, `BadLoadZoneArgs`, `NoDataSource`,
/// `UnknownReaderOrSegment`, `BuilderFailure`, `FatalSetup`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemMgrError {
    /// Invalid or unusable configuration. Reported back as a negative config
    /// answer; the prior configuration is retained. Fatal only during
    /// initial startup, handled by the caller in that case.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `loadzone` was missing or had an invalid `class`, `datasource`, or
    /// `origin`. Returns a code-1 answer with the message as explanatory
    /// text.
    #[error("bad loadzone arguments: {0}")]
    BadLoadZoneArgs(String),

    /// `loadzone` (or `zone_updated`) was issued before any generation of
    /// data-source configuration exists.
    #[error("no data source configured yet")]
    NoDataSource,

    /// An `info_update_ack` named a reader or SegmentInfo this core does not
    /// track. Logged and ignored; the ack is treated as not received.
    #[error("unknown reader or segment for ack: {0}")]
    UnknownReaderOrSegment(String),

    /// The builder's external zone loader failed. Logged; the state machine
    /// is still advanced via the synthetic completion the builder always
    /// sends.
    #[error("builder reported a load failure: {0}")]
    BuilderFailure(String),

    /// Initial configuration or builder-thread creation failed. The process
    /// exits non-zero.
    #[error("fatal setup failure: {0}")]
    FatalSetup(String),
}
