// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The builder worker: a single dedicated thread that executes build
//! commands against a writable segment and reports completion back to the
//! manager.
//!
//! Modeled on `clock-bound-d`'s single-purpose worker threads (`shm_writer`,
//! `chrony_poller`): a blocking `recv`-style loop over one command source,
//! entirely owned by this thread, with no direct access to SegmentInfo or
//! the reader roster.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};

use nix::unistd::{close, pipe, read, write};
use tracing::{debug, error, info};

use crate::segment::{Segment, ZoneLoader};
use crate::{RrClass, SegmentInfoKey, ZoneName};

/// A command sent from the manager to the builder thread.
pub enum BuilderCommand {
    /// Load one zone (or, if `zone_name` is `None`, every zone defined for
    /// this data source) into `segment`. Ownership of `segment` is
    /// transferred to the builder for the duration of the build: a
    /// message-passing hand-off rather than shared mutable access, so the
    /// manager structurally cannot touch the segment while it is in flight.
    Load {
        key: SegmentInfoKey,
        zone_name: Option<ZoneName>,
        segment: Box<dyn Segment>,
    },
    /// Stop the builder thread. Any commands already queued ahead of this
    /// one are drained first.
    Shutdown,
}

/// The outcome of a loader invocation, reported back as part of a
/// `load-completed` response. The state machine always receives a
/// completion, success or failure, so it never wedges in UPDATING.
#[derive(Debug)]
pub enum LoadOutcome {
    Ok,
    LoaderFailed(String),
}

/// A response sent from the builder thread to the manager.
pub enum BuilderResponse {
    LoadCompleted {
        key: SegmentInfoKey,
        zone_name: Option<ZoneName>,
        segment: Box<dyn Segment>,
        outcome: LoadOutcome,
    },
}

/// The shared command/response queue pair between the manager and the
/// builder, guarded by one mutex with a condition variable to wake the
/// builder, plus a byte-level wake pipe the builder writes to so the manager
/// can learn of new responses from within its own poll-based multiplexer
/// rather than blocking on the condvar.
pub struct BuilderChannel {
    commands: Mutex<VecDeque<BuilderCommand>>,
    responses: Mutex<VecDeque<BuilderResponse>>,
    condvar: Condvar,
    wake_read: RawFd,
    wake_write: RawFd,
}

impl BuilderChannel {
    pub fn new() -> std::io::Result<Arc<BuilderChannel>> {
        let (read_fd, write_fd) = pipe().map_err(std::io::Error::from)?;
        Ok(Arc::new(BuilderChannel {
            commands: Mutex::new(VecDeque::new()),
            responses: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            wake_read: read_fd,
            wake_write: write_fd,
        }))
    }

    /// The manager polls this descriptor alongside the bus socket.
    pub fn wake_fd(&self) -> RawFd {
        self.wake_read
    }

    /// Enqueue a command for the builder and wake it.
    pub fn send_command(&self, command: BuilderCommand) {
        let mut commands = self.commands.lock().expect("builder command queue poisoned");
        commands.push_back(command);
        self.condvar.notify_one();
    }

    /// Block until a command is available, then pop and return it. Called
    /// only by the builder thread.
    fn recv_command(&self) -> BuilderCommand {
        let mut commands = self.commands.lock().expect("builder command queue poisoned");
        loop {
            if let Some(command) = commands.pop_front() {
                return command;
            }
            commands = self
                .condvar
                .wait(commands)
                .expect("builder command queue poisoned");
        }
    }

    /// Enqueue a response and signal the manager's wake pipe. Called only
    /// by the builder thread.
    fn send_response(&self, response: BuilderResponse) {
        {
            let mut responses = self.responses.lock().expect("builder response queue poisoned");
            responses.push_back(response);
        }
        // A single byte suffices; the manager drains the whole queue on wake.
        let _ = write(self.wake_write, &[0u8]);
    }

    /// Drain and return every response currently queued, consuming the wake
    /// byte(s) that announced them. Called only by the manager, after its
    /// multiplexer reports the wake pipe readable.
    pub fn drain_responses(&self) -> Vec<BuilderResponse> {
        let mut buf = [0u8; 64];
        // Best-effort: consume whatever wake bytes are pending. A partial or
        // absent read is harmless since the queue itself is the source of
        // truth, not the pipe.
        let _ = read(self.wake_read, &mut buf);

        let mut responses = self.responses.lock().expect("builder response queue poisoned");
        responses.drain(..).collect()
    }
}

impl Drop for BuilderChannel {
    fn drop(&mut self) {
        let _ = close(self.wake_read);
        let _ = close(self.wake_write);
    }
}

/// Entry point for the builder thread.
///
/// Runs until a `Shutdown` command is received, invoking `loader` for every
/// `Load` command and always reporting a `load-completed` response, even on
/// loader failure.
pub fn run(channel: Arc<BuilderChannel>, loader: Arc<dyn ZoneLoader>) {
    info!("builder thread starting");
    loop {
        match channel.recv_command() {
            BuilderCommand::Load {
                key,
                zone_name,
                mut segment,
            } => {
                debug!(segment = %key, zone = ?zone_name, "builder executing load");
                let outcome = match loader.load(
                    segment.as_mut(),
                    key.rr_class,
                    &key.datasrc_name,
                    zone_name.as_deref(),
                ) {
                    Ok(()) => LoadOutcome::Ok,
                    Err(e) => {
                        error!(segment = %key, zone = ?zone_name, error = %e, "zone loader failed");
                        LoadOutcome::LoaderFailed(e)
                    }
                };
                channel.send_response(BuilderResponse::LoadCompleted {
                    key,
                    zone_name,
                    segment,
                    outcome,
                });
            }
            BuilderCommand::Shutdown => {
                info!("builder thread received shutdown, exiting");
                break;
            }
        }
    }
}
