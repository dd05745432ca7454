// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Builder thread lifecycle: spawning and panic/termination signalling.
//!
//! The spec names exactly two threads, each already wired together by the
//! spec-mandated [`crate::builder::BuilderChannel`] (commands in, responses
//! out, wake pipe). This module adds an orthogonal, ambient lifecycle
//! channel carrying only [`Message`] so the main thread can learn the
//! builder thread exited (normally or via panic) without polling its join
//! handle — the same `Context`-with-`Drop` pattern the teacher uses for its
//! larger thread mesh, collapsed here to one manager/builder pair.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{panicking, spawn, JoinHandle};

use tracing::{debug, error};

use crate::builder::{self, BuilderChannel};
use crate::channels::{self, DispatchBox};
use crate::segment::ZoneLoader;

/// The set of threads participating in lifecycle signalling.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ChannelId {
    MainThread,
    Builder,
}

/// Lifecycle messages exchanged over the signalling channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A thread exited normally.
    ThreadTerminate(ChannelId),
    /// A thread's `Context` was dropped while unwinding from a panic.
    ThreadPanic(ChannelId),
}

/// Held by a spawned thread for its lifetime; signals the main thread on
/// drop whether the thread exited normally or was unwinding from a panic.
pub struct Context {
    channel_id: ChannelId,
    dbox: DispatchBox<ChannelId, Message>,
}

impl Drop for Context {
    fn drop(&mut self) {
        let message = if panicking() {
            Message::ThreadPanic(self.channel_id.clone())
        } else {
            Message::ThreadTerminate(self.channel_id.clone())
        };
        match self.dbox.send(&ChannelId::MainThread, message) {
            Ok(()) => debug!(channel = ?self.channel_id, "thread signalled its exit"),
            Err(_) => error!(channel = ?self.channel_id, "failed to signal exit to main thread"),
        }
    }
}

/// Spawn the builder thread running [`builder::run`], wrapped in a `Context`
/// whose drop reports normal exit or panic. Returns the join handle and the
/// main thread's receiving end of the lifecycle channel.
pub fn spawn_builder(
    builder_channel: Arc<BuilderChannel>,
    loader: Arc<dyn ZoneLoader>,
) -> (JoinHandle<()>, Receiver<Message>) {
    let ids = vec![ChannelId::MainThread, ChannelId::Builder];
    let (mut mailbox, dispatchbox) = channels::new_channel_web(ids);
    let main_mbox = mailbox
        .get_mailbox(&ChannelId::MainThread)
        .expect("MainThread channel was just registered");

    let handle = spawn(move || {
        let _ctx = Context {
            channel_id: ChannelId::Builder,
            dbox: dispatchbox,
        };
        builder::run(builder_channel, loader);
    });

    (handle, main_mbox)
}
