// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A small web of MPSC channels used for thread lifecycle signalling.
//!
//! This core's only two threads (the manager and the builder) already have a
//! dedicated, spec-mandated command/response channel in [`crate::builder`];
//! this module is a *second*, orthogonal channel carrying only
//! [`crate::thread_manager::Message`] lifecycle events (normal exit, panic,
//! abort), so the manager can notice a dead builder thread without polling
//! its join handle. Given a list of channel IDs, builds one MPSC channel per
//! ID and hands out the receiving ends in a `MailBox` (consumed once, one
//! entry per thread) and the sending ends in a cloneable `DispatchBox`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc;

/// Build a web of channels, one per supplied ID, returning the MailBox of
/// receivers (to be drained, one entry per thread) and a DispatchBox of
/// senders (cloned and given to every thread so any thread can address any
/// other).
pub fn new_channel_web<K, M>(channel_ids: Vec<K>) -> (MailBox<K, M>, DispatchBox<K, M>)
where
    K: Hash + Eq + Clone,
{
    let mut mailbox = HashMap::with_capacity(channel_ids.len());
    let mut dispatchbox = HashMap::with_capacity(channel_ids.len());

    for id in channel_ids {
        let (sender, receiver) = mpsc::channel();
        mailbox.insert(id.clone(), receiver);
        dispatchbox.insert(id.clone(), sender);
    }

    (
        MailBox { channels: mailbox },
        DispatchBox {
            channels: dispatchbox,
        },
    )
}

/// The receiving ends of the channel web, keyed by channel ID. Each receiver
/// is taken out (`get_mailbox`) and moved into the thread that owns it.
pub struct MailBox<K, M>
where
    K: Hash + Eq,
{
    channels: HashMap<K, mpsc::Receiver<M>>,
}

impl<K, M> MailBox<K, M>
where
    K: Hash + Eq,
{
    /// Take the receiving end registered for `channel_id`, if any. Returns
    /// `None` on a second call for the same ID: a mailbox is consumed once.
    pub fn get_mailbox(&mut self, channel_id: &K) -> Option<mpsc::Receiver<M>> {
        self.channels.remove(channel_id)
    }
}

/// The sending ends of the channel web, cloned and handed to every thread so
/// any thread can address any other by ID.
#[derive(Clone)]
pub struct DispatchBox<K, M>
where
    K: Hash + Eq,
{
    channels: HashMap<K, mpsc::Sender<M>>,
}

impl<K, M> DispatchBox<K, M>
where
    K: Hash + Eq,
{
    /// Send `message` to the channel identified by `channel_id`.
    pub fn send(&self, channel_id: &K, message: M) -> Result<(), mpsc::SendError<M>> {
        match self.channels.get(channel_id) {
            Some(sender) => sender.send(message),
            None => Err(mpsc::SendError(message)),
        }
    }

    /// The set of channel IDs in this box.
    pub fn keys(&self) -> std::collections::hash_map::Keys<'_, K, mpsc::Sender<M>> {
        self.channels.keys()
    }
}
