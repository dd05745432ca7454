// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The control bus boundary: message/notification shapes and the `Bus`
//! trait the manager drives its event loop against.
//!
//! The actual inter-process message bus is an external collaborator (see the
//! crate's module docs); this module only defines the wire-shaped,
//! `serde`-derived structures a real transport would (de)serialize, and a
//! trait the manager multiplexes over. `LoopbackBus` is an in-memory test
//! double; `StdioBus` is a minimal newline-delimited-JSON transport usable as
//! the default standalone binary wiring until a real bus is integrated.

use std::io::{BufRead, Write};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::segment::ResetParam;
use crate::ReaderId;

/// `loadzone {class, datasource, origin}` command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadZoneCommand {
    pub rr_class: String,
    pub datasource: String,
    pub origin: String,
}

/// `zone_updated {class, datasource, origin}` notification: same shape as
/// `loadzone`, but a missing SegmentInfo is tolerated (local segment case).
pub type ZoneUpdatedNotification = LoadZoneCommand;

/// `{code, text}` answer to a command. `code == 0` means accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub code: i32,
    pub text: String,
}

impl Answer {
    pub fn ok() -> Self {
        Answer {
            code: 0,
            text: String::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Answer {
            code: 1,
            text: text.into(),
        }
    }
}

/// `info_update_ack {data-source-class, data-source-name, reader}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoUpdateAck {
    pub rr_class: String,
    pub datasource: String,
    pub reader: ReaderId,
    pub generation_id: u64,
}

/// `info_update {data-source-class, data-source-name, segment-params,
/// reader}`, sent to the segment-reader group, addressed to one reader.
///
/// Carries the originating `generation_id` so a real reader has a field to
/// copy into its `info_update_ack`'s own `generation_id` — without it, a
/// reader has no way to report which generation it actually switched to, and
/// every ack it sends would have to guess.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoUpdate {
    pub rr_class: String,
    pub datasource: String,
    pub segment_params: ResetParam,
    pub reader: ReaderId,
    pub generation_id: u64,
}

/// A `subscribed`/`unsubscribed` notification on the `cc_members` group.
/// Acted on only when `group` equals the segment-reader group name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MembershipEvent {
    Subscribed { group: String, client: ReaderId },
    Unsubscribed { group: String, client: ReaderId },
}

/// Everything the manager's event loop can be handed by a `Bus`
/// implementation in a single iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ManagerEvent {
    LoadZone(LoadZoneCommand),
    InfoUpdateAck(InfoUpdateAck),
    ZoneUpdated(ZoneUpdatedNotification),
    Membership(MembershipEvent),
    ConfigUpdate(Config),
    /// An event kind this core does not recognize. Ignored per the unknown
    /// notification policy.
    Unknown,
}

/// The segment-reader group name readers join to receive `info_update`
/// messages; only `subscribed`/`unsubscribed` events on this group are
/// acted on.
pub const SEGMENT_READER_GROUP: &str = "Zonemgr";

/// The control-bus boundary the manager drives. A real implementation wraps
/// the out-of-scope message bus transport; this crate supplies only
/// in-process doubles.
pub trait Bus: Send {
    /// Pop the next available event, or `None` if none is ready within
    /// `timeout_ms` (0 = non-blocking poll).
    fn next_event(&mut self, timeout_ms: i32) -> Option<ManagerEvent>;

    /// Send `answer` in reply to the most recently dequeued command that
    /// expects one (`loadzone`). Notifications (`zone_updated`,
    /// `info_update_ack`, membership events) expect no reply.
    fn send_loadzone_answer(&mut self, answer: Answer);

    /// Send `answer` in reply to a `ConfigUpdate` event: `code == 0` means
    /// the new configuration was adopted, non-zero means it was rejected and
    /// the prior configuration is retained.
    fn send_config_answer(&mut self, answer: Answer);

    /// Send an `info_update` to the identified reader.
    fn send_info_update(&mut self, update: InfoUpdate);

    /// Startup RPC: `members {group}` -> the list of currently subscribed
    /// reader ids.
    fn members(&mut self, group: &str) -> Vec<ReaderId>;

    /// A file descriptor the manager's multiplexer can poll alongside the
    /// builder's wake pipe.
    fn pollable_fd(&self) -> RawFd;
}

/// State shared between a `LoopbackBus` moved into a `Manager` and a
/// `LoopbackBusHandle` retained by the caller, so tests can keep injecting
/// events and inspecting what was sent after ownership of the `Bus` trait
/// object has passed to the manager.
#[derive(Default)]
struct LoopbackShared {
    pending: std::collections::VecDeque<ManagerEvent>,
    sent_answers: Vec<Answer>,
    sent_config_answers: Vec<Answer>,
    sent_updates: Vec<InfoUpdate>,
    members: Vec<ReaderId>,
}

/// An in-memory `Bus` double: events are injected by pushing onto a queue,
/// and every answer/info_update sent is captured for assertions. Used by
/// unit and scenario tests exercising the manager without a real transport.
pub struct LoopbackBus {
    shared: Arc<Mutex<LoopbackShared>>,
    idle_fd: RawFd,
}

/// A cloneable handle onto a `LoopbackBus`'s shared state, usable after the
/// `LoopbackBus` itself has been boxed and handed to a `Manager`.
#[derive(Clone)]
pub struct LoopbackBusHandle {
    shared: Arc<Mutex<LoopbackShared>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        LoopbackBus {
            shared: Arc::new(Mutex::new(LoopbackShared::default())),
            idle_fd: -1,
        }
    }

    /// A handle sharing this bus's state, retained by the caller across the
    /// `Bus` trait object being moved elsewhere.
    pub fn handle(&self) -> LoopbackBusHandle {
        LoopbackBusHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn push_event(&self, event: ManagerEvent) {
        self.shared.lock().expect("loopback bus state poisoned").pending.push_back(event);
    }

    pub fn set_members(&self, members: Vec<ReaderId>) {
        self.shared.lock().expect("loopback bus state poisoned").members = members;
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBusHandle {
    pub fn push_event(&self, event: ManagerEvent) {
        self.shared.lock().expect("loopback bus state poisoned").pending.push_back(event);
    }

    pub fn set_members(&self, members: Vec<ReaderId>) {
        self.shared.lock().expect("loopback bus state poisoned").members = members;
    }

    pub fn sent_answers(&self) -> Vec<Answer> {
        self.shared.lock().expect("loopback bus state poisoned").sent_answers.clone()
    }

    pub fn sent_config_answers(&self) -> Vec<Answer> {
        self.shared.lock().expect("loopback bus state poisoned").sent_config_answers.clone()
    }

    pub fn sent_updates(&self) -> Vec<InfoUpdate> {
        self.shared.lock().expect("loopback bus state poisoned").sent_updates.clone()
    }
}

impl Bus for LoopbackBus {
    fn next_event(&mut self, _timeout_ms: i32) -> Option<ManagerEvent> {
        self.shared.lock().expect("loopback bus state poisoned").pending.pop_front()
    }

    fn send_loadzone_answer(&mut self, answer: Answer) {
        self.shared.lock().expect("loopback bus state poisoned").sent_answers.push(answer);
    }

    fn send_config_answer(&mut self, answer: Answer) {
        self.shared.lock().expect("loopback bus state poisoned").sent_config_answers.push(answer);
    }

    fn send_info_update(&mut self, update: InfoUpdate) {
        self.shared.lock().expect("loopback bus state poisoned").sent_updates.push(update);
    }

    fn members(&mut self, _group: &str) -> Vec<ReaderId> {
        self.shared.lock().expect("loopback bus state poisoned").members.clone()
    }

    fn pollable_fd(&self) -> RawFd {
        self.idle_fd
    }
}

/// Wire envelope used by `StdioBus`'s newline-delimited JSON transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StdioRequest {
    Loadzone(LoadZoneCommand),
    InfoUpdateAck(InfoUpdateAck),
    ZoneUpdated(ZoneUpdatedNotification),
    Subscribed { client: ReaderId },
    Unsubscribed { client: ReaderId },
    ConfigUpdate(Config),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StdioOutgoing {
    Answer(Answer),
    ConfigAnswer(Answer),
    InfoUpdate(InfoUpdate),
}

/// A minimal bus reading newline-delimited JSON requests from stdin and
/// writing responses to stdout. Placeholder wiring for the standalone
/// binary until a real message-bus transport is integrated; the manager's
/// logic is identical either way since it only sees `ManagerEvent`s.
pub struct StdioBus<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StdioBus<R, W> {
    pub fn new(input: R, output: W) -> Self {
        StdioBus { input, output }
    }

    fn write_outgoing(&mut self, outgoing: StdioOutgoing) {
        if let Ok(line) = serde_json::to_string(&outgoing) {
            let _ = writeln!(self.output, "{line}");
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> Bus for StdioBus<R, W> {
    fn next_event(&mut self, _timeout_ms: i32) -> Option<ManagerEvent> {
        let mut line = String::new();
        if self.input.read_line(&mut line).unwrap_or(0) == 0 {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Some(ManagerEvent::Unknown);
        }
        match serde_json::from_str::<StdioRequest>(trimmed) {
            Ok(StdioRequest::Loadzone(cmd)) => Some(ManagerEvent::LoadZone(cmd)),
            Ok(StdioRequest::InfoUpdateAck(ack)) => Some(ManagerEvent::InfoUpdateAck(ack)),
            Ok(StdioRequest::ZoneUpdated(n)) => Some(ManagerEvent::ZoneUpdated(n)),
            Ok(StdioRequest::Subscribed { client }) => {
                Some(ManagerEvent::Membership(MembershipEvent::Subscribed {
                    group: SEGMENT_READER_GROUP.to_string(),
                    client,
                }))
            }
            Ok(StdioRequest::Unsubscribed { client }) => {
                Some(ManagerEvent::Membership(MembershipEvent::Unsubscribed {
                    group: SEGMENT_READER_GROUP.to_string(),
                    client,
                }))
            }
            Ok(StdioRequest::ConfigUpdate(config)) => Some(ManagerEvent::ConfigUpdate(config)),
            Err(_) => Some(ManagerEvent::Unknown),
        }
    }

    fn send_loadzone_answer(&mut self, answer: Answer) {
        self.write_outgoing(StdioOutgoing::Answer(answer));
    }

    fn send_config_answer(&mut self, answer: Answer) {
        self.write_outgoing(StdioOutgoing::ConfigAnswer(answer));
    }

    fn send_info_update(&mut self, update: InfoUpdate) {
        self.write_outgoing(StdioOutgoing::InfoUpdate(update));
    }

    fn members(&mut self, _group: &str) -> Vec<ReaderId> {
        Vec::new()
    }

    fn pollable_fd(&self) -> RawFd {
        // stdin's fd; callers using a real stdin/stdout pair should use 0.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_bus_replays_pushed_events_in_order() {
        let mut bus = LoopbackBus::new();
        bus.push_event(ManagerEvent::LoadZone(LoadZoneCommand {
            rr_class: "IN".to_string(),
            datasource: "mem".to_string(),
            origin: "example.com".to_string(),
        }));
        bus.push_event(ManagerEvent::Unknown);

        assert!(matches!(bus.next_event(0), Some(ManagerEvent::LoadZone(_))));
        assert!(matches!(bus.next_event(0), Some(ManagerEvent::Unknown)));
        assert!(bus.next_event(0).is_none());
    }

    #[test]
    fn stdio_bus_parses_loadzone_request() {
        let input = b"{\"type\":\"loadzone\",\"rr_class\":\"IN\",\"datasource\":\"mem\",\"origin\":\"example.com\"}\n" as &[u8];
        let mut output = Vec::new();
        let mut bus = StdioBus::new(input, &mut output);
        let event = bus.next_event(0);
        assert!(matches!(event, Some(ManagerEvent::LoadZone(_))));
    }

    #[test]
    fn stdio_bus_reports_unknown_on_malformed_input() {
        let input = b"not json\n" as &[u8];
        let mut output = Vec::new();
        let mut bus = StdioBus::new(input, &mut output);
        assert!(matches!(bus.next_event(0), Some(ManagerEvent::Unknown)));
    }
}
