// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Unix signal handler registration.
//!
//! Used for graceful shutdown: `main.rs` registers a callback on SIGTERM and
//! SIGINT that requests the manager loop stop and the builder thread be
//! joined, rather than the process dying mid-build. All libc-specific detail
//! (the `extern "C"` handler, `sigaction`) is confined to this module.

use lazy_static::lazy_static;
use nix::sys::signal;
use std::collections::HashMap;
use std::io::Result;
use std::sync::Mutex;
use tracing::{error, info};

/// Defines the types of callback that can be registered with the signal handler.
type Callback = fn();

/// Maintains the association of callbacks registered with signals.
struct SignalHandler {
    handlers: HashMap<signal::Signal, Callback>,
}

impl SignalHandler {
    fn new() -> SignalHandler {
        SignalHandler {
            handlers: HashMap::new(),
        }
    }

    fn get_callback(&self, sig: signal::Signal) -> Option<&Callback> {
        self.handlers.get(&sig)
    }

    /// Set or overwrite the callback for `sig`. Last callback registered wins.
    fn add_callback(&mut self, sig: signal::Signal, callback: Callback) {
        self.handlers.insert(sig, callback);
    }
}

lazy_static! {
    /// Global SignalHandler, instantiated on first access.
    static ref SIGNAL_HANDLERS: Mutex<SignalHandler> = Mutex::new(SignalHandler::new());
}

/// The one and only signal handler, looking up and running registered
/// callbacks. This indirection keeps the `extern "C"` surface to a single
/// function.
extern "C" fn main_signal_handler(signum: libc::c_int) {
    // A signal can interrupt the registration function while it holds the
    // lock; try_lock avoids deadlocking in that case rather than blocking
    // inside a signal handler.
    let handlers = match SIGNAL_HANDLERS.try_lock() {
        Ok(handlers) => handlers,
        Err(_) => return,
    };

    if let Ok(sig) = signal::Signal::try_from(signum) {
        if let Some(cb) = handlers.get_callback(sig) {
            cb()
        }
    }
}

fn enable_signal(sig: signal::Signal) -> Result<()> {
    let handler = signal::SigHandler::Handler(main_signal_handler);
    let mask = signal::SigSet::empty();
    let mut flags = signal::SaFlags::empty();
    flags.insert(signal::SaFlags::SA_RESTART);
    flags.insert(signal::SaFlags::SA_SIGINFO);
    flags.insert(signal::SaFlags::SA_NOCLDSTOP);

    let sig_action = signal::SigAction::new(handler, flags, mask);

    match unsafe { signal::sigaction(sig, &sig_action) } {
        Ok(_) => Ok(()),
        Err(_) => Err(std::io::Error::last_os_error()),
    }
}

/// Register `callback` to run when `sig` is received, and enable the signal.
/// Must be called on the main thread before the manager loop starts.
pub fn register_signal_callback(sig: signal::Signal, callback: Callback) -> Result<()> {
    let mut handlers = SIGNAL_HANDLERS.lock().unwrap();
    handlers.add_callback(sig, callback);

    match enable_signal(sig) {
        Ok(_) => {
            info!(signal = %sig, "registered signal callback");
            Ok(())
        }
        Err(e) => {
            error!(signal = %sig, error = %e, "failed to register signal callback");
            Err(e)
        }
    }
}
