use log::{debug, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::prefs::{keys, PreferenceStore};
use crate::reply::{reply_channel, Replier};

pub const HEALTH_PROBE_CHANNEL: &str = "jadwalsholat.rasyid/health_probe";
pub const PROBE_METHOD: &str = "probe";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Success,
    Error { code: String, message: Option<String> },
    NotImplemented,
}

#[derive(Debug)]
pub struct ProbeRequest {
    pub method: &'static str,
    replier: Replier<ProbeReply>,
}

impl ProbeRequest {
    pub fn respond(self, reply: ProbeReply) -> bool {
        self.replier.reply(reply)
    }
}

/// Where the main execution context listens for probes. At most one
/// responder is attached at a time; attaching again replaces it.
#[derive(Debug, Clone, Default)]
pub struct ProbeEndpoint {
    responder: Arc<Mutex<Option<Sender<ProbeRequest>>>>,
}

impl ProbeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Sender<ProbeRequest>>> {
        self.responder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self) -> Receiver<ProbeRequest> {
        let (tx, rx) = mpsc::channel();
        *self.slot() = Some(tx);
        rx
    }

    /// Dropping the sender ends any responder loop reading from it.
    pub fn detach(&self) {
        *self.slot() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.slot().is_some()
    }

    fn send(&self, request: ProbeRequest) -> bool {
        match self.slot().as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    /// Attaches a responder that answers every probe with `answer` on its own
    /// thread. The thread ends when the endpoint is detached or re-attached.
    pub fn spawn_responder<F>(&self, answer: F) -> JoinHandle<()>
    where
        F: Fn() -> ProbeReply + Send + 'static,
    {
        let rx = self.attach();
        thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                request.respond(answer());
            }
        })
    }
}

/// Tells whether the main execution context is alive.
pub struct LivenessProber<'a> {
    endpoint: &'a ProbeEndpoint,
    prefs: &'a dyn PreferenceStore,
}

impl<'a> LivenessProber<'a> {
    pub fn new(endpoint: &'a ProbeEndpoint, prefs: &'a dyn PreferenceStore) -> Self {
        Self { endpoint, prefs }
    }

    /// Sends one probe and waits at most `timeout` for the answer. Only an
    /// affirmative reply counts; errors, missing handlers and silence are all
    /// reported as `false`.
    pub fn probe_direct(&self, timeout: Duration) -> bool {
        let (replier, pending) = reply_channel();
        let request = ProbeRequest {
            method: PROBE_METHOD,
            replier,
        };

        if !self.endpoint.send(request) {
            debug!("No probe responder attached");
            return false;
        }

        match pending.wait(timeout) {
            Ok(ProbeReply::Success) => true,
            Ok(ProbeReply::Error { code, message }) => {
                debug!("Probe answered with error {}: {:?}", code, message);
                false
            }
            Ok(ProbeReply::NotImplemented) => {
                debug!("Probe handler not implemented");
                false
            }
            Err(e) => {
                warn!("Direct probe failed: {}", e);
                false
            }
        }
    }

    /// Last heartbeat written by the application layer; 0 when unknown.
    pub fn last_heartbeat_ms(&self) -> i64 {
        self.prefs.get_long(keys::LAST_HEARTBEAT_MS, 0)
    }
}
