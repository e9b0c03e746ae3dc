pub mod alarm;
pub mod audio;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod host;
pub mod jobs;
pub mod memory;
pub mod notify;
pub mod prefs;
pub mod probe;
pub mod refresh;
pub mod render;
pub mod reply;
pub mod service;
pub mod services;
pub mod signals;
pub mod watchdog;
pub mod web;

pub use bridge::{dispatch as dispatch_call, BridgeError, BridgeResult, MethodCall};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, JobConfig, WatchdogConfig};
pub use host::Host;
pub use memory::MemoryPlatform;
pub use prefs::{FilePrefs, MemoryPrefs, PrefValue, PreferenceStore, SharedPrefs};
pub use probe::{ProbeEndpoint, ProbeReply};
pub use services::ServiceProvider;
pub use signals::{dispatch as dispatch_signal, run_signal_loop, Signal, SignalOutcome};
pub use watchdog::{TickReport, TickSource, Watchdog};
