pub use crate::app::JadwalCliApp;

mod app {
    use anyhow::{bail, Context, Result};
    use chrono::FixedOffset;
    use jadwal_core::render::time::format_display_time_in;
    use jadwal_core::render::widget::{render_legacy_widget, render_prayer_widget, WidgetLayout, WidgetView};
    use jadwal_core::render::render_panel;
    use jadwal_core::*;
    use log::info;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::io::{self, BufRead, Write};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    /// Runs the native layer against the file-backed stores in the config
    /// directory and an in-memory platform. Scheduling state lives only as
    /// long as the app; the stores persist between runs.
    pub struct JadwalCliApp {
        config: Config,
        host: Host<MemoryPlatform>,
        responder: Option<JoinHandle<()>>,
    }

    impl JadwalCliApp {
        pub fn new(config: Config, tz: Option<FixedOffset>) -> Result<Self> {
            let (native, app) = config.open_stores()?;
            let clock = SystemClock::new();
            let platform = MemoryPlatform::with_clock(clock.now_ms(), clock.uptime_ms());
            let mut host = Host::new(Arc::new(platform), native, app);
            if let Some(tz) = tz {
                host = host.with_tz(tz);
            }

            Ok(Self {
                config,
                host,
                responder: None,
            })
        }

        pub fn host(&self) -> &Host<MemoryPlatform> {
            &self.host
        }

        /// Answers liveness probes as a healthy main context would.
        pub fn attach_responder(&mut self) {
            let handle = self.host.endpoint().spawn_responder(|| ProbeReply::Success);
            self.responder = Some(handle);
        }

        pub fn status(&self) -> Result<Value> {
            let host = &self.host;
            let store = |prefs: &dyn PreferenceStore| -> BTreeMap<String, Value> {
                prefs
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::to_value(v).unwrap_or(Value::Null)))
                    .collect()
            };
            Ok(serde_json::json!({
                "config_dir": self.config.config_dir,
                "now_ms": host.now_ms(),
                "last_heartbeat_ms": host.last_heartbeat_ms(),
                "boot_received_ts": host.boot_received_ts(),
                "boot_handled_since_boot": host.is_boot_receiver_triggered_since_boot(),
                "watchdog": WatchdogConfig::load(host.native()),
                "jobs": JobConfig::load(host.native()),
                "native": store(host.native()),
                "app": store(host.app()),
                "platform": host.services().snapshot(),
            }))
        }

        pub fn tick(&self, source: TickSource) -> TickReport {
            let report = self.host.watchdog().tick(source);
            info!("Tick finished: {:?}", report.health);
            report
        }

        pub fn call(&self, channel: &str, method: &str, args: Value) -> BridgeResult {
            dispatch_call(&self.host, &MethodCall::new(channel, method, args))
        }

        pub fn persist(&self, pairs: &[String]) -> BridgeResult {
            let mut map = serde_json::Map::new();
            for pair in pairs {
                match pair.split_once('=') {
                    Some((key, value)) => {
                        map.insert(key.to_string(), Value::String(value.to_string()));
                    }
                    None => {
                        return Err(BridgeError::Failure {
                            code: bridge::PERSIST_ERR.to_string(),
                            message: format!("expected key=value, got {}", pair),
                        })
                    }
                }
            }
            self.call(bridge::ALARM_CHANNEL, "persistPrayerTimes", Value::Object(map))
        }

        pub fn widget(&self, min_width: u32, legacy: bool) -> Result<WidgetView> {
            let host = &self.host;
            if legacy {
                return Ok(render_legacy_widget(host.native(), host.tz()));
            }
            render_prayer_widget(
                host.app(),
                host.native(),
                WidgetLayout::for_min_width(min_width),
                host.now_ms(),
                host.tz(),
            )
        }

        pub fn panel(&self) -> (String, String) {
            let host = &self.host;
            let panel = render_panel(host.app(), host.native(), host.now_ms(), host.tz());
            (panel.title, panel.text)
        }

        pub fn boot(&self) -> SignalOutcome {
            dispatch_signal(&self.host, Signal::BootCompleted)
        }

        pub fn format_time(&self, raw: &str) -> String {
            format_display_time_in(Some(raw), self.host.tz())
        }

        fn show_menu(&self) {
            let (title, text) = self.panel();
            println!("\n=== Jadwal Sholat - native layer simulator ===");
            println!("Panel: {} | {}", title, text);
            println!("Last heartbeat: {}", self.host.last_heartbeat_ms());
            println!();
            println!("1. Report heartbeat");
            println!("2. Watchdog tick");
            println!("3. Boot completed");
            println!("4. Render widget");
            println!("5. Status");
            println!("6. Exit");
            print!("\nSelect an option (1-6): ");
            if let Err(e) = io::stdout().flush() {
                eprintln!("Failed to flush stdout: {}", e);
            }
        }

        pub fn run(&mut self) -> Result<()> {
            let stdin = io::stdin();
            loop {
                self.show_menu();

                let mut input = String::new();
                if stdin.lock().read_line(&mut input)? == 0 {
                    break;
                }

                match input.trim() {
                    "1" => match self.host.report_heartbeat() {
                        Ok(ts) => println!("Heartbeat stored: {}", ts),
                        Err(e) => eprintln!("Failed to store heartbeat: {:#}", e),
                    },
                    "2" => print_json(&self.tick(TickSource::Alarm))?,
                    "3" => {
                        self.boot();
                        println!("Boot handled");
                    }
                    "4" => match self.widget(0, false) {
                        Ok(view) => print_json(&view)?,
                        Err(e) => eprintln!("Failed to render widget: {:#}", e),
                    },
                    "5" => print_json(&self.status()?)?,
                    "6" => {
                        println!("Exiting...");
                        break;
                    }
                    _ => println!("Invalid option. Please select 1-6."),
                }
            }
            Ok(())
        }
    }

    impl Drop for JadwalCliApp {
        fn drop(&mut self) {
            if self.responder.take().is_some() {
                self.host.endpoint().detach();
            }
        }
    }

    pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
        println!("{}", text);
        Ok(())
    }

    /// Parses "+07:00", "-3", "7" and the like.
    pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
        let raw = raw.trim();
        let (sign, rest) = match raw.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let (hours, minutes) = match rest.split_once(':') {
            Some((h, m)) => (h.parse::<i32>()?, m.parse::<i32>()?),
            None => (rest.parse::<i32>()?, 0),
        };
        if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
            bail!("offset out of range: {}", raw);
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .with_context(|| format!("invalid offset {}", raw))
    }

}

pub use crate::app::{parse_offset, print_json};
