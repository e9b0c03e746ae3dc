use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jadwal_core::{Config, TickSource};
use jadwalcli::{parse_offset, print_json, JadwalCliApp};
use log::LevelFilter;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jadwalcli", version, about = "Prayer-time service native layer simulator")]
struct Cli {
    /// Directory holding the preference stores
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// UTC offset used for display, e.g. +07:00 (defaults to local)
    #[arg(long, global = true)]
    utc_offset: Option<String>,

    /// Answer liveness probes as a healthy main context
    #[arg(long, global = true)]
    responsive: bool,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Alarm,
    Periodic,
    Retry,
}

impl From<Source> for TickSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Alarm => TickSource::Alarm,
            Source::Periodic => TickSource::PeriodicJob,
            Source::Retry => TickSource::RetryJob,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print stores, boot state and pending schedules
    Status,
    /// Store a heartbeat as the application would
    Heartbeat,
    /// Run one watchdog cycle
    Tick {
        #[arg(long, value_enum, default_value = "alarm")]
        source: Source,
    },
    /// Change the watchdog interval and reschedule
    SetInterval { minutes: i64 },
    /// Write key=value pairs to the native store
    Persist { pairs: Vec<String> },
    /// Render the home-screen widget
    Widget {
        #[arg(long, default_value_t = 0)]
        min_width: u32,
        #[arg(long)]
        legacy: bool,
    },
    /// Render the persistent panel
    Panel,
    /// Invoke a bridge method with JSON arguments
    Call {
        channel: String,
        method: String,
        args: Option<String>,
    },
    /// Deliver the boot-completed signal
    Boot,
    /// Format a stored time value for display
    FormatTime { raw: String },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config_dir {
        Some(dir) => Config::with_dir(dir)?,
        None => Config::new()?,
    };
    let tz = cli.utc_offset.as_deref().map(parse_offset).transpose()?;
    let mut app = JadwalCliApp::new(config, tz)?;
    if cli.responsive {
        app.attach_responder();
    }

    let command = match cli.command {
        Some(command) => command,
        None => return app.run(),
    };

    match command {
        Command::Status => print_json(&app.status()?)?,
        Command::Heartbeat => println!("{}", app.host().report_heartbeat()?),
        Command::Tick { source } => print_json(&app.tick(source.into()))?,
        Command::SetInterval { minutes } => match app.host().watchdog().set_interval(minutes)? {
            Some(next) => println!("Next watchdog tick at {}", next),
            None => println!("Interval stored; alarm refused, periodic job only"),
        },
        Command::Persist { pairs } => match app.persist(&pairs) {
            Ok(result) => println!("{}", result),
            Err(e) => bail!("{}", e),
        },
        Command::Widget { min_width, legacy } => print_json(&app.widget(min_width, legacy)?)?,
        Command::Panel => {
            let (title, text) = app.panel();
            println!("{}\n{}", title, text);
        }
        Command::Call { channel, method, args } => {
            let args: Value = match args {
                Some(raw) => serde_json::from_str(&raw).context("Arguments must be JSON")?,
                None => Value::Null,
            };
            match app.call(&channel, &method, args) {
                Ok(result) => print_json(&result)?,
                Err(e) => bail!("{}", e),
            }
        }
        Command::Boot => {
            app.boot();
            println!("Boot handled");
        }
        Command::FormatTime { raw } => println!("{}", app.format_time(&raw)),
    }

    Ok(())
}
