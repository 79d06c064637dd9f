//! Binary entrypoint for the cidrelay daemon.
//!
//! Commands:
//! - `start [--port <tty>] [--no-serial] [--listen <port>]` - run the relay in the foreground
//! - `init` - write a starter `cidrelay.toml`
//! - `check` - validate the configuration and print a JSON summary
//! - `probe --port <tty> [-b <baud>]` - send the modem init string and report the reply
//!
//! See the library crate docs for module-level details: `cidrelay::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::str::FromStr;

use cidrelay::config::Config;
use cidrelay::device::{modem::READTRY, SerialDevice};
use cidrelay::policy::ListPolicy;
use cidrelay::server::signals::SignalFlags;
use cidrelay::server::CidServer;

#[derive(Parser)]
#[command(name = "cidrelay")]
#[command(about = "Caller-ID relay daemon for modems, Caller-ID boxes and TCP gateways")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "cidrelay.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start {
        /// Caller-ID serial device (e.g., /dev/ttyACM0)
        #[arg(short, long)]
        port: Option<String>,

        /// Run without a serial device; gateways supply all call data
        #[arg(long)]
        no_serial: bool,

        /// TCP port for clients
        #[arg(short, long)]
        listen: Option<u16>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration and print a summary
    Check,
    /// Send the init string to a modem and print its reply
    Probe {
        /// Modem serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 19200)]
        baud: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };

    match cli.command {
        Commands::Start {
            port,
            no_serial,
            listen,
        } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            if let Some(port) = port {
                config.device.ttyport = port;
            }
            if no_serial {
                config.device.noserial = true;
            }
            if let Some(listen) = listen {
                config.server.port = listen;
            }
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting cidrelay v{}", env!("CARGO_PKG_VERSION"));
            config.validate()?;

            let flags = SignalFlags::new();
            flags.listen().context("installing signal handlers")?;
            let mut server = CidServer::new(config)?.with_flags(flags);
            server.start()?;
            tokio::task::spawn_blocking(move || server.run()).await??;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Check => {
            init_logging(&pre_config, cli.verbose);
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let validation = config.validate();
            let aliases = ListPolicy::load(&config.lists).map(|p| p.alias_count());
            let device = (!config.device.noserial).then(|| config.device.ttyport.clone());
            let payload = serde_json::json!({
                "config": cli.config,
                "valid": validation.is_ok(),
                "error": validation.as_ref().err().map(|e| e.to_string()),
                "port": config.server.port,
                "max_clients": config.server.max_clients,
                "device": device,
                "modem": !config.device.noserial && !config.device.nomodem,
                "hangup": config.lists.hangup,
                "aliases": aliases.as_ref().ok(),
                "policy_error": aliases.as_ref().err().map(|e| e.to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            if validation.is_err() || aliases.is_err() {
                std::process::exit(1);
            }
        }
        Commands::Probe { port, baud } => {
            init_logging(&pre_config, cli.verbose);
            let mut device_cfg = pre_config.map(|c| c.device).unwrap_or_default();
            device_cfg.ttyport = port.clone();
            device_cfg.ttyspeed = baud;
            let mut device = SerialDevice::open(&device_cfg)?;
            info!("Probing modem on {} @ {} baud", port, baud);
            let reply = device.command(&device_cfg.initstr, READTRY)?;
            device.restore();
            let payload = serde_json::json!({
                "port": port,
                "baud": baud,
                "command": device_cfg.initstr,
                "reply": format!("{:?}", reply),
                "ok": reply == cidrelay::device::ModemReply::Ok,
            });
            println!("{}", payload);
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| log::LevelFilter::from_str(&c.logging.level).ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.as_ref()).and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only in the foreground
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Local::now().format("%m/%d/%Y %H:%M:%S");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Local::now().format("%m/%d/%Y %H:%M:%S");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
