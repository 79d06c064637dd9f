//! # cidrelay - Caller-ID relay daemon
//!
//! cidrelay reads Caller-ID data from a modem or Caller-ID box on a serial
//! line, and from gateway programs connected over TCP, turns it into one
//! canonical call line, logs it, and sends it to every connected client
//! using a small CRLF line protocol.
//!
//! ## Features
//!
//! - **Three device formats**: modem `KEY = value` lines, the 70 column TCI
//!   format, and the `###...+++` gateway format.
//! - **Alias, blacklist and whitelist** substitution with optional modem
//!   hangup of blacklisted callers.
//! - **Client requests**: call log replay, list editing through a helper,
//!   caller lookups and call log updates.
//! - **Single poll loop**: one thread multiplexes the device, the listening
//!   socket and every client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cidrelay::config::Config;
//! use cidrelay::server::CidServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("cidrelay.toml").await?;
//!     config.validate()?;
//!
//!     let mut server = CidServer::new(config)?;
//!     server.start()?;
//!     tokio::task::spawn_blocking(move || server.run()).await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`server`] - poll loop, connection slots, client protocol handler, log sink
//! - [`cid`] - Caller-ID line formatter and its call accumulator
//! - [`protocol`] - wire constants and client line classification
//! - [`policy`] - alias and blacklist/whitelist lookups
//! - [`device`] - serial device and modem commands
//! - [`config`] - configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │  Serial device  │      │ Gateways/clients│
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌──────────────────────────────────────────┐
//! │        CidServer poll loop (server)      │
//! └──────────────────────────────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │  LineFormatter  │      │ Protocol handler│
//! │  (cid)          │      │ (server/handler)│
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌──────────────────────────────────────────┐
//! │   Call log, data log, client broadcast   │
//! └──────────────────────────────────────────┘
//! ```

pub mod cid;
pub mod config;
pub mod device;
pub mod error;
pub mod helpers;
pub mod logutil;
pub mod pidfile;
pub mod policy;
pub mod protocol;
pub mod server;
