//! # EoIP
//!
//! `eoip` provides Rust APIs for the EoIP / EoIPv6 point-to-point ethernet over ip tunnel.
//!
//! ### Ethernet over ip tunnel
//!
//! Every ethernet frame read from a local tap interface is prefixed with a tunnel header and sent
//! as one raw IP datagram to the remote endpoint, and vice versa. Two wire variants exist:
//!
//! * EoIP over IPv4, GRE protocol number (47), 8 byte header (magic, length, tunnel id).
//! * EoIPv6 over IPv6, EtherIP protocol number (97), 2 byte header carrying the tunnel id.
//!
//! Both endpoints must agree on the 16 bit tunnel id; datagrams of other tunnels are dropped
//! silently.
//!
//! ### Forwarding model
//!
//! A sender task moves frames from the tap to the network and a writer task moves datagrams from
//! the network to the tap. A supervisor restarts the writer whenever it fails; the sender is not
//! restarted by default.
//!
//! ### Example
//! ```rust,no_run
//! use std::net::IpAddr;
//! use eoip::config::{AddressFamily, TunnelConfig};
//! use eoip::tunnel;
//! use structopt::StructOpt;
//!
//! #[macro_use]
//! extern crate log;
//!
//! use env_logger::Env;
//!
//! #[derive(StructOpt, Debug)]
//! #[structopt(name = "eoip")]
//! struct Opt {
//!     interface: String,
//!     #[structopt(short, long)]
//!     remote: IpAddr,
//!     #[structopt(short, long)]
//!     local: IpAddr,
//!     #[structopt(short, long = "id")]
//!     tid: u16,
//! }
//!
//! fn main() {
//!     let env = Env::default()
//!         .filter_or("EOIP_LOG_LEVEL", "info")
//!         .write_style_or("EOIP_LOG_STYLE", "always");
//!
//!     env_logger::init_from_env(env);
//!
//!     let args = Opt::from_args();
//!
//!     debug!("args: {:?}", args);
//!
//!     let config = TunnelConfig::new(AddressFamily::V4, args.local, args.remote, args.tid, &args.interface).unwrap();
//!     tunnel::main(config).unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod forward;
pub mod raw;
pub mod supervisor;
pub mod tap;
pub mod transport;
pub mod tunnel;

#[macro_use]
extern crate log;
