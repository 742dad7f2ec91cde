use std::net::IpAddr;
use std::process::exit;
use std::str::FromStr;

use eoip::config::{AddressFamily, TunnelConfig};
use eoip::error::ConfigError;
use eoip::tunnel;
use eui48::{MacAddress, ParseError};
use structopt::StructOpt;

#[macro_use]
extern crate log;

use env_logger::Env;

#[derive(StructOpt, Debug)]
#[structopt(name = "eoip")]
/// EoIP / EoIPv6 point-to-point ethernet tunnel
struct Opt {
    #[structopt(short = "4", conflicts_with = "ipv6")]
    /// EoIP over IPv4 (default)
    ipv4: bool,

    #[structopt(short = "6", long = "ipv6")]
    /// EoIPv6 over IPv6
    ipv6: bool,

    #[structopt(env = "EOIP_INTERFACE")]
    /// tap interface name
    interface: String,

    #[structopt(short, long, parse(try_from_str), env = "EOIP_REMOTE")]
    /// remote tunnel endpoint address
    remote: IpAddr,

    #[structopt(short, long, parse(try_from_str), env = "EOIP_LOCAL")]
    /// local address the raw socket binds to
    local: IpAddr,

    #[structopt(short, long = "id", env = "EOIP_TID")]
    /// tunnel id, must match the remote side
    tid: u16,

    #[structopt(short, long, default_value = "1500", env = "EOIP_MTU")]
    /// tap interface mtu
    mtu: u32,

    #[structopt(long, default_value = "00:00:00:00:00:00", env = "EOIP_MAC", parse(try_from_str = parse_mac))]
    /// tap mac address (xx:xx:xx:xx:xx:xx), all zero keeps the kernel's choice
    mac: MacAddress,

    #[structopt(long)]
    /// bring the tap interface up
    up: bool,

    #[structopt(short, long, env = "EOIP_UID")]
    /// user id to switch to once the tunnel is set up
    uid: Option<u32>,

    #[structopt(short, long, env = "EOIP_GID")]
    /// group id to switch to once the tunnel is set up
    gid: Option<u32>,

    #[structopt(short, long)]
    /// fork to background and print the pid
    fork: bool,
}

fn parse_mac(mac_address: &str) -> Result<MacAddress, ParseError> {
    MacAddress::from_str(mac_address)
}

fn build_config(args: &Opt) -> Result<TunnelConfig, ConfigError> {
    let family = match (args.ipv4, args.ipv6) {
        (false, true) => AddressFamily::V6,
        _ => AddressFamily::V4,
    };

    Ok(TunnelConfig::new(family, args.local, args.remote, args.tid, &args.interface)?
        .with_mtu(args.mtu)?
        .with_mac(args.mac)
        .with_up(args.up)
        .with_owner(args.uid, args.gid))
}

fn main() {
    let env = Env::default()
        .filter_or("EOIP_LOG_LEVEL", "info")
        .write_style_or("EOIP_LOG_STYLE", "auto");

    env_logger::init_from_env(env);

    let args = Opt::from_args();

    debug!("args: {:?}", args);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    if args.fork {
        if let Err(e) = tunnel::daemonize() {
            error!("can't daemonize: {}", e);
            exit(1);
        }
    }

    if let Err(e) = tunnel::main(config) {
        error!("{}", e);
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_config() {
        let args = Opt::from_iter(&[
            "eoip", "-6", "eoip6", "--remote", "2001:db8::2", "--local", "2001:db8::1", "--id", "300", "--mtu", "1400",
        ]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.family(), AddressFamily::V6);
        assert_eq!(config.interface(), "eoip6");
        assert_eq!(config.tid(), 300);
        assert_eq!(config.mtu(), 1400);
        assert!(config.mac().is_none());
        assert!(!args.fork);
    }

    #[test]
    fn test_args_family_mismatch() {
        let args = Opt::from_iter(&["eoip", "eoip0", "-r", "2001:db8::2", "-l", "192.0.2.1", "-t", "1"]);
        assert!(matches!(build_config(&args), Err(ConfigError::FamilyMismatch { .. })));
    }
}
