//! EoIP tunnel setup and run loop
//!
//! Opens the tap interface and the raw socket once, applies the interface settings, drops
//! privileges and hands both descriptors to the [`Supervisor`] until the process is interrupted.

use std::io;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::signal;

use crate::config::TunnelConfig;
use crate::error::Error;
use crate::raw::RawSocket;
use crate::supervisor::Supervisor;
use crate::tap::TapInterface;

/// Fork to background. The parent prints the child's pid and exits, the child returns.
///
/// Call before any runtime or descriptor is created.
pub fn daemonize() -> io::Result<()> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid > 0 {
        println!("{}", pid);
        exit(0);
    }
    Ok(())
}

/// Switch to the configured group, then user. Zero or unset ids are left alone.
pub fn drop_privileges(uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    if let Some(gid) = gid {
        if unsafe { libc::setgid(gid) } < 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("switched to gid {}", gid);
    }
    if let Some(uid) = uid {
        if unsafe { libc::setuid(uid) } < 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("switched to uid {}", uid);
    }
    Ok(())
}

/// Run the EoIP tunnel described by `config` until ctrl-c.
///
/// # Example
/// ```no_run
/// use eoip::config::{AddressFamily, TunnelConfig};
/// use eoip::tunnel;
///
/// let config = TunnelConfig::new(
///     AddressFamily::V4,
///     "192.0.2.1".parse().unwrap(),
///     "198.51.100.7".parse().unwrap(),
///     100,
///     "eoip100",
/// ).unwrap();
///
/// tokio::runtime::Runtime::new().unwrap().block_on(async {
///     tunnel::tunnel(config).await.unwrap();
/// });
/// ```
pub async fn tunnel(config: TunnelConfig) -> Result<(), Error> {
    let tap = TapInterface::new(config.interface())?;

    if let Err(e) = tap.set_mtu(config.mtu()) {
        warn!(
            "can't set mtu ({}), please set mtu of {} to {} manually",
            e,
            tap.name(),
            config.mtu()
        );
    }

    if let Some(mac) = config.mac() {
        let mut local_mac = [0u8; 6];
        local_mac.copy_from_slice(mac.as_bytes());
        tap.set_mac_address(&local_mac)?;
    }

    if config.up() {
        tap.set_up()?;
    }

    let socket = RawSocket::from_config(&config)?;

    drop_privileges(config.uid(), config.gid())?;

    info!("attached to {}", config);

    let supervisor = Supervisor::new(Arc::new(config), Arc::new(tap), Arc::new(socket));

    tokio::select! {
        _ = supervisor.run() => {
            error!("tunnel stopped forwarding");
        },
        _ = signal::ctrl_c() => {
            info!("Bye!");
        }
    }
    Ok(())
}

/// Wrapper function to run the tunnel in blocking mode.
pub fn main(config: TunnelConfig) -> Result<(), Error> {
    let runtime = Runtime::new()?;
    let result = runtime.block_on(tunnel(config));
    runtime.shutdown_timeout(Duration::from_secs(0));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_privileges_noop() {
        drop_privileges(None, None).unwrap();
    }
}
