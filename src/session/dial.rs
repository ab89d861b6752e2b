//! Outbound connection establishment

use crate::error::Result;
use socket2::{Domain, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Well-known local ports for the fixed-port dial mode.
///
/// Closed networks pin client source ports so firewall/NAT rules can be
/// written against them; the first bindable port of the three is used.
pub const FIXED_LOCAL_PORTS: [u16; 3] = [46100, 46101, 46102];

/// Dial `remote` within `timeout`.
///
/// With `fixed_local_port` the socket is bound to one of
/// [`FIXED_LOCAL_PORTS`] before connecting (`SO_REUSEADDR` set, since the
/// previous connection from the same port is likely still in TIME_WAIT);
/// otherwise the OS picks an ephemeral port.
pub fn connect(remote: SocketAddr, timeout: Duration, fixed_local_port: bool) -> Result<TcpStream> {
    let stream = if fixed_local_port {
        connect_from_fixed_port(remote, timeout)?
    } else {
        TcpStream::connect_timeout(&remote, timeout)?
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn connect_from_fixed_port(remote: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let unspecified: IpAddr = match remote {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };

    let mut last_err = None;
    for port in FIXED_LOCAL_PORTS {
        let socket = Socket::new(Domain::for_address(remote), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        let local = SocketAddr::new(unspecified, port);
        if let Err(e) = socket.bind(&local.into()) {
            log::debug!("local port {port} unavailable: {e}");
            last_err = Some(e);
            continue;
        }
        socket.connect_timeout(&remote.into(), timeout)?;
        return Ok(socket.into());
    }

    Err(last_err
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrInUse, "no fixed port free"))
        .into())
}
