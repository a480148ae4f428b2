//! Listening-socket factory.
//!
//! Builds the non-blocking IPv4 listener with `SO_REUSEADDR` and the
//! configured kernel buffer sizes before handing it to the poll registry.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;

/// Create a bound, listening, non-blocking TCP socket on `0.0.0.0:port`.
pub fn create_listener(config: &Config) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(config.recv_buffer)?;
    socket.set_send_buffer_size(config.send_buffer)?;
    socket.set_nonblocking(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    socket.bind(&addr.into())?;
    socket.listen(config.backlog as i32)?;

    Ok(socket.into())
}
