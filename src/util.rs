//! Small socket helpers shared by tests and applications

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// A connected pair of blocking std streams over loopback.
///
/// The first element is the connecting side, the second the accepted one.
pub fn tcp_pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let client = TcpStream::connect(listener.local_addr()?)?;
    let (server, _) = listener.accept()?;
    Ok((client, server))
}

fn invalid(s: &str, why: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{s:?}: {why}"))
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port` into an address.
///
/// Without a port, `default_port` is used. Host names are resolved through
/// the system resolver (blocking) and the first result wins.
pub fn parse_endpoint(s: &str, default_port: u16) -> io::Result<SocketAddr> {
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid(s, "empty endpoint"));
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid(s, "unterminated '['"))?;
        let port = match tail {
            "" => None,
            _ => Some(
                tail.strip_prefix(':')
                    .ok_or_else(|| invalid(s, "expected ':' after ']'"))?,
            ),
        };
        (host, port)
    } else if s.matches(':').count() > 1 {
        // Bare IPv6 literal, no port.
        (s, None)
    } else {
        match s.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        }
    };

    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| invalid(s, "bad port"))?,
        None => default_port,
    };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    if host.is_empty() {
        return Err(invalid(s, "missing host"));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| invalid(s, "host did not resolve"))
}
