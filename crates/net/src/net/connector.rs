use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::error::{NetError, Result};

/// Resolves `host:port` and connects to the first candidate address that
/// accepts, trying them in resolver order. Both address families are tried.
pub fn connect(host: &str, port: u16) -> Result<(TcpStream, SocketAddr)> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetError::Resolve {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        })?
        .collect();

    connect_any(host, port, &candidates)
}

pub fn connect_any(
    host: &str,
    port: u16,
    candidates: &[SocketAddr],
) -> Result<(TcpStream, SocketAddr)> {
    if candidates.is_empty() {
        return Err(NetError::Resolve {
            host: host.to_string(),
            port,
            reason: "no addresses found".to_string(),
        });
    }

    let mut last_error = None;
    for addr in candidates {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                log::info!("connected to {}:{}", addr.ip(), addr.port());
                return Ok((stream, *addr));
            }
            Err(e) => {
                log::debug!("connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(NetError::Connect {
        host: host.to_string(),
        port,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no usable address")),
    })
}
