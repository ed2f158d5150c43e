use std::cmp::Ordering;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::handshake;
use crate::stream::LinkStream;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_HOST_LEN: usize = 256;

/// Configuration for establishing the peer link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Port this peer listens on.
    pub local_port: u16,
    /// IPv4 address of the remote peer.
    pub remote_host: String,
    /// Port the remote peer listens on.
    pub remote_port: u16,
    /// How long to keep trying to reach the peer.
    pub timeout: Duration,
    /// Per-pipe receive buffer capacity advertised to the peer.
    pub pipe_capacity: usize,
}

impl LinkConfig {
    fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// An established peer link with the negotiated capacities.
#[derive(Debug)]
pub struct PeerSession {
    /// The single bidirectional stream shared by both peers.
    pub stream: LinkStream,
    /// Capacity this side buffers per pipe.
    pub local_capacity: usize,
    /// Capacity the peer buffers per pipe (the credit baseline).
    pub remote_capacity: usize,
}

/// Establish the peer link.
///
/// Both peers listen and connect simultaneously, producing two connections;
/// each side keeps the one selected by [`endpoint_cmp`] so both agree on a
/// single stream. The survivor then carries the capacity handshake.
pub fn establish(config: &LinkConfig) -> Result<PeerSession> {
    let remote_ip: Ipv4Addr = parse_host(&config.remote_host)?;

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.local_port)).map_err(|e| {
        TransportError::Bind {
            port: config.local_port,
            source: e,
        }
    })?;
    listener.set_nonblocking(true)?;

    let deadline = Instant::now() + config.timeout;
    let remote_addr = SocketAddr::from((remote_ip, config.remote_port));

    let mut outbound = connect_with_retry(remote_addr, deadline, config)?;
    debug!(addr = %config.remote_addr(), "outbound connection up");

    let mut accepted = accept_with_deadline(&listener, deadline, config.timeout)?;
    accepted.set_nonblocking(false).map_err(TransportError::Io)?;
    debug!("inbound connection up");

    // Each side announces the host it believes it is talking to; comparing
    // the two views gives both peers the same total order on endpoints.
    write_host(&mut outbound, &config.remote_host)?;
    let received = read_host(&mut accepted)?;

    let stream = match endpoint_cmp(
        &config.remote_host,
        config.local_port,
        &received,
        config.remote_port,
    )? {
        Ordering::Greater => {
            drop(outbound);
            accepted
        }
        Ordering::Less => {
            drop(accepted);
            outbound
        }
        Ordering::Equal => return Err(TransportError::SelfConnection),
    };
    drop(listener);

    stream.set_nodelay(true)?;
    let mut link = LinkStream::from_tcp(stream);
    let peer = handshake::exchange(&mut link, config.pipe_capacity)?;

    info!(
        remote = %config.remote_addr(),
        local_capacity = config.pipe_capacity,
        remote_capacity = peer.pipe_capacity,
        "peer link established"
    );

    Ok(PeerSession {
        stream: link,
        local_capacity: config.pipe_capacity,
        remote_capacity: peer.pipe_capacity,
    })
}

fn parse_host(host: &str) -> Result<Ipv4Addr> {
    host.parse::<Ipv4Addr>().map_err(|_| {
        TransportError::HandshakeFailed(format!("'{host}' is not a valid IPv4 address"))
    })
}

fn connect_with_retry(
    addr: SocketAddr,
    deadline: Instant,
    config: &LinkConfig,
) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if Instant::now() >= deadline {
                    debug!(%addr, error = %err, "giving up on outbound connection");
                    return Err(TransportError::Connect {
                        addr: config.remote_addr(),
                        source: err,
                    });
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
        }
    }
}

fn accept_with_deadline(
    listener: &TcpListener,
    deadline: Instant,
    timeout: Duration,
) -> Result<TcpStream> {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "accepted peer connection");
                return Ok(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout(timeout));
                }
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => return Err(TransportError::Accept(err)),
        }
    }
}

fn write_host<W: Write>(stream: &mut W, host: &str) -> Result<()> {
    stream.write_all(&(host.len() as u32).to_le_bytes())?;
    stream.write_all(host.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn read_host<R: Read>(stream: &mut R) -> Result<String> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_HOST_LEN {
        return Err(TransportError::HandshakeFailed(format!(
            "invalid host length in endpoint exchange: {len}"
        )));
    }

    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| {
        TransportError::HandshakeFailed("endpoint host is not valid UTF-8".to_string())
    })
}

/// Compare two endpoints by IPv4 octets, then by port.
///
/// Both peers evaluate this with mirrored arguments, so they reach opposite
/// orderings and agree on which of the two connections survives.
fn endpoint_cmp(
    first_host: &str,
    first_port: u16,
    second_host: &str,
    second_port: u16,
) -> Result<Ordering> {
    let first = parse_host(first_host)?;
    let second = parse_host(second_host)?;

    match first.octets().cmp(&second.octets()) {
        Ordering::Equal => Ok(first_port.cmp(&second_port)),
        order => Ok(order),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn endpoint_cmp_orders_by_host_then_port() {
        assert_eq!(
            endpoint_cmp("10.0.0.2", 1, "10.0.0.1", 9).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            endpoint_cmp("10.0.0.1", 9, "10.0.0.2", 1).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            endpoint_cmp("127.0.0.1", 7000, "127.0.0.1", 8000).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            endpoint_cmp("127.0.0.1", 8000, "127.0.0.1", 7000).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            endpoint_cmp("127.0.0.1", 7000, "127.0.0.1", 7000).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn endpoint_cmp_rejects_bad_hosts() {
        assert!(endpoint_cmp("not-a-host", 1, "10.0.0.1", 2).is_err());
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn two_peers_collapse_to_one_link() {
        let port_a = free_port();
        let port_b = free_port();

        let config_a = LinkConfig {
            local_port: port_a,
            remote_host: "127.0.0.1".to_string(),
            remote_port: port_b,
            timeout: Duration::from_secs(10),
            pipe_capacity: 4096,
        };
        let config_b = LinkConfig {
            local_port: port_b,
            remote_host: "127.0.0.1".to_string(),
            remote_port: port_a,
            timeout: Duration::from_secs(10),
            pipe_capacity: 8192,
        };

        let peer_a = thread::spawn(move || establish(&config_a).unwrap());
        let mut session_b = establish(&config_b).unwrap();
        let mut session_a = peer_a.join().unwrap();

        assert_eq!(session_a.remote_capacity, 8192);
        assert_eq!(session_b.remote_capacity, 4096);

        // Both sides kept the same connection.
        session_a.stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        session_b.stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        session_b.stream.write_all(b"pong").unwrap();
        session_a.stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
