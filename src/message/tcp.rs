use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::{transport::Transport, util};
use crate::error::{Error, Result};
use crate::topology::Rank;

const RETRY_WAIT: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(2000);
const CONNECT_ATTEMPTS: usize = 40;

/// Envelopes are a few dozen bytes; anything near this size is a corrupt or
/// foreign stream.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

type Outbound = (Rank, Vec<u8>);

/// A transport where every rank is a separate process listening on its own
/// socket address. Outbound messages are written by a single background
/// thread, one lazily-opened connection per peer. Each frame is acknowledged
/// by the receiver with the number of bytes it read. Inbound connections are
/// served by one thread each, all feeding a single channel. Dropping the
/// transport stops accepting connections and releases the listening port.
///
pub struct TcpTransport {
    rank: Rank,
    size: usize,
    send_sink: Option<Sender<Outbound>>,
    recv_src: Receiver<Vec<u8>>,
    send_thread: Option<JoinHandle<Result<()>>>,
    listen_addr: SocketAddr,
    listen_stop: Option<Sender<()>>,
    listen_thread: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Bind this rank's address from the peer table and start serving it.
    ///
    pub fn bind(rank: Rank, peers: Vec<SocketAddr>) -> Result<Self> {
        let addr = *peers.get(rank).ok_or(Error::InvalidRank {
            rank,
            size: peers.len(),
        })?;
        let listener = TcpListener::bind(addr)?;
        Self::from_listener(rank, peers, listener)
    }

    /// Start serving an already-bound listener. Useful when the listening
    /// addresses are not known until the sockets are bound (port 0).
    ///
    pub fn from_listener(rank: Rank, peers: Vec<SocketAddr>, listener: TcpListener) -> Result<Self> {
        if rank >= peers.len() {
            return Err(Error::InvalidRank {
                rank,
                size: peers.len(),
            });
        }
        let size = peers.len();
        let listen_addr = listener.local_addr()?;

        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers, send_src);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let (listen_stop, stop_src) = crossbeam_channel::bounded(0);
        let listen_thread = Self::start_listener(listener, recv_sink, stop_src);

        Ok(Self {
            rank,
            size,
            send_sink: Some(send_sink),
            recv_src,
            send_thread: Some(send_thread),
            listen_addr,
            listen_stop: Some(listen_stop),
            listen_thread: Some(listen_thread),
        })
    }

    /// The address this rank is accepting connections on.
    ///
    pub fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Stop accepting outbound messages and block until everything already
    /// queued has been acknowledged by its receiver.
    ///
    pub fn flush(mut self) -> Result<()> {
        self.shutdown_sender()
    }

    fn shutdown_sender(&mut self) -> Result<()> {
        self.send_sink.take();
        match self.send_thread.take() {
            Some(handle) => handle.join().unwrap_or(Err(Error::TransportClosed)),
            None => Ok(()),
        }
    }

    /// Tell the accept loop to stop, then wake it with a connection of our own
    /// so it sees the request.
    fn stop_listener(&mut self) {
        self.listen_stop.take();
        let handle = match self.listen_thread.take() {
            Some(handle) => handle,
            None => return,
        };
        let mut wake_addr = self.listen_addr;
        match wake_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => wake_addr.set_ip(Ipv4Addr::LOCALHOST.into()),
            IpAddr::V6(ip) if ip.is_unspecified() => wake_addr.set_ip(Ipv6Addr::LOCALHOST.into()),
            _ => {}
        }
        match TcpStream::connect(wake_addr) {
            Ok(_) => {
                if handle.join().is_err() {
                    error!("Listener thread on {} panicked", self.listen_addr);
                }
            }
            Err(e) => warn!("Could not stop listener on {}: {}", self.listen_addr, e),
        }
    }

    fn start_serial_sender(peers: Vec<SocketAddr>, send_src: Receiver<Outbound>) -> JoinHandle<Result<()>> {
        thread::spawn(move || -> Result<()> {
            let mut table: HashMap<Rank, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                let addr = *peers.get(rank).ok_or(Error::InvalidRank {
                    rank,
                    size: peers.len(),
                })?;
                if !table.contains_key(&rank) {
                    table.insert(rank, Self::connect_with_retry(addr)?);
                }
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let client = table
                        .get_mut(&rank)
                        .ok_or(Error::PeerDisconnected { rank })?;
                    match Self::write_acked(client, &message) {
                        Ok(()) => break,
                        Err(e) if attempt < 2 => {
                            warn!("Failed to send message to {}: {}, reconnecting", addr, e);
                            table.insert(rank, Self::connect_with_retry(addr)?);
                        }
                        Err(e) => {
                            error!("Giving up on {}: {}", addr, e);
                            return Err(e);
                        }
                    }
                }
            }
            debug!("Outbound channel closed, sender stopping");
            Ok(())
        })
    }

    fn write_acked(client: &mut TcpStream, message: &[u8]) -> Result<()> {
        util::write_frame(client, message)?;
        let acked = util::read_usize(client)?;
        if acked != message.len() {
            return Err(Error::AckMismatch {
                sent: message.len(),
                acked,
            });
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: Sender<Vec<u8>>, stop: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening to: {}", addr);
            }
            for stream in listener.incoming() {
                if let Err(TryRecvError::Disconnected) = stop.try_recv() {
                    debug!("Listener stopping");
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let _handler = Self::handle_connection(stream, recv_sink.clone());
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(stream: TcpStream, recv_sink: Sender<Vec<u8>>) -> JoinHandle<()> {
        let remote = stream.peer_addr().ok();
        info!("Receiving connection from {:?}", remote);
        thread::spawn(move || {
            if let Err(e) = Self::serve_connection(stream, recv_sink) {
                error!("Dropping connection from {:?}: {}", remote, e);
            }
        })
    }

    fn serve_connection(mut stream: TcpStream, recv_sink: Sender<Vec<u8>>) -> Result<()> {
        loop {
            let size = match util::read_usize(&mut stream) {
                Ok(size) => size,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("Connection from {:?} closed", stream.peer_addr().ok());
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            if size > MAX_FRAME_BYTES {
                return Err(Error::FrameTooLarge {
                    size,
                    max: MAX_FRAME_BYTES,
                });
            }
            let bytes = util::read_bytes_vec(&mut stream, size)?;
            let num_bytes = bytes.len();
            recv_sink.send(bytes).map_err(|_| Error::TransportClosed)?;
            util::write_usize(&mut stream, num_bytes)?;
        }
    }

    fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
        debug!("Connecting to {}...", addr);
        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(CONNECT_ATTEMPTS)
            .retry(
                || TcpStream::connect(addr),
                |e, delay| {
                    debug!("Connect to {} failed: {}, retrying in {:?}", addr, e, delay);
                    thread::sleep(delay);
                },
            )
            .unwrap_or_else(|| TcpStream::connect(addr))
            .map_err(Error::from)
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, rank: Rank, message: Vec<u8>) -> Result<()> {
        self.send_sink
            .as_ref()
            .ok_or(Error::TransportClosed)?
            .send((rank, message))
            .map_err(|_| Error::TransportClosed)
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.recv_src.recv().map_err(|_| Error::TransportClosed)
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        match self.recv_src.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::TransportClosed),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_sender() {
            error!("Outbound messages may have been lost: {}", e);
        }
        self.stop_listener();
    }
}
