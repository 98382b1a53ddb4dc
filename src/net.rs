//! UDP Endpoint (spec §4.H): three sockets, a blocking receive loop, and a
//! bounded worker pool. Reimplements
//! `original_source/src/libpydhcpserver/dhcp_network.py`'s
//! `DHCPNetwork._createSocket`/`_getNextDHCPPacket`/`_sendDHCPPacketTo` with
//! blocking `std::net::UdpSocket` plus a bounded thread pool instead of
//! async/`embassy`/`edge-nal`, per spec §9's redesign note that a bounded
//! pool is preferable to unbounded thread-per-packet.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::SocketError;
use crate::packet::Packet;
use crate::pipeline::{Outcome, Pipeline};

const MAX_DATAGRAM: usize = 1500;

/// Binds the three sockets spec §4.H names: a shared `dhcp_socket` on
/// `0.0.0.0:67`, a per-server `response_socket` on `server_ip:0` used only to
/// send (dodging broadcast-induced source-address rewriting on some stacks),
/// and an optional `pxe_socket` on `0.0.0.0:4011`.
pub struct Endpoint {
    dhcp_socket: UdpSocket,
    response_socket: UdpSocket,
    pxe_socket: Option<UdpSocket>,
}

impl Endpoint {
    pub fn bind(server_ip: std::net::Ipv4Addr, pxe_port: Option<u16>) -> Result<Self, SocketError> {
        let dhcp_addr = SocketAddr::V4(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 67));
        let dhcp_socket = bind_reuseaddr(dhcp_addr)?;
        dhcp_socket
            .set_broadcast(true)
            .map_err(|source| SocketError::Bind { addr: dhcp_addr, source })?;

        let response_addr = SocketAddr::V4(SocketAddrV4::new(server_ip, 0));
        let response_socket = UdpSocket::bind(response_addr).map_err(|source| SocketError::Bind {
            addr: response_addr,
            source,
        })?;
        response_socket
            .set_broadcast(true)
            .map_err(|source| SocketError::Bind { addr: response_addr, source })?;

        let pxe_socket = pxe_port
            .map(|port| {
                bind_reuseaddr(SocketAddr::V4(SocketAddrV4::new(
                    std::net::Ipv4Addr::UNSPECIFIED,
                    port,
                )))
            })
            .transpose()?;

        Ok(Self {
            dhcp_socket,
            response_socket,
            pxe_socket,
        })
    }

    pub fn send(&self, data: &[u8], destination: SocketAddr) -> Result<(), SocketError> {
        self.response_socket
            .send_to(data, destination)
            .map_err(SocketError::Send)?;
        Ok(())
    }
}

fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket, SocketError> {
    use socket2::{Domain, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(|source| SocketError::Bind {
        addr,
        source,
    })?;
    socket.set_reuse_address(true).map_err(|source| SocketError::Bind { addr, source })?;
    socket
        .bind(&addr.into())
        .map_err(|source| SocketError::Bind { addr, source })?;
    Ok(socket.into())
}

enum Job {
    Packet {
        data: Vec<u8>,
        source: SocketAddr,
        pxe: bool,
    },
    Tick,
    Shutdown,
}

/// Queue depth per worker before `dispatch` starts dropping packets instead
/// of blocking the receive loop.
const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// A fixed-size worker pool backed by a bounded channel: once the queue is
/// full, `dispatch` drops the packet instead of growing unbounded, per spec
/// §9's explicit preference over unbounded thread-per-packet.
pub struct WorkerPool {
    sender: SyncSender<Job>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(pipeline: Arc<Pipeline>, endpoint: Arc<Endpoint>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(worker_count * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(std::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let pipeline = Arc::clone(&pipeline);
                let endpoint = Arc::clone(&endpoint);
                thread::Builder::new()
                    .name(format!("static-dhcpd-worker-{id}"))
                    .spawn(move || worker_loop(id, receiver, pipeline, endpoint))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { sender, workers }
    }

    /// Enqueues a packet for processing; drops it (with a log line) if every
    /// worker is already saturated, rather than growing unbounded.
    pub fn dispatch(&self, data: Vec<u8>, source: SocketAddr, pxe: bool) {
        match self.sender.try_send(Job::Packet { data, source, pxe }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("worker pool saturated; dropping packet from {source}"),
            Err(TrySendError::Disconnected(_)) => {
                warn!("worker pool channel closed; dropping packet from {source}")
            }
        }
    }

    pub fn tick(&self) {
        let _ = self.sender.try_send(Job::Tick);
    }

    pub fn shutdown(self) {
        for _ in &self.workers {
            let _ = self.sender.send(Job::Shutdown);
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    id: usize,
    receiver: Arc<std::sync::Mutex<Receiver<Job>>>,
    pipeline: Arc<Pipeline>,
    endpoint: Arc<Endpoint>,
) {
    debug!("worker {id} started");
    loop {
        let job = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };

        match job {
            Ok(Job::Packet { data, source, pxe }) => {
                process_one(&pipeline, &endpoint, &data, source, pxe);
            }
            Ok(Job::Tick) => pipeline.tick(Instant::now()),
            Ok(Job::Shutdown) | Err(_) => break,
        }
    }
    debug!("worker {id} stopped");
}

fn process_one(pipeline: &Pipeline, endpoint: &Endpoint, data: &[u8], source: SocketAddr, pxe: bool) {
    let packet = match Packet::decode(data, Some(source), pxe) {
        Ok(packet) => packet,
        Err(err) => {
            warn!("dropping malformed packet from {source}: {err}");
            return;
        }
    };

    match pipeline.handle(packet, Instant::now()) {
        Outcome::Reply { packet, destination } => {
            let encoded = packet.encode();
            if let Err(err) = endpoint.send(&encoded, destination.addr) {
                error!("failed to send reply to {}: {err}", destination.addr);
            }
        }
        Outcome::NoReply | Outcome::Dropped => {}
    }
}

/// Drives the receive loop for one bound socket (`dhcp_socket` or
/// `pxe_socket`) until told to stop; one call per socket, each on its own
/// thread, feeding the shared worker pool.
pub fn serve_socket(
    socket: &UdpSocket,
    pxe: bool,
    pool: &WorkerPool,
    alive: &AtomicBool,
) -> Result<(), SocketError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .map_err(SocketError::Recv)?;

    while alive.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                pool.dispatch(buf[..len].to_vec(), source, pxe);
            }
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => return Err(SocketError::Recv(err)),
        }
    }

    Ok(())
}

pub fn dhcp_socket(endpoint: &Endpoint) -> &UdpSocket {
    &endpoint.dhcp_socket
}

pub fn pxe_socket(endpoint: &Endpoint) -> Option<&UdpSocket> {
    endpoint.pxe_socket.as_ref()
}
