//! UDP endpoint for the LAN backend.
//!
//! The socket is driven by a private single-worker tokio runtime. A receive
//! task copies every datagram into a crossbeam queue; the transport drains
//! that queue from `tick` on the caller's thread. Sends go straight out with
//! `try_send_to` and never block.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};
use rift_netproto::limits::RX_BUFFER_SIZE;
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::NetplayError;

/// Largest payload a single UDP datagram can carry over IPv4.
pub(crate) const MAX_UDP_PAYLOAD: usize = 65_507;

#[derive(Debug)]
pub(crate) struct Inbound {
    pub from: SocketAddr,
    pub bytes: Bytes,
}

pub(crate) struct LanSocket {
    runtime: Runtime,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    inbound: Receiver<Inbound>,
    cancel: CancellationToken,
}

impl LanSocket {
    /// Bind the first free port among `ports` and start receiving.
    pub(crate) fn bind(ip: IpAddr, ports: &[u16]) -> Result<Self, NetplayError> {
        let std_socket = bind_first_free(ip, ports)?;
        std_socket.set_broadcast(true)?;
        std_socket.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rift-lan-io")
            .enable_io()
            .build()?;

        let socket = {
            let _guard = runtime.enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };
        let local_addr = socket.local_addr()?;

        let (tx, inbound) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();
        runtime.spawn(recv_loop(socket.clone(), tx, cancel.clone()));

        debug!(%local_addr, "LAN socket bound");
        Ok(Self {
            runtime,
            socket,
            local_addr,
            inbound,
            cancel,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one datagram. A full kernel buffer drops the datagram silently.
    pub(crate) fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), NetplayError> {
        if bytes.len() > MAX_UDP_PAYLOAD {
            return Err(NetplayError::SendFailed(format!(
                "datagram of {} bytes exceeds UDP limit",
                bytes.len()
            )));
        }
        match self.socket.try_send_to(bytes, addr) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(%addr, "send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn try_recv(&self) -> Option<Inbound> {
        match self.inbound.try_recv() {
            Ok(inbound) => Some(inbound),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("LAN receive task ended");
                None
            }
        }
    }

    /// Stop the receive task and release the port.
    pub(crate) fn close(self) {
        self.cancel.cancel();
        self.runtime.shutdown_background();
        debug!(local_addr = %self.local_addr, "LAN socket closed");
    }
}

fn bind_first_free(ip: IpAddr, ports: &[u16]) -> Result<StdUdpSocket, NetplayError> {
    let mut last_err = None;
    for &port in ports {
        match StdUdpSocket::bind(SocketAddr::new(ip, port)) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!(port, error = %e, "candidate port unavailable");
                last_err = Some(e);
            }
        }
    }
    Err(NetplayError::BindFailed(match last_err {
        Some(e) => format!("all candidate ports busy on {ip} ({e})"),
        None => "no candidate ports configured".to_string(),
    }))
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    tx: crossbeam_channel::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RX_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok((n, from)) => {
                    let inbound = Inbound {
                        from,
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if tx.send(inbound).is_err() {
                        break;
                    }
                }
                // ICMP port-unreachable surfaces here on some platforms.
                Err(e) => trace!(error = %e, "recv_from failed"),
            }
        }
    }
}
