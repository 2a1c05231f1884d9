//! Agent end of the datagram channel
//!
//! Every reporter owns its own link, so sends and ACK waits never
//! interleave between tasks.

use crate::error::SessionError;
use crate::models::AgentId;
use crate::protocol::{decode_datagram, Ack, Datagram, Register, MAX_DATAGRAM_LEN};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct DatagramLink {
    socket: UdpSocket,
    agent_id: AgentId,
}

impl DatagramLink {
    /// Bind an ephemeral socket and connect it to the collector
    pub async fn connect(server: SocketAddr, agent_id: AgentId) -> Result<Self, SessionError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self { socket, agent_id })
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    /// Wait for the ACK answering `seq`, discarding anything else that arrives
    pub async fn await_ack(&self, seq: u16, timeout: Duration) -> Result<Ack, SessionError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM_LEN];

        loop {
            let received = match tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Ok(received) => received,
                Err(_) => return Err(SessionError::AckTimeout { seq }),
            };

            let len = match received {
                Ok(len) => len,
                Err(e) => {
                    // Port unreachable from a collector that is not up yet
                    debug!(agent_id = self.agent_id, error = %e, "Receive failed while waiting for ACK");
                    continue;
                }
            };

            match decode_datagram(&buf[..len]) {
                Ok(frame) => match frame.datagram {
                    Datagram::Ack(ack) if ack.seq == seq && ack.agent_id == self.agent_id => {
                        return Ok(ack);
                    }
                    other => debug!(
                        agent_id = self.agent_id,
                        expected_seq = seq,
                        got_seq = other.seq(),
                        got_agent = other.agent_id(),
                        "Ignoring unrelated datagram"
                    ),
                },
                Err(e) => warn!(agent_id = self.agent_id, error = %e, "Ignoring undecodable reply"),
            }
        }
    }

    /// Run the REGISTER handshake; returns the attempt that succeeded
    pub async fn register(&self, timeout: Duration, attempts: u32) -> Result<u32, SessionError> {
        let request = Register::new(self.agent_id).encode();

        for attempt in 1..=attempts {
            self.send(&request).await?;
            match self.await_ack(0, timeout).await {
                Ok(_) => return Ok(attempt),
                Err(SessionError::AckTimeout { .. }) => {
                    warn!(
                        agent_id = self.agent_id,
                        attempt = attempt,
                        max_attempts = attempts,
                        "No registration ACK, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::RegistrationFailed {
            agent_id: self.agent_id,
            attempts,
        })
    }
}
