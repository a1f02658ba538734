use mio::net::UdpSocket;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use crate::config::{NatConfig, CALL_AGENT_PORT};
use crate::logging::{self, Logger};
use crate::support::{NatError, NatResult};

/// Depth of the call agent write queue.
const WRITE_QUEUE_DEPTH: usize = 10;

/// The UDP leg toward the Call Agent: a connected socket plus a bounded
/// write queue. Overflow drops the message, matching datagram semantics.
pub struct AgentGateway {
    socket: Option<UdpSocket>,
    queue: VecDeque<Vec<u8>>,
    log: Logger,
}

impl AgentGateway {
    pub fn new(log: &Logger) -> AgentGateway {
        AgentGateway {
            socket: None,
            queue: VecDeque::new(),
            log: log.new(logging::o!()),
        }
    }

    /// Binds the gateway socket and connects it to the call agent.
    pub fn open(&mut self, cfg: &NatConfig) -> NatResult<()> {
        let call_agent = cfg.call_agent_addr.as_ref().ok_or(NatError::MissingCallAgent)?;

        let local: SocketAddr = format!("{}:{}", cfg.source_addr, cfg.source_port).parse()?;
        let remote: SocketAddr = format!("{}:{}", call_agent, CALL_AGENT_PORT).parse()?;

        let socket = UdpSocket::bind(&local)?;
        socket.connect(remote)?;

        logging::debug!(self.log, "gateway socket opened"; "local" => %local, "call_agent" => %remote);

        self.socket = Some(socket);
        Ok(())
    }

    #[inline]
    pub fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    /// Queues one datagram; a full queue drops the message.
    pub fn enqueue(&mut self, msg: Vec<u8>) {
        if self.queue.len() >= WRITE_QUEUE_DEPTH {
            logging::error!(self.log, "failed to queue MGCP message"; "queued" => self.queue.len());
            return;
        }

        self.queue.push_back(msg);
    }

    /// Sends queued datagrams until the socket would block.
    pub fn flush(&mut self) -> NatResult<usize> {
        let socket = match self.socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(0),
        };

        let mut sent = 0;

        loop {
            let result = match self.queue.front() {
                Some(front) => socket.send(front),
                None => break,
            };

            match result {
                Ok(count) => {
                    sent += count;
                    self.queue.pop_front();
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::error!(self.log, "failed to write to the call agent"; "error" => ?err);
                    self.queue.pop_front();
                    return Err(err.into());
                }
            }
        }

        Ok(sent)
    }

    /// Receives one datagram from the call agent.
    pub fn recv(&mut self, buf: &mut [u8]) -> NatResult<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(NatError::Io(io::ErrorKind::NotConnected))?;

        socket.recv(buf).map_err(Into::into)
    }

    /// Datagrams still waiting to go out.
    #[inline]
    pub fn queued(&self) -> &VecDeque<Vec<u8>> {
        &self.queue
    }
}

/// Stand-in for the IPA signalling path toward the MSC when `mgcp_ipa` is
/// active. The signalling layer drains the queue.
pub struct MscTunnel {
    queue: VecDeque<Vec<u8>>,
    log: Logger,
}

impl MscTunnel {
    pub fn new(log: &Logger) -> MscTunnel {
        MscTunnel {
            queue: VecDeque::new(),
            log: log.new(logging::o!()),
        }
    }

    pub fn enqueue(&mut self, msg: Vec<u8>) {
        if self.queue.len() >= WRITE_QUEUE_DEPTH {
            logging::error!(self.log, "failed to queue MGCP message for the MSC"; "queued" => self.queue.len());
            return;
        }

        self.queue.push_back(msg);
    }

    /// Next message bound for the MSC, if any.
    pub fn pop_pending(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn queued(&self) -> &VecDeque<Vec<u8>> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{o, Discard, Logger};

    fn test_log() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn test_enqueue_overflow_drops() {
        let mut gateway = AgentGateway::new(&test_log());

        for i in 0..WRITE_QUEUE_DEPTH + 3 {
            gateway.enqueue(vec![i as u8]);
        }

        assert_eq!(gateway.queued().len(), WRITE_QUEUE_DEPTH);
    }

    #[test]
    fn test_flush_without_socket() {
        let mut gateway = AgentGateway::new(&test_log());
        gateway.enqueue(vec![1, 2, 3]);

        assert_eq!(gateway.flush().unwrap(), 0);
        assert_eq!(gateway.queued().len(), 1);
    }

    #[test]
    fn test_tunnel_drains_in_order() {
        let mut tunnel = MscTunnel::new(&test_log());

        tunnel.enqueue(vec![1]);
        tunnel.enqueue(vec![2]);

        assert_eq!(tunnel.pop_pending(), Some(vec![1]));
        assert_eq!(tunnel.pop_pending(), Some(vec![2]));
        assert_eq!(tunnel.pop_pending(), None);
    }
}
