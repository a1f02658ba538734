use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use crate::cic;
use crate::ipa;
use crate::logging::{self, Logger};
use crate::support::{NatError, NatResult};
use crate::EndpointId;

pub type BscId = usize;

/// Frames queued per BSC before the connection starts dropping.
const EGRESS_QUEUE_DEPTH: usize = 100;

const READ_CHUNK: usize = 4096;

/// Per-BSC configuration pushed down by the connection management layer.
pub struct BscConfig {
    /// Size of this BSC's private endpoint range.
    pub max_endpoints: usize,
    pub stats: BscStats,
}

#[derive(Default)]
pub struct BscStats {
    pub dropped_calls: u64,
}

impl Default for BscConfig {
    fn default() -> BscConfig {
        BscConfig {
            max_endpoints: 32,
            stats: BscStats::default(),
        }
    }
}

/// A connected BSC: the framed TCP leg plus the endpoint-status bitmap the
/// allocator scans. The status array is sized lazily on first assignment
/// and lives exactly as long as the connection.
pub struct BscConnection {
    id: BscId,
    pub cfg: Option<BscConfig>,

    stream: Option<TcpStream>,
    egress: VecDeque<Vec<u8>>,
    egress_offset: usize,
    ingress: Vec<u8>,

    endpoint_status: Option<Vec<u8>>,
    number_multiplexes: usize,
    max_endpoints: usize,
    last_endpoint: EndpointId,

    log: Logger,
}

impl BscConnection {
    pub fn new(id: BscId, cfg: Option<BscConfig>, stream: Option<TcpStream>, log: &Logger) -> BscConnection {
        BscConnection {
            id,
            cfg,
            stream,
            egress: VecDeque::new(),
            egress_offset: 0,
            ingress: Vec::new(),
            endpoint_status: None,
            number_multiplexes: 0,
            max_endpoints: 0,
            last_endpoint: 0,
            log: log.new(logging::o!("bsc" => id)),
        }
    }

    #[inline]
    pub fn id(&self) -> BscId {
        self.id
    }

    #[inline]
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// TCP peer of this BSC; read at CRCX time to learn its RTP address.
    pub fn peer_addr(&self) -> NatResult<SocketAddr> {
        let stream = self
            .stream
            .as_ref()
            .ok_or(NatError::Io(io::ErrorKind::NotConnected))?;

        stream.peer_addr().map_err(Into::into)
    }

    /// Queues one MGCP payload, framed for the legacy ipaccess stream.
    pub fn write_mgcp(&mut self, payload: &[u8]) {
        if self.egress.len() >= EGRESS_QUEUE_DEPTH {
            logging::error!(self.log, "failed to queue message for the BSC"; "queued" => self.egress.len());
            return;
        }

        self.egress.push_back(ipa::frame(ipa::IPAC_PROTO_MGCP_OLD, payload));
    }

    /// Sends a DLCX the BSC must not answer.
    pub fn send_dlcx(&mut self, endpoint: EndpointId) {
        let buf = format!("DLCX 26 {:x}@mgw MGCP 1.0\r\nZ: noanswer\r\n", endpoint);
        self.write_mgcp(buf.as_bytes());
    }

    /// Sends the auxiliary MDCX forcing the BSC to emit a dummy RTP packet.
    pub fn send_mdcx(&mut self, endpoint: EndpointId, ip: &str, audio_port: u16) {
        let buf = format!(
            "MDCX 23 {:x}@mgw MGCP 1.0\r\nZ: noanswer\r\n\r\nc=IN IP4 {}\r\nm=audio {} RTP/AVP 255\r\n",
            endpoint, ip, audio_port
        );
        self.write_mgcp(buf.as_bytes());
    }

    /// Frames queued toward the BSC, oldest first.
    #[inline]
    pub fn queued_frames(&self) -> &VecDeque<Vec<u8>> {
        &self.egress
    }

    /// Writes queued frames to the stream until it would block.
    pub fn flush_egress(&mut self) -> NatResult<usize> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(0),
        };

        let mut sent = 0;

        while !self.egress.is_empty() {
            let result = stream.write(&self.egress[0][self.egress_offset..]);

            match result {
                Ok(0) => return Err(NatError::Io(io::ErrorKind::WriteZero)),
                Ok(count) => {
                    sent += count;
                    self.egress_offset += count;

                    if self.egress_offset == self.egress[0].len() {
                        self.egress.pop_front();
                        self.egress_offset = 0;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(sent)
    }

    /// Reads everything available and returns the complete ipaccess frames.
    pub fn receive(&mut self) -> NatResult<Vec<(u8, Vec<u8>)>> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(Vec::new()),
        };

        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(NatError::Io(io::ErrorKind::UnexpectedEof)),
                Ok(count) => self.ingress.extend_from_slice(&chunk[..count]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some((proto, payload, used)) = ipa::deframe(&self.ingress[consumed..]) {
            frames.push((proto, payload.to_vec()));
            consumed += used;
        }

        self.ingress.drain(..consumed);

        Ok(frames)
    }
}

impl BscConnection {
    /// Lazily sizes the endpoint-status array from the BSC config.
    pub fn init_endpoints_if_needed(&mut self) -> NatResult<()> {
        if self.endpoint_status.is_some() {
            return Ok(());
        }

        let cfg = self.cfg.as_ref().ok_or(NatError::NoBscConfig)?;
        let multiplexes = cic::number_multiplexes(cfg.max_endpoints);

        self.number_multiplexes = multiplexes;
        self.max_endpoints = cfg.max_endpoints;
        self.endpoint_status = Some(vec![0u8; 32 * multiplexes + 1]);
        self.last_endpoint = 0;

        Ok(())
    }

    #[inline]
    pub fn has_endpoint_status(&self) -> bool {
        self.endpoint_status.is_some()
    }

    /// Claims the next free endpoint after the rotating cursor, skipping
    /// timeslots 0 and 0x1f and wrapping across multiplexes.
    pub fn assign_endpoint(&mut self) -> NatResult<EndpointId> {
        let number_endpoints = self.max_endpoints;
        let number_multiplexes = self.number_multiplexes;
        let status = self.endpoint_status.as_mut().ok_or(NatError::NoBscConfig)?;

        let (mut multiplex, mut timeslot) = cic::endpoint_to_timeslot(self.last_endpoint);
        timeslot += 1;

        for _ in 0..number_endpoints {
            if timeslot == 0 {
                timeslot = 1;
            }

            if timeslot == 0x1f {
                timeslot = 1;
                multiplex += 1;
            }

            if multiplex >= number_multiplexes {
                multiplex = 0;
            }

            let mut endpoint = cic::timeslot_to_endpoint(multiplex, timeslot);

            if endpoint >= number_endpoints {
                multiplex = 0;
                timeslot = 1;
                endpoint = cic::timeslot_to_endpoint(multiplex, timeslot);
            }

            if status[endpoint] == 0 {
                status[endpoint] = 1;
                self.last_endpoint = endpoint;

                logging::debug!(self.log, "assigned endpoint"; "endpoint" => endpoint);
                return Ok(endpoint);
            }

            timeslot += 1;
        }

        Err(NatError::EndpointsExhausted)
    }

    /// Clears the in-use marker; false when the endpoint was already free.
    pub fn release_endpoint(&mut self, endpoint: EndpointId) -> bool {
        match self.endpoint_status.as_mut() {
            Some(status) if endpoint < status.len() => {
                let was_in_use = status[endpoint] == 1;
                status[endpoint] = 0;
                was_in_use
            }
            _ => false,
        }
    }
}
