use std::net::Ipv4Addr;

use crate::config::NatConfig;
use crate::EndpointId;

/// One half of a media endpoint: the local RTP port handed out in SDP
/// bodies, the peer learned from the transport and the connection
/// identifier assigned by the far side.
pub struct EndpointSide {
    pub local_port: u16,
    pub addr: Option<Ipv4Addr>,
    pub ci: Option<u32>,
}

impl EndpointSide {
    #[inline]
    fn new(local_port: u16) -> EndpointSide {
        EndpointSide {
            local_port,
            addr: None,
            ci: None,
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.addr = None;
        self.ci = None;
    }
}

/// A media gateway channel with a Call Agent facing and a BSC facing half.
pub struct MgcpEndpoint {
    pub net_end: EndpointSide,
    pub bts_end: EndpointSide,
}

impl MgcpEndpoint {
    /// Releases all media state held by the endpoint.
    pub fn reset(&mut self) {
        self.net_end.reset();
        self.bts_end.reset();
    }
}

/// The global endpoint space the Call Agent addresses. Slot 0 is reserved;
/// usable ids run from 1 below `number_endpoints`.
pub struct Trunk {
    pub number_endpoints: usize,
    endpoints: Vec<MgcpEndpoint>,
}

impl Trunk {
    pub fn new(cfg: &NatConfig) -> Trunk {
        let endpoints = (0..cfg.max_endpoints)
            .map(|id| {
                let offset = if id == 0 { 0 } else { 2 * (id as u16 - 1) };
                MgcpEndpoint {
                    net_end: EndpointSide::new(cfg.net_base_port + offset),
                    bts_end: EndpointSide::new(cfg.bts_base_port + offset),
                }
            })
            .collect();

        Trunk {
            number_endpoints: cfg.max_endpoints,
            endpoints,
        }
    }

    #[inline]
    pub fn endpoint(&self, id: EndpointId) -> &MgcpEndpoint {
        &self.endpoints[id]
    }

    #[inline]
    pub fn endpoint_mut(&mut self, id: EndpointId) -> &mut MgcpEndpoint {
        &mut self.endpoints[id]
    }
}
