use indexmap::IndexMap;

use crate::bsc::BscId;
use crate::EndpointId;

/// Patched SCCP source reference of a connection, used for correlation.
pub type SccpRef = u32;

/// Media view of one SCCP connection. The signalling layer owns the call;
/// this record only tracks which endpoint pair it occupies. Either both
/// endpoints are unbound or both are set.
pub struct SccpConnection {
    pub sccp_ref: SccpRef,
    pub bsc: BscId,
    pub msc_endp: Option<EndpointId>,
    pub bsc_endp: Option<EndpointId>,
}

impl SccpConnection {
    pub fn new(sccp_ref: SccpRef, bsc: BscId) -> SccpConnection {
        SccpConnection {
            sccp_ref,
            bsc,
            msc_endp: None,
            bsc_endp: None,
        }
    }
}

/// Registry of active SCCP connections in insertion order.
pub struct SessionRegistry {
    connections: IndexMap<SccpRef, SccpConnection>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry {
            connections: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, connection: SccpConnection) {
        self.connections.insert(connection.sccp_ref, connection);
    }

    pub fn remove(&mut self, sccp_ref: SccpRef) -> Option<SccpConnection> {
        self.connections.shift_remove(&sccp_ref)
    }

    #[inline]
    pub fn get(&self, sccp_ref: SccpRef) -> Option<&SccpConnection> {
        self.connections.get(&sccp_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, sccp_ref: SccpRef) -> Option<&mut SccpConnection> {
        self.connections.get_mut(&sccp_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SccpConnection> {
        self.connections.values()
    }

    /// Last active session using `endpoint` toward the Call Agent.
    pub fn find_by_msc_endp(&self, endpoint: EndpointId) -> Option<&SccpConnection> {
        self.connections
            .values()
            .filter(|connection| connection.msc_endp == Some(endpoint))
            .last()
    }
}
