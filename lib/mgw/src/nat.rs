use mio::net::{TcpStream, UdpSocket};

use crate::bsc::{BscConfig, BscConnection, BscId};
use crate::config::NatConfig;
use crate::gateway::{AgentGateway, MscTunnel};
use crate::logging::{self, Logger};
use crate::policy::MgcpParser;
use crate::session::{SccpConnection, SccpRef, SessionRegistry};
use crate::support::NatResult;
use crate::transaction::TransactionTable;
use crate::trunk::Trunk;

/// Inbound Call Agent messages larger than this are dropped unparsed.
const MAX_AGENT_MSG: usize = 4096;

/// The NAT arena. Owns the trunk, the pending-transaction table, the BSC
/// connection slots and the SCCP session registry; everything else refers
/// to these by index so no cycles exist.
pub struct Nat {
    pub(crate) cfg: NatConfig,
    pub(crate) trunk: Trunk,
    pub(crate) pending: TransactionTable,
    pub(crate) bscs: Vec<Option<BscConnection>>,
    free_bscs: Vec<BscId>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) agent: AgentGateway,
    pub(crate) tunnel: MscTunnel,
    pub(crate) log: Logger,
}

impl std::fmt::Debug for Nat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nat").finish_non_exhaustive()
    }
}

impl Nat {
    /// Builds the arena, validating the NAT mode configuration.
    pub fn new(mut cfg: NatConfig, log: &Logger) -> NatResult<Nat> {
        cfg.validate()?;

        let log = log.new(logging::o!());

        Ok(Nat {
            trunk: Trunk::new(&cfg),
            pending: TransactionTable::new(cfg.max_endpoints),
            bscs: Vec::new(),
            free_bscs: Vec::new(),
            sessions: SessionRegistry::new(),
            agent: AgentGateway::new(&log),
            tunnel: MscTunnel::new(&log),
            cfg,
            log,
        })
    }

    #[inline]
    pub fn config(&self) -> &NatConfig {
        &self.cfg
    }

    /// Opens the call agent socket; a no-op when MGCP is tunnelled.
    pub fn open_gateway(&mut self) -> NatResult<()> {
        if self.cfg.mgcp_ipa {
            return Ok(());
        }

        self.agent.open(&self.cfg)
    }

    #[inline]
    pub fn agent_socket(&self) -> Option<&UdpSocket> {
        self.agent.socket()
    }

    pub fn recv_agent(&mut self, buf: &mut [u8]) -> NatResult<usize> {
        self.agent.recv(buf)
    }

    pub fn flush_agent(&mut self) -> NatResult<usize> {
        self.agent.flush()
    }

    #[inline]
    pub fn tunnel_mut(&mut self) -> &mut MscTunnel {
        &mut self.tunnel
    }

    /// Registers a connected BSC and hands out its slot id.
    pub fn bsc_connected(&mut self, cfg: Option<BscConfig>, stream: Option<TcpStream>) -> BscId {
        let id = match self.free_bscs.pop() {
            Some(id) => id,
            None => {
                self.bscs.push(None);
                self.bscs.len() - 1
            }
        };

        self.bscs[id] = Some(BscConnection::new(id, cfg, stream, &self.log));

        logging::debug!(self.log, "BSC connected"; "bsc" => id);

        id
    }

    /// Number of BSC slots ever handed out, including currently free ones.
    #[inline]
    pub fn bsc_count(&self) -> usize {
        self.bscs.len()
    }

    #[inline]
    pub fn bsc(&self, id: BscId) -> Option<&BscConnection> {
        self.bscs.get(id).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub fn bsc_mut(&mut self, id: BscId) -> Option<&mut BscConnection> {
        self.bscs.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Drops a BSC connection after releasing every endpoint it held.
    pub fn bsc_disconnected(&mut self, id: BscId) {
        self.clear_endpoints_for(id);

        if let Some(slot) = self.bscs.get_mut(id) {
            if slot.take().is_some() {
                self.free_bscs.push(id);
                logging::debug!(self.log, "BSC disconnected"; "bsc" => id);
            }
        }
    }

    /// Creates the media record for a new SCCP connection.
    pub fn sccp_create(&mut self, sccp_ref: SccpRef, bsc: BscId) {
        self.sessions.insert(SccpConnection::new(sccp_ref, bsc));
    }

    /// Removes an SCCP record, tearing down any media state first.
    pub fn sccp_remove(&mut self, sccp_ref: SccpRef) {
        self.mgcp_dlcx(sccp_ref);
        self.sessions.remove(sccp_ref);
    }

    /// Routes one message toward the Call Agent.
    pub(crate) fn queue_for_call_agent(&mut self, msg: Vec<u8>) {
        if self.cfg.mgcp_ipa {
            self.tunnel.enqueue(msg);
        } else {
            self.agent.enqueue(msg);
        }
    }

    /// Feeds one Call Agent message through the external parser; a direct
    /// response (e.g. AUEP) is queued right back.
    pub fn handle_agent_message<P: MgcpParser>(&mut self, parser: &mut P, msg: &[u8]) {
        if msg.len() > MAX_AGENT_MSG - 1 {
            logging::error!(self.log, "MGCP message too big for handling"; "length" => msg.len());
            return;
        }

        if let Some(response) = parser.handle_message(self, msg) {
            self.queue_for_call_agent(response);
        }
    }

    /// Handles an MGCP message tunnelled through the signalling link.
    pub fn handle_tunneled_message<P: MgcpParser>(&mut self, parser: &mut P, msg: &[u8]) {
        if !self.cfg.mgcp_ipa {
            logging::error!(self.log, "MGCP message not allowed on IPA");
            return;
        }

        self.handle_agent_message(parser, msg);
    }

    /// Releases every endpoint the departing BSC still holds, counting each
    /// as a dropped call.
    pub fn clear_endpoints_for(&mut self, bsc: BscId) {
        for endpoint in 1..self.trunk.number_endpoints {
            if self.pending.get(endpoint).map_or(true, |pending| pending.bsc != bsc) {
                continue;
            }

            if let Some(connection) = self.bscs.get_mut(bsc).and_then(|slot| slot.as_mut()) {
                if let Some(cfg) = connection.cfg.as_mut() {
                    cfg.stats.dropped_calls += 1;
                }
            }

            self.pending.free(endpoint);
            self.trunk.endpoint_mut(endpoint).reset();
        }
    }

    /// Releases every pending transaction and trunk endpoint.
    pub fn free_endpoints(&mut self) {
        for endpoint in 1..self.trunk.number_endpoints {
            self.pending.free(endpoint);
            self.trunk.endpoint_mut(endpoint).reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{o, Discard, Logger};
    use crate::policy::MgcpVerb;
    use crate::support::NatError;

    fn test_log() -> Logger {
        Logger::root(Discard, o!())
    }

    fn test_nat() -> Nat {
        let mut cfg = NatConfig::default();
        cfg.call_agent_addr = Some("10.0.0.1".to_string());
        Nat::new(cfg, &test_log()).unwrap()
    }

    #[test]
    fn test_new_requires_call_agent() {
        let cfg = NatConfig::default();

        assert_eq!(Nat::new(cfg, &test_log()).unwrap_err(), NatError::MissingCallAgent);
    }

    #[test]
    fn test_bsc_slot_reuse() {
        let mut nat = test_nat();

        let first = nat.bsc_connected(Some(BscConfig::default()), None);
        let second = nat.bsc_connected(Some(BscConfig::default()), None);
        assert_ne!(first, second);

        nat.bsc_disconnected(first);
        assert!(nat.bsc(first).is_none());

        let third = nat.bsc_connected(Some(BscConfig::default()), None);
        assert_eq!(third, first);
    }

    #[test]
    fn test_disconnect_sweeps_pending_endpoints() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);

        nat.pending.record(3, "77", MgcpVerb::Crcx, bsc);
        nat.trunk.endpoint_mut(3).net_end.ci = Some(12);

        nat.bsc_disconnected(bsc);

        assert!(nat.pending.get(3).is_none());
        assert_eq!(nat.trunk.endpoint(3).net_end.ci, None);
    }

    #[test]
    fn test_disconnect_counts_dropped_calls() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);

        nat.pending.record(2, "1", MgcpVerb::Mdcx, bsc);
        nat.pending.record(5, "2", MgcpVerb::Crcx, bsc);

        nat.clear_endpoints_for(bsc);

        let dropped = nat.bsc(bsc).unwrap().cfg.as_ref().unwrap().stats.dropped_calls;
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_disconnect_leaves_other_bscs_alone() {
        let mut nat = test_nat();
        let first = nat.bsc_connected(Some(BscConfig::default()), None);
        let second = nat.bsc_connected(Some(BscConfig::default()), None);

        nat.pending.record(2, "1", MgcpVerb::Mdcx, first);
        nat.pending.record(5, "2", MgcpVerb::Crcx, second);

        nat.bsc_disconnected(first);

        assert!(nat.pending.get(2).is_none());
        assert!(nat.pending.get(5).is_some());
    }

    #[test]
    fn test_oversized_agent_message_is_dropped() {
        struct PanicParser;

        impl MgcpParser for PanicParser {
            fn handle_message(
                &mut self,
                _policy: &mut dyn crate::policy::MgcpPolicy,
                _msg: &[u8],
            ) -> Option<Vec<u8>> {
                panic!("parser must not run");
            }
        }

        let mut nat = test_nat();
        let msg = vec![0u8; MAX_AGENT_MSG];

        nat.handle_agent_message(&mut PanicParser, &msg);
    }

    #[test]
    fn test_tunneled_message_requires_ipa_mode() {
        struct PanicParser;

        impl MgcpParser for PanicParser {
            fn handle_message(
                &mut self,
                _policy: &mut dyn crate::policy::MgcpPolicy,
                _msg: &[u8],
            ) -> Option<Vec<u8>> {
                panic!("parser must not run");
            }
        }

        let mut nat = test_nat();

        nat.handle_tunneled_message(&mut PanicParser, b"AUEP 1 1@mgw MGCP 1.0\r\n");
    }

    #[test]
    fn test_queue_for_call_agent_routes_by_mode() {
        let mut nat = test_nat();
        nat.queue_for_call_agent(vec![1]);
        assert_eq!(nat.agent.queued().len(), 1);
        assert_eq!(nat.tunnel.queued().len(), 0);

        let mut cfg = NatConfig::default();
        cfg.call_agent_addr = Some("10.0.0.1".to_string());
        cfg.mgcp_ipa = true;
        let mut ipa_nat = Nat::new(cfg, &test_log()).unwrap();

        ipa_nat.queue_for_call_agent(vec![1]);
        assert_eq!(ipa_nat.agent.queued().len(), 0);
        assert_eq!(ipa_nat.tunnel.queued().len(), 1);
    }
}
