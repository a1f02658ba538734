use std::net::IpAddr;

use crate::logging;
use crate::nat::Nat;
use crate::rewrite;
use crate::EndpointId;

/// Outcome of the policy check for one Call Agent verb.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PolicyDecision {
    /// Refuse the transaction; the parser answers with an error code.
    Reject,
    /// Let the parser answer locally; nothing is owed downstream.
    Continue,
    /// The reply will come from the BSC; the parser stays silent.
    Defer,
}

/// MGCP connection verbs the policy distinguishes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MgcpVerb {
    Crcx,
    Mdcx,
    Dlcx,
    Other,
}

/// Policy seam invoked by the MGCP parser for each connection verb.
pub trait MgcpPolicy {
    fn on_verb(
        &mut self,
        endpoint: EndpointId,
        verb: MgcpVerb,
        transaction_id: &str,
        msg: &[u8],
    ) -> PolicyDecision;
}

/// Contract of the external MGCP parser: parse one message, drive the
/// policy and hand back a direct response when one is due.
pub trait MgcpParser {
    fn handle_message(&mut self, policy: &mut dyn MgcpPolicy, msg: &[u8]) -> Option<Vec<u8>>;
}

impl MgcpPolicy for Nat {
    fn on_verb(
        &mut self,
        endpoint: EndpointId,
        verb: MgcpVerb,
        transaction_id: &str,
        msg: &[u8],
    ) -> PolicyDecision {
        if endpoint == 0 || endpoint >= self.trunk.number_endpoints {
            logging::error!(self.log, "verb for an endpoint outside the trunk"; "endpoint" => endpoint);
            return PolicyDecision::Continue;
        }

        if let Some(stale) = self.pending.free(endpoint) {
            logging::error!(self.log, "endpoint had a pending transaction";
                            "endpoint" => endpoint,
                            "transaction" => %stale.id);
        }

        let (sccp_ref, bsc_id, bsc_endp) = match self.sessions.find_by_msc_endp(endpoint) {
            Some(connection) => (connection.sccp_ref, connection.bsc, connection.bsc_endp),
            None => {
                logging::error!(self.log, "no session for change on endpoint";
                                "endpoint" => endpoint,
                                "verb" => ?verb);

                return match verb {
                    MgcpVerb::Crcx => PolicyDecision::Reject,
                    MgcpVerb::Dlcx => PolicyDecision::Continue,
                    MgcpVerb::Mdcx => PolicyDecision::Continue,
                    MgcpVerb::Other => {
                        logging::crit!(self.log, "unhandled verb"; "endpoint" => endpoint);
                        PolicyDecision::Continue
                    }
                };
            }
        };

        let bsc_endp = match bsc_endp {
            Some(bsc_endp) => bsc_endp,
            None => {
                logging::error!(self.log, "session has no BSC endpoint"; "endpoint" => endpoint);
                return PolicyDecision::Continue;
            }
        };

        let bts_port = self.trunk.endpoint(endpoint).bts_end.local_port;

        let bsc_msg = match rewrite::rewrite(&self.log, msg, Some(bsc_endp), &self.cfg.source_addr, bts_port) {
            Ok(output) => output,
            Err(_) => {
                logging::error!(self.log, "failed to patch the message"; "endpoint" => endpoint);
                return PolicyDecision::Continue;
            }
        };

        self.pending.record(endpoint, transaction_id, verb, bsc_id);

        match verb {
            MgcpVerb::Crcx => {
                let source_addr = self.cfg.source_addr.clone();

                let connection = match self.bscs.get_mut(bsc_id).and_then(|slot| slot.as_mut()) {
                    Some(connection) => connection,
                    None => {
                        logging::error!(self.log, "BSC is gone"; "bsc" => bsc_id);
                        return PolicyDecision::Continue;
                    }
                };

                // The TCP peer is how the NAT learns the BSC's RTP address.
                match connection.peer_addr() {
                    Ok(addr) => {
                        if let IpAddr::V4(ip) = addr.ip() {
                            self.trunk.endpoint_mut(endpoint).bts_end.addr = Some(ip);
                        }
                    }
                    Err(err) => {
                        logging::error!(self.log, "can not get the peername"; "error" => ?err);
                    }
                }

                connection.write_mgcp(&bsc_msg);
                connection.send_mdcx(bsc_endp, &source_addr, bts_port);

                PolicyDecision::Defer
            }
            MgcpVerb::Dlcx => {
                drop(bsc_msg);
                self.mgcp_dlcx(sccp_ref);

                PolicyDecision::Continue
            }
            _ => {
                match self.bscs.get_mut(bsc_id).and_then(|slot| slot.as_mut()) {
                    Some(connection) => connection.write_mgcp(&bsc_msg),
                    None => {
                        logging::error!(self.log, "BSC is gone"; "bsc" => bsc_id);
                        return PolicyDecision::Continue;
                    }
                }

                PolicyDecision::Defer
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::GSM0808_IE_CIRCUIT_IDENTITY_CODE;
    use crate::bsc::BscConfig;
    use crate::config::NatConfig;
    use crate::ipa;
    use crate::logging::{o, Discard, Logger};

    const CRCX_MSG: &[u8] =
        b"CRCX 1234 21@mgw MGCP 1.0\r\n\r\nc=IN IP4 1.1.1.1\r\nm=audio 4000 RTP/AVP 8\r\n";

    fn test_nat() -> Nat {
        let mut cfg = NatConfig::default();
        cfg.max_endpoints = 64;
        cfg.call_agent_addr = Some("10.0.0.1".to_string());
        cfg.source_addr = "10.0.0.1".to_string();

        Nat::new(cfg, &Logger::root(Discard, o!())).unwrap()
    }

    fn assign(nat: &mut Nat, sccp_ref: u32, cic: u16) {
        let mut l3 = vec![
            0x00,
            0x00,
            0x00,
            GSM0808_IE_CIRCUIT_IDENTITY_CODE,
            (cic >> 8) as u8,
            cic as u8,
        ];

        nat.assign_patch(sccp_ref, Some(&mut l3)).unwrap();
    }

    fn frames(nat: &Nat, bsc: usize) -> Vec<Vec<u8>> {
        nat.bsc(bsc)
            .unwrap()
            .queued_frames()
            .iter()
            .map(|frame| ipa::deframe(frame).unwrap().1.to_vec())
            .collect()
    }

    #[test]
    fn test_crcx_without_session_is_rejected() {
        let mut nat = test_nat();

        let decision = nat.on_verb(1, MgcpVerb::Crcx, "1234", CRCX_MSG);

        assert_eq!(decision, PolicyDecision::Reject);
    }

    #[test]
    fn test_dlcx_mdcx_without_session_continue() {
        let mut nat = test_nat();

        assert_eq!(nat.on_verb(1, MgcpVerb::Dlcx, "1", b""), PolicyDecision::Continue);
        assert_eq!(nat.on_verb(1, MgcpVerb::Mdcx, "2", b""), PolicyDecision::Continue);
        assert_eq!(nat.on_verb(1, MgcpVerb::Other, "3", b""), PolicyDecision::Continue);
    }

    #[test]
    fn test_crcx_is_deferred_and_patched() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);
        nat.sccp_create(1, bsc);
        assign(&mut nat, 1, 0x0021);

        let decision = nat.on_verb(0x21, MgcpVerb::Crcx, "1234", CRCX_MSG);

        assert_eq!(decision, PolicyDecision::Defer);

        let pending = nat.pending.get(0x21).unwrap();
        assert_eq!(pending.id, "1234");
        assert_eq!(pending.state, MgcpVerb::Crcx);
        assert_eq!(pending.bsc, bsc);

        let sent = frames(&nat, bsc);
        assert_eq!(sent.len(), 2);

        let bts_port = nat.trunk.endpoint(0x21).bts_end.local_port;
        let expected = format!(
            "CRCX 1234 1@mgw MGCP 1.0\r\n\r\nc=IN IP4 10.0.0.1\r\nm=audio {} RTP/AVP 8\r\na=fmtp:8 mode-set=2\r\n",
            bts_port
        );
        assert_eq!(sent[0], expected.as_bytes());

        let mdcx = format!(
            "MDCX 23 1@mgw MGCP 1.0\r\nZ: noanswer\r\n\r\nc=IN IP4 10.0.0.1\r\nm=audio {} RTP/AVP 255\r\n",
            bts_port
        );
        assert_eq!(sent[1], mdcx.as_bytes());
    }

    #[test]
    fn test_mdcx_is_deferred() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);
        nat.sccp_create(1, bsc);
        assign(&mut nat, 1, 0x0021);

        let msg = b"MDCX 99 21@mgw MGCP 1.0\r\n\r\nc=IN IP4 1.1.1.1\r\nm=audio 4000 RTP/AVP 8\r\n";
        let decision = nat.on_verb(0x21, MgcpVerb::Mdcx, "99", msg);

        assert_eq!(decision, PolicyDecision::Defer);
        assert_eq!(frames(&nat, bsc).len(), 1);
    }

    #[test]
    fn test_dlcx_tears_the_session_down() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);
        nat.sccp_create(1, bsc);
        assign(&mut nat, 1, 0x0021);

        let decision = nat.on_verb(0x21, MgcpVerb::Dlcx, "9", b"DLCX 9 21@mgw MGCP 1.0\r\n");

        assert_eq!(decision, PolicyDecision::Continue);
        assert!(nat.pending.get(0x21).is_none());

        let session = nat.sessions.get(1).unwrap();
        assert_eq!(session.msc_endp, None);
        assert_eq!(session.bsc_endp, None);

        let sent = frames(&nat, bsc);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], b"DLCX 26 1@mgw MGCP 1.0\r\nZ: noanswer\r\n");
    }

    #[test]
    fn test_pending_transaction_is_replaced() {
        let mut nat = test_nat();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);
        nat.sccp_create(1, bsc);
        assign(&mut nat, 1, 0x0021);

        nat.on_verb(0x21, MgcpVerb::Crcx, "1234", CRCX_MSG);
        nat.on_verb(0x21, MgcpVerb::Crcx, "1235", CRCX_MSG);

        assert_eq!(nat.pending.find(bsc, "1234"), None);
        assert_eq!(nat.pending.find(bsc, "1235"), Some(0x21));
    }
}
