use std::str;

use crate::bsc::BscId;
use crate::logging::{self, Logger};
use crate::nat::Nat;
use crate::policy::MgcpVerb;
use crate::rewrite;
use crate::EndpointId;

/// Longest BSC reply accepted for forwarding.
const MAX_REPLY: usize = 2000;

const TRANSACTION_ID_MAX: usize = 59;

/// Parses `<code> <transaction-id>` off a response status line.
pub fn parse_response(msg: &str) -> Option<(u32, String)> {
    let mut tokens = msg.split_ascii_whitespace();

    let code = tokens.next()?;
    if code.len() > 3 || code.is_empty() || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;

    let mut transaction_id = tokens.next()?.to_string();
    transaction_id.truncate(TRANSACTION_ID_MAX);

    Some((code, transaction_id))
}

/// Pulls the connection identifier out of an `I: ` line.
pub fn extract_ci(log: &Logger, msg: &str) -> Option<u32> {
    let rest = match msg.find("I: ") {
        Some(index) => &msg[index + 3..],
        None => {
            logging::error!(log, "no CI in message");
            return None;
        }
    };

    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    match digits.parse().ok() {
        Some(ci) => Some(ci),
        None => {
            logging::error!(log, "failed to parse the CI");
            None
        }
    }
}

impl Nat {
    /// Routes a reply received from a BSC back to the Call Agent. The reply
    /// is matched against the pending transactions of that BSC; the CI the
    /// gateway assigned is stored on the network end before the SDP body is
    /// rewritten to the NAT's own address.
    pub fn forward(&mut self, bsc: BscId, msg: &[u8]) {
        if msg.len() > MAX_REPLY {
            logging::error!(self.log, "MGCP message too long"; "length" => msg.len());
            return;
        }

        let text = match str::from_utf8(msg) {
            Ok(text) => text,
            Err(_) => {
                logging::error!(self.log, "MGCP reply is not text");
                return;
            }
        };

        let (code, transaction_id) = match parse_response(text) {
            Some(parsed) => parsed,
            None => {
                logging::error!(self.log, "failed to parse the response code");
                return;
            }
        };

        let endpoint = match self.pending.find(bsc, &transaction_id) {
            Some(endpoint) => endpoint,
            None => {
                logging::error!(self.log, "could not find an active endpoint";
                                "transaction" => %transaction_id,
                                "code" => code);
                return;
            }
        };

        let ci = match extract_ci(&self.log, text) {
            Some(ci) => ci,
            None => {
                self.free_chan_downstream(bsc, endpoint);
                return;
            }
        };

        self.trunk.endpoint_mut(endpoint).net_end.ci = Some(ci);
        self.pending.free(endpoint);

        let net_port = self.trunk.endpoint(endpoint).net_end.local_port;
        let source_addr = self.cfg.source_addr.clone();

        let output = match rewrite::rewrite(&self.log, msg, None, &source_addr, net_port) {
            Ok(output) => output,
            Err(_) => {
                logging::error!(self.log, "failed to rewrite the MGCP message"; "endpoint" => endpoint);
                return;
            }
        };

        self.queue_for_call_agent(output);
    }

    /// A reply without a CI: the channel never came up and everything
    /// downstream is released. A failed CRCX additionally tears the whole
    /// session down, releasing the BSC endpoint and notifying the gateway.
    fn free_chan_downstream(&mut self, bsc: BscId, endpoint: EndpointId) {
        let state = self.pending.get(endpoint).map(|pending| pending.state);

        logging::error!(self.log, "no CI, freeing endpoint";
                        "endpoint" => endpoint,
                        "state" => ?state);

        if state == Some(MgcpVerb::Crcx) {
            let found = self
                .sessions
                .find_by_msc_endp(endpoint)
                .map(|connection| (connection.sccp_ref, connection.bsc));

            match found {
                Some((sccp_ref, session_bsc)) if session_bsc == bsc => {
                    self.mgcp_dlcx(sccp_ref);
                }
                Some(_) => {
                    logging::error!(self.log, "endpoint belongs to a different BSC"; "endpoint" => endpoint);
                }
                None => {
                    logging::error!(self.log, "no SCCP connection for endpoint"; "endpoint" => endpoint);
                }
            }
        }

        self.pending.free(endpoint);
        self.trunk.endpoint_mut(endpoint).reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::GSM0808_IE_CIRCUIT_IDENTITY_CODE;
    use crate::bsc::BscConfig;
    use crate::config::NatConfig;
    use crate::ipa;
    use crate::logging::{o, Discard};
    use crate::policy::MgcpPolicy;

    const CRCX_MSG: &[u8] =
        b"CRCX 1234 21@mgw MGCP 1.0\r\n\r\nc=IN IP4 1.1.1.1\r\nm=audio 4000 RTP/AVP 8\r\n";

    fn test_log() -> Logger {
        Logger::root(Discard, o!())
    }

    fn nat_with_pending_crcx() -> (Nat, usize) {
        let mut cfg = NatConfig::default();
        cfg.max_endpoints = 64;
        cfg.call_agent_addr = Some("10.0.0.1".to_string());
        cfg.source_addr = "10.0.0.1".to_string();

        let mut nat = Nat::new(cfg, &test_log()).unwrap();
        let bsc = nat.bsc_connected(Some(BscConfig::default()), None);
        nat.sccp_create(1, bsc);

        let mut l3 = vec![0, 0, 0, GSM0808_IE_CIRCUIT_IDENTITY_CODE, 0x00, 0x21];
        nat.assign_patch(1, Some(&mut l3)).unwrap();

        nat.on_verb(0x21, crate::policy::MgcpVerb::Crcx, "1234", CRCX_MSG);

        (nat, bsc)
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response("200 1234\r\nI: 57\r\n"), Some((200, "1234".to_string())));
        assert_eq!(parse_response("500 nat-99\r\n"), Some((500, "nat-99".to_string())));
        assert_eq!(parse_response("garbage 1234"), None);
        assert_eq!(parse_response("2000 1234"), None);
        assert_eq!(parse_response("200"), None);
        assert_eq!(parse_response(""), None);
    }

    #[test]
    fn test_parse_response_truncates_long_ids() {
        let long_id = "x".repeat(80);
        let msg = format!("250 {}", long_id);

        let (_, transaction_id) = parse_response(&msg).unwrap();
        assert_eq!(transaction_id.len(), TRANSACTION_ID_MAX);
    }

    #[test]
    fn test_extract_ci() {
        let log = test_log();

        assert_eq!(extract_ci(&log, "200 1234\r\nI: 57\r\n"), Some(57));
        assert_eq!(extract_ci(&log, "200 1234\r\nI:  7\r\n"), Some(7));
        assert_eq!(extract_ci(&log, "200 1234\r\n"), None);
        assert_eq!(extract_ci(&log, "200 1234\r\nI: x\r\n"), None);
    }

    #[test]
    fn test_reply_is_forwarded() {
        let (mut nat, bsc) = nat_with_pending_crcx();

        nat.forward(bsc, b"200 1234\r\nI: 57\r\n");

        assert_eq!(nat.trunk.endpoint(0x21).net_end.ci, Some(57));
        assert!(nat.pending.get(0x21).is_none());

        let queued = nat.agent.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0], b"200 1234\r\nI: 57\r\n".to_vec());
    }

    #[test]
    fn test_reply_sdp_is_rewritten() {
        let (mut nat, bsc) = nat_with_pending_crcx();

        nat.forward(
            bsc,
            b"200 1234\r\nI: 57\r\n\r\nc=IN IP4 2.2.2.2\r\nm=audio 9000 RTP/AVP 8\r\n",
        );

        let net_port = nat.trunk.endpoint(0x21).net_end.local_port;
        let expected = format!(
            "200 1234\r\nI: 57\r\n\r\nc=IN IP4 10.0.0.1\r\nm=audio {} RTP/AVP 8\r\na=fmtp:8 mode-set=2\r\n",
            net_port
        );

        assert_eq!(nat.agent.queued()[0], expected.as_bytes().to_vec());
    }

    #[test]
    fn test_duplicate_reply_is_dropped() {
        let (mut nat, bsc) = nat_with_pending_crcx();

        nat.forward(bsc, b"200 1234\r\nI: 57\r\n");
        nat.forward(bsc, b"200 1234\r\nI: 57\r\n");

        assert_eq!(nat.agent.queued().len(), 1);
    }

    #[test]
    fn test_reply_for_other_bsc_is_dropped() {
        let (mut nat, _bsc) = nat_with_pending_crcx();
        let other = nat.bsc_connected(Some(BscConfig::default()), None);

        nat.forward(other, b"200 1234\r\nI: 57\r\n");

        assert!(nat.pending.get(0x21).is_some());
        assert!(nat.agent.queued().is_empty());
    }

    #[test]
    fn test_reply_without_ci_frees_downstream() {
        let (mut nat, bsc) = nat_with_pending_crcx();
        let frames_before = nat.bsc(bsc).unwrap().queued_frames().len();

        nat.forward(bsc, b"200 1234\r\n");

        assert!(nat.pending.get(0x21).is_none());
        assert_eq!(nat.trunk.endpoint(0x21).net_end.ci, None);
        assert!(nat.agent.queued().is_empty());

        let session = nat.sessions.get(1).unwrap();
        assert_eq!(session.msc_endp, None);
        assert_eq!(session.bsc_endp, None);

        // The status byte was already cleared by the teardown.
        assert!(!nat.bsc_mut(bsc).unwrap().release_endpoint(1));

        let frames: Vec<Vec<u8>> = nat
            .bsc(bsc)
            .unwrap()
            .queued_frames()
            .iter()
            .map(|frame| ipa::deframe(frame).unwrap().1.to_vec())
            .collect();

        assert_eq!(frames.len(), frames_before + 1);
        assert_eq!(frames[frames.len() - 1], b"DLCX 26 1@mgw MGCP 1.0\r\nZ: noanswer\r\n");
    }

    #[test]
    fn test_oversized_reply_is_dropped() {
        let (mut nat, bsc) = nat_with_pending_crcx();

        let mut msg = b"200 1234\r\nI: 57\r\n".to_vec();
        msg.resize(MAX_REPLY + 1, b' ');

        nat.forward(bsc, &msg);

        assert!(nat.pending.get(0x21).is_some());
        assert!(nat.agent.queued().is_empty());
    }
}
