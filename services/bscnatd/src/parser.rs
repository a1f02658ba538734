use mgw::logging::{self, Logger};
use mgw::policy::{MgcpParser, MgcpPolicy, MgcpVerb, PolicyDecision};

/// Minimal MGCP command parser: it understands the verb line, drives the
/// policy and produces the direct responses the policy asks for. The full
/// MGCP gateway state machine lives elsewhere.
pub struct VerbLineParser {
    log: Logger,
}

impl VerbLineParser {
    pub fn new(log: &Logger) -> VerbLineParser {
        VerbLineParser {
            log: log.new(logging::o!()),
        }
    }

    /// Splits `<VERB> <txid> <endp>@mgw MGCP 1.0` into its parts.
    fn parse_header(line: &str) -> Option<(MgcpVerb, &str, usize)> {
        let mut tokens = line.split_ascii_whitespace();

        let verb = match tokens.next()? {
            "CRCX" => MgcpVerb::Crcx,
            "MDCX" => MgcpVerb::Mdcx,
            "DLCX" => MgcpVerb::Dlcx,
            _ => MgcpVerb::Other,
        };

        let transaction_id = tokens.next()?;
        let endpoint = tokens.next()?.split('@').next()?;
        let endpoint = usize::from_str_radix(endpoint, 16).ok()?;

        Some((verb, transaction_id, endpoint))
    }
}

impl MgcpParser for VerbLineParser {
    fn handle_message(&mut self, policy: &mut dyn MgcpPolicy, msg: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(msg).ok()?;
        let line = text.lines().next()?;

        let (verb, transaction_id, endpoint) = match Self::parse_header(line) {
            Some(parsed) => parsed,
            None => {
                logging::error!(self.log, "unparseable MGCP command"; "line" => line);
                return None;
            }
        };

        match policy.on_verb(endpoint, verb, transaction_id, msg) {
            PolicyDecision::Defer => None,
            PolicyDecision::Continue => Some(format!("200 {} OK\r\n", transaction_id).into_bytes()),
            PolicyDecision::Reject => Some(format!("500 {} FAIL\r\n", transaction_id).into_bytes()),
        }
    }
}
