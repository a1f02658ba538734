use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::support::{NatError, NatResult};

/// Well known MGCP Call Agent port.
pub const CALL_AGENT_PORT: u16 = 2727;

pub const DEFAULT_MAX_ENDPOINTS: usize = 32;
pub const DEFAULT_SOURCE_PORT: u16 = 2427;
pub const DEFAULT_BTS_BASE_PORT: u16 = 4000;
pub const DEFAULT_NET_BASE_PORT: u16 = 16000;

/// Configuration surface of the NAT media core. Loaded from TOML by the
/// service binary; the external connection management owns everything else.
#[derive(Serialize, Deserialize, Clone)]
pub struct NatConfig {
    /// Size of the global trunk endpoint space.
    pub max_endpoints: usize,
    /// Local address the gateway socket binds to.
    pub source_addr: String,
    pub source_port: u16,
    pub call_agent_addr: Option<String>,
    /// Must stay unset in NAT mode; BTS addresses are learned per BSC.
    pub bts_ip: Option<String>,
    /// Tunnel MGCP through the signalling link instead of the UDP socket.
    pub mgcp_ipa: bool,
    pub force_realloc: bool,
    /// RTP port base of the BSC facing endpoint halves.
    pub bts_base_port: u16,
    /// RTP port base of the Call Agent facing endpoint halves.
    pub net_base_port: u16,
}

impl Default for NatConfig {
    fn default() -> NatConfig {
        NatConfig {
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
            source_addr: "127.0.0.1".to_string(),
            source_port: DEFAULT_SOURCE_PORT,
            call_agent_addr: None,
            bts_ip: None,
            mgcp_ipa: false,
            force_realloc: false,
            bts_base_port: DEFAULT_BTS_BASE_PORT,
            net_base_port: DEFAULT_NET_BASE_PORT,
        }
    }
}

impl NatConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NatConfig {
        serdeconv::from_toml_file(path).expect("Error loading the NAT configuration file")
    }

    /// NAT mode validation run once at arena construction. The call agent
    /// address is mandatory and the static BTS address must stay unset.
    pub(crate) fn validate(&mut self) -> NatResult<()> {
        if self.call_agent_addr.is_none() {
            return Err(NatError::MissingCallAgent);
        }

        if self.bts_ip.as_ref().map_or(false, |ip| !ip.is_empty()) {
            return Err(NatError::BtsIpConfigured);
        }

        self.bts_ip = None;
        self.force_realloc = true;

        Ok(())
    }
}
