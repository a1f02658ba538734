use byteorder::{BigEndian, ByteOrder};
use hashbrown::HashMap;
use lazy_static::lazy_static;

use crate::cic;
use crate::logging;
use crate::nat::Nat;
use crate::session::SccpRef;
use crate::support::{NatError, NatResult};

/// GSM 08.08 information elements seen on the assignment path.
pub const GSM0808_IE_CIRCUIT_IDENTITY_CODE: u8 = 0x01;
const GSM0808_IE_INTERFERENCE_BAND_TO_USE: u8 = 0x02;
const GSM0808_IE_PRIORITY: u8 = 0x06;
const GSM0808_IE_CHANNEL_TYPE: u8 = 0x0b;
const GSM0808_IE_CLASSMARK_INFORMATION_T2: u8 = 0x12;
const GSM0808_IE_DOWNLINK_DTX_FLAG: u8 = 0x19;
const GSM0808_IE_TALKER_FLAG: u8 = 0x35;
const GSM0808_IE_GROUP_CALL_REFERENCE: u8 = 0x37;
const GSM0808_IE_LSA_ACCESS_CTRL_SUPPR: u8 = 0x3f;

/// Wire shape of a tagged information element.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum TlvShape {
    /// Tag followed by a fixed number of value octets.
    Fixed(usize),
    /// Tag with a single value octet.
    Tv,
    /// Tag only.
    T,
    /// Tag, length octet, value.
    Tlv,
}

lazy_static! {
    static ref BSSMAP_TLVDEF: HashMap<u8, TlvShape> = {
        let mut def = HashMap::new();
        def.insert(GSM0808_IE_CIRCUIT_IDENTITY_CODE, TlvShape::Fixed(2));
        def.insert(GSM0808_IE_INTERFERENCE_BAND_TO_USE, TlvShape::Tv);
        def.insert(GSM0808_IE_PRIORITY, TlvShape::Tlv);
        def.insert(GSM0808_IE_CHANNEL_TYPE, TlvShape::Tlv);
        def.insert(GSM0808_IE_CLASSMARK_INFORMATION_T2, TlvShape::Tlv);
        def.insert(GSM0808_IE_DOWNLINK_DTX_FLAG, TlvShape::Tv);
        def.insert(GSM0808_IE_TALKER_FLAG, TlvShape::T);
        def.insert(GSM0808_IE_GROUP_CALL_REFERENCE, TlvShape::Tlv);
        def.insert(GSM0808_IE_LSA_ACCESS_CTRL_SUPPR, TlvShape::Tv);
        def
    };
}

/// Offsets and lengths of the parsed IE values inside the scanned buffer.
#[derive(Debug)]
struct TlvParsed {
    values: HashMap<u8, (usize, usize)>,
}

fn tlv_parse(buf: &[u8]) -> NatResult<TlvParsed> {
    let mut values = HashMap::new();
    let mut pos = 0;

    while pos < buf.len() {
        let tag = buf[pos];
        pos += 1;

        let shape = *BSSMAP_TLVDEF.get(&tag).ok_or(NatError::TlvParse)?;

        let (offset, length) = match shape {
            TlvShape::T => (pos, 0),
            TlvShape::Tv => {
                if pos + 1 > buf.len() {
                    return Err(NatError::TlvParse);
                }
                (pos, 1)
            }
            TlvShape::Fixed(length) => {
                if pos + length > buf.len() {
                    return Err(NatError::TlvParse);
                }
                (pos, length)
            }
            TlvShape::Tlv => {
                if pos >= buf.len() {
                    return Err(NatError::TlvParse);
                }
                let length = buf[pos] as usize;
                pos += 1;
                if pos + length > buf.len() {
                    return Err(NatError::TlvParse);
                }
                (pos, length)
            }
        };

        pos = offset + length;
        values.insert(tag, (offset, length));
    }

    Ok(TlvParsed { values })
}

impl Nat {
    /// Remaps the CIC of a BSSMAP ASSIGNMENT REQUEST onto a freshly
    /// allocated BSC endpoint, patching the message in place. Sessions
    /// still holding the upstream endpoint are stale and get torn down
    /// first: the MSC reusing a circuit means the old call is gone.
    pub fn assign_patch(&mut self, sccp_ref: SccpRef, l3: Option<&mut [u8]>) -> NatResult<()> {
        let l3 = match l3 {
            Some(l3) => l3,
            None => {
                logging::error!(self.log, "assignment message should have a layer3 part");
                return Err(NatError::MissingLayer3);
            }
        };

        if l3.len() < 3 {
            logging::error!(self.log, "assignment message has no room for GSM0808");
            return Err(NatError::ShortLayer3);
        }

        let parsed = match tlv_parse(&l3[3..]) {
            Ok(parsed) => parsed,
            Err(err) => {
                logging::error!(self.log, "failed to parse the assignment message");
                return Err(err);
            }
        };

        let cic_offset = match parsed.values.get(&GSM0808_IE_CIRCUIT_IDENTITY_CODE) {
            Some(&(offset, 2)) => offset + 3,
            _ => {
                logging::error!(self.log, "circuit identity code not found in assignment message");
                return Err(NatError::CicMissing);
            }
        };

        let cic = BigEndian::read_u16(&l3[cic_offset..cic_offset + 2]);
        let (multiplex, timeslot) = cic::decode_cic(cic);
        let endpoint = cic::timeslot_to_endpoint(multiplex, timeslot);

        if endpoint >= self.trunk.number_endpoints {
            logging::error!(self.log, "MSC attempted to assign a bad endpoint"; "endpoint" => endpoint);
            return Err(NatError::BadEndpoint(endpoint));
        }

        let stale: Vec<SccpRef> = self
            .sessions
            .iter()
            .filter(|other| other.sccp_ref != sccp_ref && other.msc_endp == Some(endpoint))
            .map(|other| other.sccp_ref)
            .collect();

        for old_ref in stale {
            logging::error!(self.log, "endpoint reassigned while still in use";
                            "endpoint" => endpoint,
                            "old" => old_ref,
                            "new" => sccp_ref);
            self.mgcp_dlcx(old_ref);
        }

        let bsc_id = match self.sessions.get(sccp_ref) {
            Some(connection) => connection.bsc,
            None => {
                logging::error!(self.log, "assignment for an unknown session"; "sccp" => sccp_ref);
                return Err(NatError::UnknownSession);
            }
        };

        if let Some(connection) = self.sessions.get_mut(sccp_ref) {
            connection.msc_endp = Some(endpoint);
        }

        let bsc_endp = {
            let connection = match self.bscs.get_mut(bsc_id).and_then(|slot| slot.as_mut()) {
                Some(connection) => connection,
                None => {
                    logging::error!(self.log, "assignment for a BSC that is gone"; "bsc" => bsc_id);
                    return Err(NatError::UnknownBsc);
                }
            };

            connection.init_endpoints_if_needed()?;
            connection.assign_endpoint()?
        };

        if let Some(connection) = self.sessions.get_mut(sccp_ref) {
            connection.bsc_endp = Some(bsc_endp);
        }

        let new_cic = cic::create_cic(bsc_endp);
        BigEndian::write_u16(&mut l3[cic_offset..cic_offset + 2], new_cic);

        Ok(())
    }

    /// Tears the media half of a session down, notifying the BSC with a
    /// DLCX it must not answer.
    pub fn mgcp_dlcx(&mut self, sccp_ref: SccpRef) {
        let (bsc_id, msc_endp, bsc_endp) = match self.sessions.get(sccp_ref) {
            Some(connection) => (connection.bsc, connection.msc_endp, connection.bsc_endp),
            None => return,
        };

        if let Some(bsc_endp) = bsc_endp {
            if let Some(connection) = self.bscs.get_mut(bsc_id).and_then(|slot| slot.as_mut()) {
                if connection.has_endpoint_status() {
                    if !connection.release_endpoint(bsc_endp) {
                        logging::error!(self.log, "endpoint was not in use"; "endpoint" => bsc_endp);
                    }

                    connection.send_dlcx(bsc_endp);

                    if let Some(msc_endp) = msc_endp {
                        self.pending.free(msc_endp);
                    }
                }
            }
        }

        if let Some(connection) = self.sessions.get_mut(sccp_ref) {
            connection.msc_endp = None;
            connection.bsc_endp = None;
        }
    }
}
