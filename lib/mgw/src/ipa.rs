use byteorder::{BigEndian, ByteOrder};

/// Legacy MGCP stream identifier on the ipaccess multiplex.
pub const IPAC_PROTO_MGCP_OLD: u8 = 0xfc;
/// CCM housekeeping stream (id requests, pongs); not handled here.
pub const IPAC_PROTO_IPACCESS: u8 = 0xfe;

pub const HEADER_SIZE: usize = 3;

/// Prepends the three byte ipaccess header to a payload.
pub fn frame(proto: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&[0, 0, proto]);
    BigEndian::write_u16(&mut out[0..2], payload.len() as u16);
    out.extend_from_slice(payload);
    out
}

/// Splits one frame off the front of `buf`. Returns the stream id, the
/// payload and the number of bytes consumed, or `None` while incomplete.
pub fn deframe(buf: &[u8]) -> Option<(u8, &[u8], usize)> {
    if buf.len() < HEADER_SIZE {
        return None;
    }

    let length = BigEndian::read_u16(&buf[0..2]) as usize;

    if buf.len() < HEADER_SIZE + length {
        return None;
    }

    Some((buf[2], &buf[HEADER_SIZE..HEADER_SIZE + length], HEADER_SIZE + length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = frame(IPAC_PROTO_MGCP_OLD, b"DLCX");

        assert_eq!(&frame[..], &[0x00, 0x04, 0xfc, b'D', b'L', b'C', b'X']);
    }

    #[test]
    fn test_deframe_roundtrip() {
        let mut buf = frame(IPAC_PROTO_MGCP_OLD, b"MDCX 23");
        buf.extend_from_slice(&frame(IPAC_PROTO_IPACCESS, &[0x01]));

        let (proto, payload, used) = deframe(&buf).unwrap();
        assert_eq!(proto, IPAC_PROTO_MGCP_OLD);
        assert_eq!(payload, b"MDCX 23");

        let (proto, payload, _) = deframe(&buf[used..]).unwrap();
        assert_eq!(proto, IPAC_PROTO_IPACCESS);
        assert_eq!(payload, &[0x01]);
    }

    #[test]
    fn test_deframe_incomplete() {
        let frame = frame(IPAC_PROTO_MGCP_OLD, b"CRCX");

        assert!(deframe(&frame[..2]).is_none());
        assert!(deframe(&frame[..frame.len() - 1]).is_none());
    }
}
