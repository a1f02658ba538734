use std::io;
use std::net;

pub type NatResult<T> = Result<T, NatError>;

/// Failure taxonomy of the bridging core. Parse and transport errors are
/// recovered locally by the caller (drop and log); resource exhaustion
/// surfaces to the assignment path; config errors are fatal at init.
#[derive(Debug, Eq, PartialEq)]
pub enum NatError {
    /// Inbound message exceeds the rewrite or forward budget.
    MessageTooLong,
    /// The `m=audio` SDP line could not be parsed.
    AudioLineUnparsed,
    MissingLayer3,
    ShortLayer3,
    TlvParse,
    CicMissing,
    BadEndpoint(usize),
    EndpointsExhausted,
    NoBscConfig,
    UnknownBsc,
    UnknownSession,
    MissingCallAgent,
    BtsIpConfigured,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NatError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        NatError::Io(io_error.kind())
    }
}

impl From<net::AddrParseError> for NatError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NatError::AddrParse
    }
}
