use std::str;

use crate::logging::{self, Logger};
use crate::support::{NatError, NatResult};
use crate::EndpointId;

const CRCX_STR: &[u8] = b"CRCX ";
const DLCX_STR: &[u8] = b"DLCX ";
const MDCX_STR: &[u8] = b"MDCX ";

const IP_STR: &[u8] = b"c=IN IP4 ";
const AUD_STR: &[u8] = b"m=audio ";
const FMT_STR: &[u8] = b"a=fmtp:";

/// Upper bound on rewritable input; the output keeps 128 bytes of slack so
/// the trailing `a=fmtp` line can always be appended.
const MAX_INPUT: usize = 4096 - 256;

/// Rewrites an MGCP message for the opposite leg: verb lines are repointed
/// at `endpoint`, the SDP connection line at `ip` and the audio line at
/// `port`. With no `endpoint` the verb lines pass through untouched (reply
/// direction). Line endings are preserved per line; only LF terminated
/// lines are emitted.
pub fn rewrite(
    log: &Logger,
    input: &[u8],
    endpoint: Option<EndpointId>,
    ip: &str,
    port: u16,
) -> NatResult<Vec<u8>> {
    if input.len() > MAX_INPUT {
        logging::error!(log, "input is too long"; "length" => input.len());
        return Err(NatError::MessageTooLong);
    }

    let mut output = Vec::with_capacity(input.len() + 256);

    let mut found_fmtp = false;
    let mut payload: Option<i32> = None;
    let mut cr = true;

    for line in complete_lines(input) {
        cr = line.ends_with(b"\r");

        if line.starts_with(CRCX_STR) {
            patch_verb(log, &mut output, "CRCX", line, endpoint, cr);
        } else if line.starts_with(DLCX_STR) {
            patch_verb(log, &mut output, "DLCX", line, endpoint, cr);
        } else if line.starts_with(MDCX_STR) {
            patch_verb(log, &mut output, "MDCX", line, endpoint, cr);
        } else if line.starts_with(IP_STR) {
            output.extend_from_slice(IP_STR);
            output.extend_from_slice(ip.as_bytes());
            push_ending(&mut output, cr);
        } else if line.starts_with(AUD_STR) {
            let pt = match parse_audio(line) {
                Some(pt) => pt,
                None => {
                    logging::error!(log, "could not parse audio line");
                    return Err(NatError::AudioLineUnparsed);
                }
            };

            payload = Some(pt);
            output.extend_from_slice(format!("m=audio {} RTP/AVP {}", port, pt).as_bytes());
            push_ending(&mut output, cr);
        } else if line.starts_with(FMT_STR) {
            found_fmtp = true;
            output.extend_from_slice(line);
            output.push(b'\n');
        } else {
            output.extend_from_slice(line);
            output.push(b'\n');
        }
    }

    if !found_fmtp {
        if let Some(pt) = payload {
            output.extend_from_slice(format!("a=fmtp:{} mode-set=2", pt).as_bytes());
            push_ending(&mut output, cr);
        }
    }

    Ok(output)
}

/// All LF terminated lines of `input`; an unterminated tail is dropped.
fn complete_lines(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut parts: Vec<&[u8]> = input.split(|&byte| byte == b'\n').collect();
    parts.pop();
    parts.into_iter()
}

#[inline]
fn push_ending(output: &mut Vec<u8>, cr: bool) {
    if cr {
        output.extend_from_slice(b"\r\n");
    } else {
        output.push(b'\n');
    }
}

/// Re-emits a verb line against the override endpoint, keeping the original
/// transaction id. An unparseable line is logged and skipped.
fn patch_verb(
    log: &Logger,
    output: &mut Vec<u8>,
    op: &str,
    line: &[u8],
    endpoint: Option<EndpointId>,
    cr: bool,
) {
    let endpoint = match endpoint {
        Some(endpoint) => endpoint,
        None => {
            output.extend_from_slice(line);
            output.push(b'\n');
            return;
        }
    };

    let transaction_id = match token_at(line, 1) {
        Some(token) => token,
        None => {
            logging::error!(log, "failed to find the transaction id"; "op" => op);
            return;
        }
    };

    output.extend_from_slice(format!("{} {} {:x}@mgw MGCP 1.0", op, transaction_id, endpoint).as_bytes());
    push_ending(output, cr);
}

fn token_at(line: &[u8], index: usize) -> Option<&str> {
    let text = str::from_utf8(line).ok()?;
    text.trim_end_matches('\r').split_ascii_whitespace().nth(index)
}

/// Parses `m=audio <port> RTP/AVP <pt>` and returns the payload type.
fn parse_audio(line: &[u8]) -> Option<i32> {
    let text = str::from_utf8(line).ok()?;
    let mut tokens = text.trim_end_matches('\r').split_ascii_whitespace();

    tokens.next()?;
    tokens.next()?.parse::<i32>().ok()?;

    if tokens.next()? != "RTP/AVP" {
        return None;
    }

    tokens.next()?.parse::<i32>().ok()
}
