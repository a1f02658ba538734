#![allow(clippy::new_without_default)]

//! Media-gateway bridging core of a BSC NAT.
//!
//! The NAT sits between an MGCP Call Agent speaking in a single global
//! endpoint space and a set of BSCs, each owning a private endpoint range.
//! This crate translates endpoint identifiers and SDP bodies between the two
//! legs, picks a free downstream endpoint when the control plane assigns a
//! circuit, correlates the asynchronous transactions and tears media state
//! down again on failure or collision.

pub mod assign;
pub mod bsc;
pub mod cic;
pub mod config;
pub mod forward;
pub mod gateway;
pub mod ipa;
pub mod logging;
pub mod nat;
pub mod policy;
pub mod rewrite;
pub mod session;
pub mod support;
pub mod transaction;
pub mod trunk;

/// Identifier of a media endpoint inside a trunk space. Encodes a
/// (multiplex, timeslot) pair with the timeslot in the low five bits.
pub type EndpointId = usize;
