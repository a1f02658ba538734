use clap::{App, Arg};
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::io;

use mgw::bsc::{BscConfig, BscId};
use mgw::config::NatConfig;
use mgw::ipa;
use mgw::logging;
use mgw::nat::Nat;

mod parser;

use crate::parser::VerbLineParser;

const GATEWAY_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
const BSC_TOKEN_BASE: usize = 2;

const DEFAULT_BSC_LISTEN: &str = "0.0.0.0:5000";

fn main() {
    let matches = App::new("bscnatd")
        .about("MGCP media-gateway bridging NAT")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .required(true)
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .takes_value(true)
                .help("Address the BSC listener binds to"),
        )
        .get_matches();

    let log = logging::init();

    let cfg = NatConfig::load(matches.value_of("config").unwrap());

    let mut nat = match Nat::new(cfg, &log) {
        Ok(nat) => nat,
        Err(err) => {
            logging::crit!(log, "invalid NAT configuration"; "error" => ?err);
            std::process::exit(1);
        }
    };

    if let Err(err) = nat.open_gateway() {
        logging::crit!(log, "failed to open the call agent gateway"; "error" => ?err);
        std::process::exit(1);
    }

    let listen = matches.value_of("listen").unwrap_or(DEFAULT_BSC_LISTEN);
    let listener = TcpListener::bind(&listen.parse().expect("Invalid listen address"))
        .expect("Failed to bind the BSC listener");

    let poll = Poll::new().expect("Failed to create the poll");
    let mut events = Events::with_capacity(1024);

    poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())
        .expect("Listener registration failed");

    if let Some(socket) = nat.agent_socket() {
        poll.register(
            socket,
            GATEWAY_TOKEN,
            Ready::readable() | Ready::writable(),
            PollOpt::edge(),
        )
        .expect("Gateway registration failed");
    }

    logging::info!(log, "bscnatd up"; "bsc_listener" => listen);

    let mut parser = VerbLineParser::new(&log);
    let mut buf = [0u8; 4096];

    loop {
        poll.poll(&mut events, None).expect("Poll failed");

        for event in &events {
            let readiness = event.readiness();

            match event.token() {
                GATEWAY_TOKEN => {
                    if readiness.is_readable() {
                        loop {
                            match nat.recv_agent(&mut buf) {
                                Ok(length) => {
                                    let msg = buf[..length].to_vec();
                                    nat.handle_agent_message(&mut parser, &msg);
                                }
                                Err(_) => break,
                            }
                        }
                    }

                    if readiness.is_writable() {
                        drop(nat.flush_agent());
                    }
                }
                LISTENER_TOKEN => loop {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            let id = nat.bsc_connected(Some(BscConfig::default()), Some(stream));

                            let registered = nat
                                .bsc(id)
                                .and_then(|connection| connection.stream())
                                .map(|stream| {
                                    poll.register(
                                        stream,
                                        Token(BSC_TOKEN_BASE + id),
                                        Ready::readable() | Ready::writable(),
                                        PollOpt::edge(),
                                    )
                                });

                            match registered {
                                Some(Ok(())) => {
                                    logging::info!(log, "BSC connected"; "bsc" => id, "peer" => %peer);
                                }
                                _ => {
                                    logging::error!(log, "BSC registration failed"; "bsc" => id);
                                    nat.bsc_disconnected(id);
                                }
                            }
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            logging::error!(log, "accept failed"; "error" => ?err);
                            break;
                        }
                    }
                },
                Token(token) => {
                    let id: BscId = token - BSC_TOKEN_BASE;

                    if readiness.is_readable() {
                        match nat.bsc_mut(id).map(|connection| connection.receive()) {
                            Some(Ok(frames)) => {
                                for (proto, payload) in frames {
                                    if proto == ipa::IPAC_PROTO_MGCP_OLD {
                                        nat.forward(id, &payload);
                                    } else {
                                        logging::debug!(log, "ignoring non MGCP stream"; "bsc" => id, "proto" => proto);
                                    }
                                }
                            }
                            Some(Err(err)) => {
                                logging::error!(log, "BSC read failed"; "bsc" => id, "error" => ?err);
                                nat.bsc_disconnected(id);
                                continue;
                            }
                            None => continue,
                        }
                    }

                    if readiness.is_writable() {
                        let failed = match nat.bsc_mut(id) {
                            Some(connection) => connection.flush_egress().is_err(),
                            None => false,
                        };

                        if failed {
                            logging::error!(log, "BSC write failed"; "bsc" => id);
                            nat.bsc_disconnected(id);
                        }
                    }
                }
            }
        }

        // Push out anything the handlers queued this round.
        drop(nat.flush_agent());

        for id in 0..nat.bsc_count() {
            let failed = match nat.bsc_mut(id) {
                Some(connection) => connection.flush_egress().is_err(),
                None => false,
            };

            if failed {
                logging::error!(log, "BSC write failed"; "bsc" => id);
                nat.bsc_disconnected(id);
            }
        }
    }
}
