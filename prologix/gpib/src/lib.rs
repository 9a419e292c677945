//! A daemon protocol that shares one Prologix GPIB-ETHERNET controller between many clients.
//!
//! Each client connection selects the GPIB address of the instrument it wants to talk to. The
//! controller can only be switched to one address at a time and is half-duplex, so the commands
//! of all clients are queued per address and sent one by one, in round-robin order between the
//! addresses. This crate provides:
//!
//! - [`GpibBus`]: The per-address queues and the arbitration of the controller.
//! - [`GpibSession`]: The interpreter for text commands of one client connection.
//!
//! # Client commands
//!
//! - `get_status`: Reply with `status hw_connected=0|1 current_addr=N`.
//! - `set_addr N`: Select the instrument address of the session, without argument the address
//!   is cleared.
//! - `send <text>`: Forward the text.
//! - Any other line is forwarded if the session has an address. Prefix a command with `?$` to
//!   request the reply of the instrument, e.g., `?$*IDN?`.
//!
//! Sessions without address send their text directly to the controller, once it is not waiting
//! for a reply.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use labdaemon::TcpLink;
//! use prologix_gpib::{BusConfig, GpibBus, GpibSession};
//!
//! let link = TcpLink::try_new("192.168.1.3:1234").unwrap();
//! let mut bus = GpibBus::new(link, BusConfig::default());
//! bus.on_connect(Instant::now()).unwrap();
//!
//! let mut session = GpibSession::new("client1");
//! session.process_message("set_addr 5", &mut bus);
//! session.process_message("?$*IDN?", &mut bus);
//!
//! let live: Vec<u8> = session.addr().into_iter().collect();
//! bus.on_tick(Instant::now(), live).unwrap();
//! ```

#![deny(warnings, missing_docs)]

pub use bus::{ADDR_QUERY, BusConfig, BusReply, CURRENT_ADDR, GpibBus, READ_EOI, SRQ};
pub use session::{GpibSession, MAX_ADDR};

mod bus;
mod session;
