//! Test utilities for secure sessions.
//!
//! This module is only available when compiling tests or when the `testing`
//! feature is enabled. Integration tests and benchmarks need it:
//! `cargo test --features testing`.
//!
//! - [`TestPki`] - a throwaway CA and leaf certificate for one hostname
//! - [`TestServer`] - a one-connection loopback peer driven by a script
//!
//! # Example
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use tlswrap::testing::{TestPki, TestServer};
//!
//! let pki = TestPki::generate("example.test").unwrap();
//! let server = TestServer::spawn(&pki, |tls| {
//!     let mut buf = [0u8; 4];
//!     tls.read_exact(&mut buf)?;
//!     tls.write_all(b"pong")
//! })
//! .unwrap();
//!
//! let config = pki.client_config().unwrap();
//! let mut session = config.wrap(server.connect().unwrap(), "example.test").unwrap();
//! session.write(b"ping").unwrap();
//! ```

pub mod pki;
pub mod server;

pub use pki::{TestPki, TEST_CA_NAME};
pub use server::TestServer;
