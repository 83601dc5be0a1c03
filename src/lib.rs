//! h2race - HTTP/2 single-packet race engine
//!
//! This crate sends several HTTP/2 requests on one connection with their last
//! byte held back, then releases every missing byte in a single write so the
//! server processes the requests at the same moment. It can also force an
//! ordering first, by sending a chain of streams linked through priority
//! dependencies and hanging the race off the chain's tail.
//!
//! - [`http`] has the transports (TCP, TLS with ALPN) and the HTTP/2 wire layer
//! - [`race`] assembles withheld requests and chains and runs races
//! - [`replay`] turns captured requests into races
//! - [`sink`] is where every component reports events

pub mod http;
pub mod race;
pub mod replay;
pub mod sink;

pub use http::h2::{Connection, ConnectionConfig, ConnectionError, RequestSpec};
pub use race::{RaceConfig, RaceOrchestrator, RaceReport};
pub use sink::{EventSink, LogSink, MemorySink};
