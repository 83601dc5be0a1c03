//! Race engine
//!
//! Builds withheld requests and dependency chains on an established
//! [`Connection`](crate::http::h2::Connection) and releases them together.
//!
//! # Examples
//!
//! ```no_run
//! use h2race::http::h2::{Connection, ConnectionConfig, RequestSpec};
//! use h2race::http::tls::TlsConnector;
//! use h2race::race::{RaceConfig, RaceOrchestrator};
//! use h2race::sink::LogSink;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = TlsConnector::new()?;
//! let mut conn = Connection::new(ConnectionConfig::default(), Arc::new(LogSink));
//! conn.setup(&connector, "shop.example", 443)?;
//!
//! let redeem = RequestSpec::builder("POST", "/redeem").body("code=WELCOME").build();
//! let specs = vec![redeem; 20];
//! let report = RaceOrchestrator::new(&mut conn, RaceConfig::default()).race(&specs)?;
//! println!("{:?}", report.statuses());
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod chain;
pub mod orchestrator;
pub mod read_loop;

pub use assembler::{CompletionFrame, DependencyLink, RequestAssembler, WithheldRequest};
pub use chain::{DependencyChain, DependencyChainBuilder, RaceSet};
pub use orchestrator::{RaceConfig, RaceConfigBuilder, RaceOrchestrator, RaceReport};
pub use read_loop::{
    DrainSummary, FrameObserver, LogObserver, ReadLoop, ResponseCollector, StreamResponse,
};
