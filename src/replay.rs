//! Replay of captured requests as races
//!
//! Captured flows come from a JSON file (an array of [`Flow`] objects, as an
//! intercepting proxy exports them). A [`Replayer`] connects to the first
//! flow's host and runs one of the two race commands over all flows.

use crate::http::h2::error::ConnectionError;
use crate::http::h2::request::{authority_for, RequestSpec};
use crate::http::h2::{Connection, ConnectionConfig};
use crate::http::session::Connector;
use crate::http::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use crate::race::{RaceConfig, RaceOrchestrator, RaceReport};
use crate::sink::EventSink;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const TARGET: &str = "h2race::replay";

/// Headers that only mean something on an HTTP/1 connection
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Cannot read flows: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid flow file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

fn default_scheme() -> String {
    "https".to_string()
}

/// Captured request body
///
/// Text bodies are a JSON string; anything else is an array of byte values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowBody {
    Text(String),
    Raw(Vec<u8>),
}

impl FlowBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FlowBody::Text(text) => text.as_bytes(),
            FlowBody::Raw(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl Default for FlowBody {
    fn default() -> Self {
        FlowBody::Text(String::new())
    }
}

/// One captured request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub method: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: FlowBody,
}

impl Flow {
    /// Explicit port, or the scheme's default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.scheme.eq_ignore_ascii_case("http") {
            DEFAULT_HTTP_PORT
        } else {
            DEFAULT_HTTPS_PORT
        })
    }

    pub fn is_tls(&self) -> bool {
        !self.scheme.eq_ignore_ascii_case("http")
    }

    /// `host`, with the port unless it is the scheme's default
    pub fn authority(&self, port: u16) -> String {
        authority_for(&self.scheme.to_ascii_lowercase(), &self.host, port)
    }

    /// The request as it goes out on an HTTP/2 stream to the flow's own port
    pub fn to_request_spec(&self) -> RequestSpec {
        self.request_spec_on(self.port())
    }

    /// The request as it goes out on an HTTP/2 stream to `port`
    ///
    /// HTTP/1-only headers are dropped and the authority is built from `host`.
    pub fn request_spec_on(&self, port: u16) -> RequestSpec {
        let headers = self
            .headers
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)))
            .map(|(name, value)| (name.clone(), value.clone()));

        RequestSpec::builder(self.method.as_str(), self.path.as_str())
            .authority(self.authority(port))
            .headers(headers)
            .body(self.body.as_bytes().to_vec())
            .build()
    }
}

/// Parse a JSON array of flows
pub fn parse_flows(json: &str) -> Result<Vec<Flow>, ReplayError> {
    Ok(serde_json::from_str(json)?)
}

/// Load flows from a JSON file
pub fn load_flows<P: AsRef<Path>>(path: P) -> Result<Vec<Flow>, ReplayError> {
    let content = fs::read_to_string(path)?;
    parse_flows(&content)
}

/// Runs the race commands over fresh connections
pub struct Replayer<C: Connector> {
    connector: C,
    conn_config: ConnectionConfig,
    race_config: RaceConfig,
    port: Option<u16>,
    sink: Arc<dyn EventSink>,
}

impl<C: Connector> Replayer<C> {
    pub fn new(connector: C, sink: Arc<dyn EventSink>) -> Self {
        Replayer {
            connector,
            conn_config: ConnectionConfig::default(),
            race_config: RaceConfig::default(),
            port: None,
            sink,
        }
    }

    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.conn_config = config;
        self
    }

    pub fn race_config(mut self, config: RaceConfig) -> Self {
        self.race_config = config;
        self
    }

    /// Connect to `port` instead of the first flow's port
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Race every flow against the others
    ///
    /// Returns `None` when there is nothing to replay.
    pub fn race_replay(&self, flows: &[Flow]) -> Result<Option<RaceReport>, ReplayError> {
        self.run(flows, |orchestrator, specs| orchestrator.race(specs))
    }

    /// Send a dependency chain first, then race every flow after its tail
    ///
    /// Returns `None` when there is nothing to replay.
    pub fn dependent_stream_replay(
        &self,
        flows: &[Flow],
    ) -> Result<Option<RaceReport>, ReplayError> {
        self.run(flows, |orchestrator, specs| orchestrator.dependent_race(specs))
    }

    fn run<F>(&self, flows: &[Flow], race: F) -> Result<Option<RaceReport>, ReplayError>
    where
        F: FnOnce(
            &mut RaceOrchestrator<'_, C::Transport>,
            &[RequestSpec],
        ) -> crate::http::h2::Result<RaceReport>,
    {
        let first = match flows.first() {
            Some(flow) => flow,
            None => {
                self.sink.warn(TARGET, format_args!("no flows to replay"));
                return Ok(None);
            }
        };
        let host = first.host.as_str();
        let port = self.port.unwrap_or_else(|| first.port());

        for flow in flows.iter().filter(|f| !f.host.eq_ignore_ascii_case(host)) {
            self.sink.warn(
                TARGET,
                format_args!(
                    "{} {} targets {} but is sent to {}",
                    flow.method, flow.path, flow.host, host
                ),
            );
        }

        let specs: Vec<RequestSpec> = flows
            .iter()
            .map(|flow| flow.request_spec_on(self.port.unwrap_or_else(|| flow.port())))
            .collect();
        let mut conn = Connection::new(self.conn_config.clone(), Arc::clone(&self.sink));
        conn.setup(&self.connector, host, port)?;

        let result = {
            let mut orchestrator = RaceOrchestrator::new(&mut conn, self.race_config.clone());
            race(&mut orchestrator, &specs)
        };
        if let Err(e) = conn.close() {
            self.sink.debug(TARGET, format_args!("close failed: {}", e));
        }

        Ok(Some(result?))
    }
}
