//! Single-packet race orchestration
//!
//! A race runs in four steps on one connection:
//!
//! 1. Every participant is assembled with its last byte withheld
//! 2. The withheld frames are sent, each request as its own write
//! 3. The orchestrator sleeps for the settle delay
//! 4. All completion frames leave in one write
//!
//! The peer then holds every participant ready and receives the bytes that
//! complete them within one packet or a handful of them. A dependent race
//! first sends a priority chain in full and hangs the race set off its tail.

use super::assembler::{RequestAssembler, WithheldRequest};
use super::chain::{DependencyChain, DependencyChainBuilder};
use super::read_loop::{LogObserver, ReadLoop, ResponseCollector, StreamResponse};
use crate::http::h2::error::{ConnectionError, Result};
use crate::http::h2::frames::{Frame, FrameSequence};
use crate::http::h2::request::RequestSpec;
use crate::http::h2::stream::StreamId;
use crate::http::h2::Connection;
use crate::http::session::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TARGET: &str = "h2race::race";

/// Race timing and chain shape
#[derive(Debug, Clone)]
pub struct RaceConfig {
    settle_delay: Duration,
    read_window: Duration,
    chain_length: usize,
    chain_root: RequestSpec,
    chain_weight: u8,
}

impl RaceConfig {
    pub fn builder() -> RaceConfigBuilder {
        RaceConfigBuilder::new()
    }

    /// Pause between the withheld frames and the completion write
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// How long responses are observed after the release
    pub fn read_window(&self) -> Duration {
        self.read_window
    }

    /// Streams in the dependency chain of a dependent race
    pub fn chain_length(&self) -> usize {
        self.chain_length
    }

    /// Request sent on every chain stream
    pub fn chain_root(&self) -> &RequestSpec {
        &self.chain_root
    }

    pub fn chain_weight(&self) -> u8 {
        self.chain_weight
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        RaceConfig {
            settle_delay: Duration::from_millis(100),
            read_window: Duration::from_secs(10),
            chain_length: 10,
            chain_root: RequestSpec::new("POST", "/long"),
            chain_weight: 0,
        }
    }
}

/// Builder for [`RaceConfig`]
#[derive(Debug, Clone, Default)]
pub struct RaceConfigBuilder {
    config: RaceConfig,
}

impl RaceConfigBuilder {
    pub fn new() -> Self {
        RaceConfigBuilder::default()
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn read_window(mut self, window: Duration) -> Self {
        self.config.read_window = window;
        self
    }

    pub fn chain_length(mut self, length: usize) -> Self {
        self.config.chain_length = length;
        self
    }

    pub fn chain_root(mut self, spec: RequestSpec) -> Self {
        self.config.chain_root = spec;
        self
    }

    pub fn chain_weight(mut self, weight: u8) -> Self {
        self.config.chain_weight = weight;
        self
    }

    pub fn build(self) -> Result<RaceConfig> {
        if self.config.chain_length == 0 {
            return Err(ConnectionError::InvalidChain(
                "Chain length must be at least 1".to_string(),
            ));
        }
        Ok(self.config)
    }
}

/// Outcome of one race
#[derive(Debug, Clone, Default)]
pub struct RaceReport {
    /// Race participants, in send order
    pub stream_ids: Vec<StreamId>,
    /// The chain sent ahead of a dependent race
    pub chain: Option<DependencyChain>,
    pub settle_delay: Duration,
    /// Time spent in the completion write
    pub release_duration: Duration,
    pub responses: BTreeMap<StreamId, StreamResponse>,
    pub frames_received: usize,
    pub decode_errors: usize,
    /// The peer closed the connection during the read window
    pub closed_early: bool,
}

impl RaceReport {
    pub fn response(&self, stream_id: StreamId) -> Option<&StreamResponse> {
        self.responses.get(&stream_id)
    }

    /// Status of every participant, `None` where no response arrived
    pub fn statuses(&self) -> Vec<(StreamId, Option<u16>)> {
        self.stream_ids
            .iter()
            .map(|id| (*id, self.responses.get(id).and_then(|r| r.status)))
            .collect()
    }

    /// Participants the peer answered in full or reset
    pub fn completed(&self) -> usize {
        self.stream_ids
            .iter()
            .filter(|id| self.responses.get(id).map_or(false, StreamResponse::is_complete))
            .count()
    }
}

/// Runs races on one connection
///
/// Holds the connection exclusively for the duration of each race.
pub struct RaceOrchestrator<'c, T: Transport> {
    conn: &'c mut Connection<T>,
    config: RaceConfig,
}

impl<'c, T: Transport> RaceOrchestrator<'c, T> {
    pub fn new(conn: &'c mut Connection<T>, config: RaceConfig) -> Self {
        RaceOrchestrator { conn, config }
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Race `specs` against each other
    ///
    /// Participants get consecutive stream ids in the order given.
    pub fn race(&mut self, specs: &[RequestSpec]) -> Result<RaceReport> {
        if specs.is_empty() {
            self.conn.sink().info(TARGET, format_args!("nothing to race"));
            return Ok(self.empty_report());
        }

        let ids = self.conn.next_stream_ids(specs.len())?;
        let withheld = {
            let mut assembler = RequestAssembler::for_connection(self.conn)?;
            ids.iter()
                .zip(specs)
                .map(|(id, spec)| assembler.build_withheld(spec, *id, None))
                .collect::<Result<Vec<_>>>()?
        };

        self.spring(withheld, None)
    }

    /// Send a dependency chain in full, then race `specs` hanging off its tail
    pub fn dependent_race(&mut self, specs: &[RequestSpec]) -> Result<RaceReport> {
        if specs.is_empty() {
            self.conn.sink().info(TARGET, format_args!("nothing to race"));
            return Ok(self.empty_report());
        }

        let chain_ids = self.conn.next_stream_ids(self.config.chain_length)?;
        let race_ids = self.conn.next_stream_ids(specs.len())?;
        let race_specs: BTreeMap<StreamId, RequestSpec> = race_ids
            .iter()
            .copied()
            .zip(specs.iter().cloned())
            .collect();
        let builder = DependencyChainBuilder::new().weight(self.config.chain_weight);

        // Built in send order: the chain, then the race set by ascending id
        let (chain, chain_frames, withheld) = {
            let mut assembler = RequestAssembler::for_connection(self.conn)?;
            let (chain, chain_frames) =
                builder.build_chain(&mut assembler, &self.config.chain_root, &chain_ids)?;
            let tail = chain
                .tail()
                .ok_or_else(|| ConnectionError::InvalidChain("Chain has no tail".to_string()))?;
            let (_, withheld) = builder.build_race_set(&mut assembler, &race_specs, tail)?;
            (chain, chain_frames, withheld)
        };

        self.send_chain(&chain, &chain_frames)?;
        self.spring(withheld, Some(chain))
    }

    fn send_chain(&mut self, chain: &DependencyChain, sequences: &[FrameSequence]) -> Result<()> {
        for sequence in sequences {
            self.conn.send_sequence(sequence)?;
        }
        self.conn.sink().info(
            TARGET,
            format_args!(
                "sent dependency chain of {} streams {:?}",
                chain.len(),
                chain.ids()
            ),
        );
        Ok(())
    }

    fn spring(
        &mut self,
        withheld: Vec<WithheldRequest>,
        chain: Option<DependencyChain>,
    ) -> Result<RaceReport> {
        let sink = Arc::clone(self.conn.sink());
        let stream_ids: Vec<StreamId> = withheld.iter().map(|w| w.stream_id).collect();

        for request in &withheld {
            self.conn.send_sequence(&request.frames)?;
        }
        sink.info(
            TARGET,
            format_args!(
                "sent {} withheld requests {:?}, settling for {:?}",
                withheld.len(),
                stream_ids,
                self.config.settle_delay
            ),
        );
        thread::sleep(self.config.settle_delay);

        let completions: Vec<Frame> = withheld
            .into_iter()
            .map(|w| w.completion.into_frame())
            .collect();
        let release_duration = self.conn.send_atomic(&completions)?;

        let mut collector = ResponseCollector::new();
        let summary = {
            let mut observer = (LogObserver::new(Arc::clone(&sink)), &mut collector);
            ReadLoop::new(self.conn).drain(self.config.read_window, &mut observer)?
        };

        let report = RaceReport {
            stream_ids,
            chain,
            settle_delay: self.config.settle_delay,
            release_duration,
            responses: collector.into_responses(),
            frames_received: summary.frames,
            decode_errors: summary.decode_errors,
            closed_early: summary.closed_early,
        };
        sink.info(
            TARGET,
            format_args!(
                "race finished: {}/{} streams answered, statuses {:?}",
                report.completed(),
                report.stream_ids.len(),
                report.statuses()
            ),
        );
        Ok(report)
    }

    fn empty_report(&self) -> RaceReport {
        RaceReport {
            settle_delay: self.config.settle_delay,
            ..RaceReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RaceConfig::default();
        assert_eq!(config.settle_delay(), Duration::from_millis(100));
        assert_eq!(config.read_window(), Duration::from_secs(10));
        assert_eq!(config.chain_length(), 10);
        assert_eq!(config.chain_root().method(), "POST");
        assert_eq!(config.chain_root().path(), "/long");
        assert!(config.chain_root().body().is_empty());
        assert_eq!(config.chain_weight(), 0);
    }

    #[test]
    fn test_builder_rejects_empty_chain() {
        assert!(RaceConfig::builder().chain_length(0).build().is_err());

        let config = RaceConfig::builder()
            .settle_delay(Duration::from_millis(5))
            .chain_length(3)
            .build()
            .unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(5));
        assert_eq!(config.chain_length(), 3);
    }

    #[test]
    fn test_report_statuses() {
        let mut report = RaceReport {
            stream_ids: vec![1, 3],
            ..RaceReport::default()
        };
        report.responses.insert(
            1,
            StreamResponse {
                status: Some(200),
                ended: true,
                ..StreamResponse::default()
            },
        );

        assert_eq!(report.statuses(), vec![(1, Some(200)), (3, None)]);
        assert_eq!(report.completed(), 1);
    }
}
