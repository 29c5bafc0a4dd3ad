//! Relay metrics
//!
//! Metric names emitted across the workspace, their descriptions for the
//! Prometheus exporter, and the end-of-run summary printed by the CLI.

use std::fmt;
use std::time::Duration;

use metrics::{describe_counter, describe_gauge, Unit};

pub const RECORDS_RECEIVED_TOTAL: &str = "dnstap_relay_records_received_total";
pub const FRAMING_ERRORS_TOTAL: &str = "dnstap_relay_framing_errors_total";
pub const RECORDS_DISPATCHED_TOTAL: &str = "dnstap_relay_records_dispatched_total";
pub const RECORDS_DROPPED_TOTAL: &str = "dnstap_relay_records_dropped_total";
pub const SINK_WRITES_TOTAL: &str = "dnstap_relay_sink_writes_total";
pub const SINK_RECONNECTS_TOTAL: &str = "dnstap_relay_sink_reconnects_total";
pub const INBOUND_QUEUE_DEPTH: &str = "dnstap_relay_inbound_queue_depth";
pub const SINKS_REGISTERED: &str = "dnstap_relay_sinks_registered";

/// Register help text for every relay metric
pub fn describe_relay_metrics() {
    describe_counter!(
        RECORDS_RECEIVED_TOTAL,
        Unit::Count,
        "Records enqueued by each reader"
    );
    describe_counter!(
        FRAMING_ERRORS_TOTAL,
        Unit::Count,
        "Connections or files closed because of malformed framing"
    );
    describe_counter!(
        RECORDS_DISPATCHED_TOTAL,
        Unit::Count,
        "Records accepted into each sink queue"
    );
    describe_counter!(
        RECORDS_DROPPED_TOTAL,
        Unit::Count,
        "Records dropped because a sink queue was full"
    );
    describe_counter!(SINK_WRITES_TOTAL, Unit::Count, "Sink writes by status");
    describe_counter!(
        SINK_RECONNECTS_TOTAL,
        Unit::Count,
        "Successful reconnects after a transport failure"
    );
    describe_gauge!(
        INBOUND_QUEUE_DEPTH,
        Unit::Count,
        "Records waiting in the inbound queue"
    );
    describe_gauge!(SINKS_REGISTERED, Unit::Count, "Sinks currently registered");
}

/// Per-reader line of the run summary
#[derive(Debug, Clone, Default)]
pub struct ReaderSummary {
    pub name: String,
    pub records: u64,
    pub error: Option<String>,
}

/// Per-sink line of the run summary
#[derive(Debug, Clone, Default)]
pub struct SinkSummary {
    pub name: String,
    pub dispatched: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// End-of-run report
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub records_dispatched: u64,
    pub records_discarded: usize,
    pub readers: Vec<ReaderSummary>,
    pub sinks: Vec<SinkSummary>,
}

impl RunSummary {
    pub fn total_received(&self) -> u64 {
        self.readers.iter().map(|r| r.records).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.sinks.iter().map(|s| s.dropped).sum()
    }

    /// Dropped share of all sink deliveries, in percent
    pub fn drop_rate(&self) -> f64 {
        let offered: u64 = self.sinks.iter().map(|s| s.dispatched + s.dropped).sum();
        if offered == 0 {
            0.0
        } else {
            self.total_dropped() as f64 / offered as f64 * 100.0
        }
    }

    pub fn failed_readers(&self) -> usize {
        self.readers.iter().filter(|r| r.error.is_some()).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Relay Summary ===")?;
        writeln!(f, "Elapsed: {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Records received: {}", self.total_received())?;
        writeln!(f, "Records dispatched: {}", self.records_dispatched)?;
        if self.records_discarded > 0 {
            writeln!(f, "Records discarded at drain: {}", self.records_discarded)?;
        }
        writeln!(
            f,
            "Records dropped: {} ({:.2}%)",
            self.total_dropped(),
            self.drop_rate()
        )?;

        if !self.readers.is_empty() {
            writeln!(f, "Readers:")?;
            for reader in &self.readers {
                match &reader.error {
                    Some(error) => writeln!(f, "  {}: {} records, failed: {}", reader.name, reader.records, error)?,
                    None => writeln!(f, "  {}: {} records", reader.name, reader.records)?,
                }
            }
        }

        if !self.sinks.is_empty() {
            writeln!(f, "Sinks:")?;
            for sink in &self.sinks {
                writeln!(
                    f,
                    "  {}: written={} failed={} dropped={}",
                    sink.name, sink.written, sink.failed, sink.dropped
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            elapsed: Duration::from_millis(1500),
            records_dispatched: 100,
            records_discarded: 0,
            readers: vec![
                ReaderSummary {
                    name: "InputFile[0]".into(),
                    records: 60,
                    error: None,
                },
                ReaderSummary {
                    name: "InputTCP[0]".into(),
                    records: 40,
                    error: Some("io error".into()),
                },
            ],
            sinks: vec![
                SinkSummary {
                    name: "OutputFile[0]".into(),
                    dispatched: 100,
                    written: 100,
                    ..Default::default()
                },
                SinkSummary {
                    name: "OutputFluent[0]".into(),
                    dispatched: 90,
                    written: 90,
                    dropped: 10,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_totals() {
        let summary = summary();
        assert_eq!(summary.total_received(), 100);
        assert_eq!(summary.total_dropped(), 10);
        assert!((summary.drop_rate() - 5.0).abs() < 1e-10);
        assert_eq!(summary.failed_readers(), 1);
    }

    #[test]
    fn test_summary_display() {
        let output = summary().to_string();
        assert!(output.contains("Records received: 100"));
        assert!(output.contains("Records dropped: 10 (5.00%)"));
        assert!(output.contains("InputTCP[0]: 40 records, failed: io error"));
        assert!(output.contains("OutputFluent[0]: written=90 failed=0 dropped=10"));
        assert!(!output.contains("discarded"));
    }

    #[test]
    fn test_empty_summary_has_no_rate() {
        assert_eq!(RunSummary::default().drop_rate(), 0.0);
    }
}
