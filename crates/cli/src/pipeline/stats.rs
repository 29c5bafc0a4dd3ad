//! Run summary assembly.

use std::time::Duration;

use dispatcher::DispatcherReport;
use ingestion::ReaderOutcome;
use observability::{ReaderSummary, RunSummary, SinkSummary};

/// Fold reader outcomes and the dispatcher report into one summary
pub fn build_summary(
    elapsed: Duration,
    readers: &[ReaderOutcome],
    report: &DispatcherReport,
) -> RunSummary {
    RunSummary {
        elapsed,
        records_dispatched: report.records_dispatched,
        records_discarded: report.records_discarded,
        readers: readers
            .iter()
            .map(|outcome| ReaderSummary {
                name: outcome.name.clone(),
                records: outcome.records,
                error: outcome.error.as_ref().map(ToString::to_string),
            })
            .collect(),
        sinks: report
            .sinks
            .iter()
            .map(|(name, m)| SinkSummary {
                name: name.clone(),
                dispatched: m.dispatched_count,
                written: m.write_count,
                failed: m.failure_count,
                dropped: m.dropped_count,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher::MetricsSnapshot;
    use ingestion::IngestionError;

    #[test]
    fn test_summary_totals() {
        let readers = vec![
            ReaderOutcome {
                name: "InputFile[0]".into(),
                records: 7,
                error: None,
            },
            ReaderOutcome {
                name: "InputFile[1]".into(),
                records: 3,
                error: Some(IngestionError::startup("InputFile[1]", "gone")),
            },
        ];
        let report = DispatcherReport {
            records_dispatched: 10,
            records_discarded: 0,
            sinks: vec![(
                "OutputFile[0]".into(),
                MetricsSnapshot {
                    dispatched_count: 8,
                    write_count: 8,
                    dropped_count: 2,
                    ..Default::default()
                },
            )],
        };

        let summary = build_summary(Duration::from_secs(1), &readers, &report);
        assert_eq!(summary.total_received(), 10);
        assert_eq!(summary.total_dropped(), 2);
        assert_eq!(summary.failed_readers(), 1);
        assert_eq!(summary.sinks[0].written, 8);
    }
}
