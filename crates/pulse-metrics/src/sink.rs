use tracing::{debug, warn};

use pulse_core::{ErrorSink, PipelineError};

use crate::collector::PipelineMetrics;

/// 写日志并按类别计数
impl ErrorSink for PipelineMetrics {
    fn report(&self, error: PipelineError) {
        self.record_error(error_kind(&error));
        match &error {
            PipelineError::Scrape(e) => {
                warn!(target_address = %e.target, cause = %e.cause, "Scrape failed");
                self.record_scrape_error(&e.target, &e.cause);
            }
            PipelineError::Parse { target, error } => {
                warn!(target_address = %target, line = error.line, reason = %error.reason, "Malformed exposition line");
                self.record_parse_errors(target, 1);
            }
            PipelineError::OutOfOrder(e) => {
                debug!(series = %e.series, timestamp = e.timestamp, last = e.last, "Out-of-order sample dropped");
                self.record_out_of_order();
            }
            PipelineError::Evaluation { rule, error } => {
                warn!(rule = %rule, error = %error, "Rule evaluation failed");
            }
            PipelineError::Notify { notifier, error } => {
                warn!(notifier = %notifier, error = %error, "Notification delivery failed");
            }
        }
    }
}

fn error_kind(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::Scrape(_) => "scrape",
        PipelineError::Parse { .. } => "parse",
        PipelineError::OutOfOrder(_) => "out_of_order",
        PipelineError::Evaluation { .. } => "evaluation",
        PipelineError::Notify { .. } => "notify",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{EvaluationError, NotifyError, OutOfOrderError, ScrapeError};

    #[test]
    fn test_sink_counts_errors() {
        let metrics = PipelineMetrics::new().unwrap();

        metrics.report(PipelineError::OutOfOrder(OutOfOrderError {
            series: "up{}".into(),
            timestamp: 1,
            last: 1,
        }));
        metrics.report(PipelineError::Scrape(ScrapeError {
            target: "node:9100".into(),
            cause: "timeout".into(),
            timestamp: 1,
        }));

        let text = metrics.export().unwrap();
        assert!(text.contains("pulse_out_of_order_samples_total 1"));
        assert_eq!(metrics.last_scrape_error("node:9100").as_deref(), Some("timeout"));
        assert!(text.contains(r#"pulse_errors_total{kind="scrape"} 1"#));
    }

    #[test]
    fn test_sink_counts_every_error_kind() {
        let metrics = PipelineMetrics::new().unwrap();

        metrics.report(PipelineError::Evaluation {
            rule: "HighLoad".into(),
            error: EvaluationError::Type("bad operand".into()),
        });
        metrics.report(PipelineError::Notify {
            notifier: "webhook".into(),
            error: NotifyError::Status(503),
        });
        metrics.report(PipelineError::Notify {
            notifier: "webhook".into(),
            error: NotifyError::Status(500),
        });

        let text = metrics.export().unwrap();
        assert!(text.contains(r#"pulse_errors_total{kind="evaluation"} 1"#));
        assert!(text.contains(r#"pulse_errors_total{kind="notify"} 2"#));
    }
}
