//! Prometheus metrics of the controller, served as text on `/metrics`.
use std::time::Duration;

use lazy_static::lazy_static;
use nsgate_config::{EventKind, RejectReason, ResourceKind};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    static ref EVENTS_PROCESSED: IntCounterVec = {
        let counter = IntCounterVec::new(Opts::new("nsgate_events_processed_total", "Resource events applied by the reconcile loop"), &["kind", "event"])
            .expect("fail to create counter");
        REGISTRY.register(Box::new(counter.clone())).expect("fail to register counter");
        counter
    };

    static ref VALIDATION_REJECTIONS: IntCounterVec = {
        let counter = IntCounterVec::new(Opts::new("nsgate_validation_rejections_total", "Route declarations rejected by validation"), &["reason"])
            .expect("fail to create counter");
        REGISTRY.register(Box::new(counter.clone())).expect("fail to register counter");
        counter
    };

    static ref RELOADS: IntCounterVec = {
        let counter = IntCounterVec::new(Opts::new("nsgate_reloads_total", "Data plane reload attempts"), &["result"]).expect("fail to create counter");
        REGISTRY.register(Box::new(counter.clone())).expect("fail to register counter");
        counter
    };

    static ref RELOAD_DURATION: Histogram = {
        let histogram = Histogram::with_opts(HistogramOpts::new("nsgate_reload_duration_seconds", "Data plane reload duration in seconds"))
            .expect("fail to create histogram");
        REGISTRY.register(Box::new(histogram.clone())).expect("fail to register histogram");
        histogram
    };

    static ref WATCH_RESYNCS: IntCounterVec = {
        let counter = IntCounterVec::new(Opts::new("nsgate_watch_resyncs_total", "Watch resyncs and disconnects"), &["result"]).expect("fail to create counter");
        REGISTRY.register(Box::new(counter.clone())).expect("fail to register counter");
        counter
    };

    static ref ROUTING_TABLE_ENTRIES: IntGauge = {
        let gauge = IntGauge::new("nsgate_routing_table_entries", "Entries in the last published route table").expect("fail to create gauge");
        REGISTRY.register(Box::new(gauge.clone())).expect("fail to register gauge");
        gauge
    };
}

pub fn record_event(kind: ResourceKind, event: EventKind) {
    EVENTS_PROCESSED.with_label_values(&[kind.as_str(), event.as_str()]).inc();
}

pub fn record_rejection(reason: RejectReason) {
    VALIDATION_REJECTIONS.with_label_values(&[reason.as_str()]).inc();
}

pub fn record_reload(success: bool, duration: Duration) {
    RELOADS.with_label_values(&[if success { "success" } else { "failure" }]).inc();
    RELOAD_DURATION.observe(duration.as_secs_f64());
}

pub fn record_watch(result: &str) {
    WATCH_RESYNCS.with_label_values(&[result]).inc();
}

pub fn set_table_entries(entries: usize) {
    ROUTING_TABLE_ENTRIES.set(i64::try_from(entries).unwrap_or(i64::MAX));
}

/// Encode every metric in the text exposition format.
pub fn gather() -> Result<String, String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer).map_err(|e| format!("fail to encode metrics: {e}"))?;
    String::from_utf8(buffer).map_err(|e| format!("metrics are not utf-8: {e}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gather() {
        record_event(ResourceKind::Route, EventKind::Added);
        record_rejection(RejectReason::CrossNamespaceReference);
        record_reload(true, Duration::from_millis(5));
        record_watch("resynced");
        set_table_entries(3);
        let text = gather().expect("gather");
        assert!(text.contains(r#"nsgate_events_processed_total{event="added",kind="route"}"#));
        assert!(text.contains(r#"nsgate_validation_rejections_total{reason="CrossNamespaceReference"}"#));
        assert!(text.contains("nsgate_reload_duration_seconds_count"));
        assert!(text.contains("nsgate_routing_table_entries"));
    }
}
