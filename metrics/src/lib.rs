use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{metrics::Histogram, KeyValue};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use tracing::info;

pub fn low_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0,
    ]
}

/// Installs the global meter provider exporting over OTLP. Instruments
/// created before this call, or when metrics are disabled, record into the
/// no-op provider.
pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: &str,
    service_version: &str,
) -> Result<()> {
    if !enable_metrics {
        return Ok(());
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "docvault"))
        .with_attribute(KeyValue::new("service.name", "docvault-server"))
        .with_attribute(KeyValue::new(
            "docvault.instance.id",
            instance_id.to_string(),
        ))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);
    info!("metrics exporter initialized");
    Ok(())
}

pub mod api_io_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    use super::low_latency_boundaries;

    #[derive(Debug)]
    pub struct Metrics {
        pub uploads: Counter<u64>,
        pub upload_bytes: Counter<u64>,
        pub rejected_uploads: Counter<u64>,
        pub deletions: Counter<u64>,
        pub catalog_failures: Counter<u64>,
        pub upload_latency: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("document-api");
            let uploads = meter
                .u64_counter("docvault.uploads")
                .with_description("number of files committed to the blob store")
                .build();
            let upload_bytes = meter
                .u64_counter("docvault.upload_bytes")
                .with_description("bytes committed to the blob store")
                .build();
            let rejected_uploads = meter
                .u64_counter("docvault.rejected_uploads")
                .with_description("uploads rejected by validation")
                .build();
            let deletions = meter
                .u64_counter("docvault.deletions")
                .with_description("blobs removed from the blob store")
                .build();
            let catalog_failures = meter
                .u64_counter("docvault.catalog_failures")
                .with_description("metadata catalog calls that failed")
                .build();
            let upload_latency = meter
                .f64_histogram("docvault.upload_latency")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("upload handling latencies in seconds")
                .build();
            Metrics {
                uploads,
                upload_bytes,
                rejected_uploads,
                deletions,
                catalog_failures,
                upload_latency,
            }
        }
    }
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the elapsed time into `metric` when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    #[must_use]
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, &[])
    }

    #[must_use]
    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Mutex<Vec<Duration>>);

    impl TimerUpdate for Recorder {
        fn add(&self, duration: Duration, _labels: &[KeyValue]) {
            self.0.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_timer_records_on_drop() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        {
            let _timer = Timer::start(&recorder);
            assert!(recorder.0.lock().unwrap().is_empty());
        }
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_provider_is_noop() {
        init_provider(false, None, Duration::from_secs(10), "test", "0.0.0").unwrap();
        let metrics = api_io_stats::Metrics::new();
        metrics.uploads.add(1, &[]);
        let _timer = Timer::start(&metrics.upload_latency);
    }
}
