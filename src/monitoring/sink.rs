use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use async_lock::Mutex as AsyncMutex;

use crate::monitoring::error::{instrumentation_fault, internal_error, MonitoringResult};
use crate::monitoring::options::MonitoringOptions;
use crate::monitoring::timing::TimingRecord;
use crate::platform::runtime;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Receiver of finished timing records.
///
/// `record` runs on the thread that finished the network call, right before the caller's
/// handler or delegate is notified, so implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: TimingRecord);

    /// Receives the monitoring options once, when interception is installed.
    fn configure(&self, options: &MonitoringOptions) {
        let _ = options;
    }
}

/// Hands `record` to `sink`, containing any panic raised by the sink.
pub(crate) fn submit(sink: &dyn MetricsSink, record: TimingRecord) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.record(record))).is_err() {
        log::warn!(
            "{}",
            instrumentation_fault("metrics sink panicked while recording a timing record")
        );
    }
}

/// Downstream consumer of batched records, typically an uploader.
#[async_trait::async_trait]
pub trait MetricsReporter: Send + Sync {
    async fn report(&self, batch: Vec<TimingRecord>) -> MonitoringResult<()>;
}

/// Sink that simply keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingMetricsSink {
    records: Mutex<Vec<TimingRecord>>,
}

impl CollectingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TimingRecord> {
        self.lock().clone()
    }

    pub fn take(&self) -> Vec<TimingRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TimingRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsSink for CollectingMetricsSink {
    fn record(&self, record: TimingRecord) {
        self.lock().push(record);
    }
}

/// Reporter that keeps every delivered batch in memory.
#[derive(Debug, Default)]
pub struct MemoryMetricsReporter {
    batches: AsyncMutex<Vec<Vec<TimingRecord>>>,
}

impl MemoryMetricsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batches(&self) -> Vec<Vec<TimingRecord>> {
        self.batches.lock().await.clone()
    }

    pub async fn records(&self) -> Vec<TimingRecord> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }
}

#[async_trait::async_trait]
impl MetricsReporter for MemoryMetricsReporter {
    async fn report(&self, batch: Vec<TimingRecord>) -> MonitoringResult<()> {
        self.batches.lock().await.push(batch);
        Ok(())
    }
}

/// Reporter that writes each record to the `log` facade at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMetricsReporter;

#[async_trait::async_trait]
impl MetricsReporter for LogMetricsReporter {
    async fn report(&self, batch: Vec<TimingRecord>) -> MonitoringResult<()> {
        for record in batch {
            log::debug!(
                "{} {} -> {:?} in {:?} ({:?} bytes)",
                record.http_method(),
                record.url(),
                record.outcome(),
                record.duration(),
                record.bytes_transferred()
            );
        }
        Ok(())
    }
}

enum SinkMessage {
    Record(TimingRecord),
    Flush(Sender<()>),
    /// Options changed; the worker re-reads its flush interval.
    Reconfigure,
}

/// Non-blocking sink adapter in front of a [`MetricsReporter`].
///
/// Records are sampled, pushed into a bounded buffer with `try_send` and batched to the
/// reporter by a background task, either when `max_batch_size` records are waiting or
/// every `flush_interval`. A full buffer drops the record instead of waiting.
pub struct BufferedMetricsSink {
    sender: Sender<SinkMessage>,
    options: Arc<RwLock<MonitoringOptions>>,
    dropped: AtomicU64,
}

impl BufferedMetricsSink {
    pub fn new(reporter: Arc<dyn MetricsReporter>, options: MonitoringOptions) -> Arc<Self> {
        let (sender, receiver) = async_channel::bounded(options.max_buffered_records.max(1));
        let options = Arc::new(RwLock::new(options));
        let worker = SinkWorker {
            receiver,
            reporter,
            options: Arc::clone(&options),
            pending: Vec::new(),
        };
        runtime::spawn_detached(worker.run());
        Arc::new(Self {
            sender,
            options,
            dropped: AtomicU64::new(0),
        })
    }

    /// Number of records discarded because the buffer was full.
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Delivers everything buffered so far to the reporter and waits for it to finish.
    pub async fn flush(&self) -> MonitoringResult<()> {
        let (done_tx, done_rx) = async_channel::bounded(1);
        self.sender
            .send(SinkMessage::Flush(done_tx))
            .await
            .map_err(|_| internal_error("metrics sink worker has stopped"))?;
        done_rx
            .recv()
            .await
            .map_err(|_| internal_error("metrics sink worker stopped before flushing"))
    }

    fn current_options(&self) -> MonitoringOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for BufferedMetricsSink {
    fn record(&self, record: TimingRecord) {
        let options = self.current_options();
        if !options.monitoring_enabled || !options.should_sample() {
            return;
        }
        match self.sender.try_send(SinkMessage::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("metrics buffer full; dropping timing record");
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("metrics sink closed; dropping timing record");
            }
        }
    }

    fn configure(&self, options: &MonitoringOptions) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options.clone();
        // A full buffer already keeps the worker looping, so losing this wake-up is fine.
        let _ = self.sender.try_send(SinkMessage::Reconfigure);
    }
}

struct SinkWorker {
    receiver: Receiver<SinkMessage>,
    reporter: Arc<dyn MetricsReporter>,
    options: Arc<RwLock<MonitoringOptions>>,
    pending: Vec<TimingRecord>,
}

impl SinkWorker {
    async fn run(mut self) {
        let mut period = self.flush_period();
        let mut ticker = Self::ticker(period);
        loop {
            let configured = self.flush_period();
            if configured != period {
                log::debug!("metrics flush interval changed to {configured:?}");
                period = configured;
                ticker = Self::ticker(period);
            }
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Ok(SinkMessage::Record(record)) => {
                        self.pending.push(record);
                        if self.pending.len() >= self.read_options().max_batch_size {
                            self.report().await;
                        }
                    }
                    Ok(SinkMessage::Flush(done)) => {
                        self.report().await;
                        let _ = done.send(()).await;
                    }
                    Ok(SinkMessage::Reconfigure) => {}
                    Err(_) => {
                        self.report().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.report().await,
            }
        }
    }

    fn flush_period(&self) -> Duration {
        self.read_options().flush_interval.max(MIN_FLUSH_INTERVAL)
    }

    /// First tick one full period from now.
    fn ticker(period: Duration) -> tokio::time::Interval {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    }

    fn read_options(&self) -> MonitoringOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn report(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let retained = batch.clone();
        if let Err(err) = self.reporter.report(batch).await {
            log::debug!("metrics report failed: {err}");
            self.requeue(retained);
        }
    }

    fn requeue(&mut self, mut failed: Vec<TimingRecord>) {
        failed.append(&mut self.pending);
        let cap = self.read_options().max_buffered_records;
        if failed.len() > cap {
            let excess = failed.len() - cap;
            failed.drain(..excess);
            log::debug!("dropping {excess} timing records after failed report");
        }
        self.pending = failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::timing::{CallOutcome, TimingRecorder};
    use crate::net::NetworkRequest;
    use std::time::Instant;

    fn record(path: &str) -> TimingRecord {
        let request = NetworkRequest::get(&format!("https://example.com/{path}")).unwrap();
        let recorder = TimingRecorder::new();
        recorder.end(recorder.begin(&request), CallOutcome::Success)
    }

    struct SlowReporter;

    #[async_trait::async_trait]
    impl MetricsReporter for SlowReporter {
        async fn report(&self, _batch: Vec<TimingRecord>) -> MonitoringResult<()> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }
    }

    struct PanickingSink;

    impl MetricsSink for PanickingSink {
        fn record(&self, _record: TimingRecord) {
            panic!("sink exploded");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn flush_delivers_buffered_records() {
        let reporter = Arc::new(MemoryMetricsReporter::new());
        let sink = BufferedMetricsSink::new(reporter.clone(), MonitoringOptions::default());
        for path in ["a", "b", "c"] {
            sink.record(record(path));
        }
        sink.flush().await.unwrap();

        let urls: Vec<String> = reporter
            .records()
            .await
            .iter()
            .map(|record| record.url().to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c"
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_batches_are_reported_without_flush() {
        let reporter = Arc::new(MemoryMetricsReporter::new());
        let options = MonitoringOptions {
            max_batch_size: 2,
            ..Default::default()
        };
        let sink = BufferedMetricsSink::new(reporter.clone(), options);
        sink.record(record("one"));
        sink.record(record("two"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while reporter.batches().await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reporter.batches().await.first().map(Vec::len), Some(2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shortened_flush_interval_takes_effect_without_flush() {
        let reporter = Arc::new(MemoryMetricsReporter::new());
        let sink = BufferedMetricsSink::new(reporter.clone(), MonitoringOptions::default());
        sink.configure(&MonitoringOptions {
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        });
        sink.record(record("periodic"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while reporter.records().await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reporter.records().await.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_or_unsampled_records_are_skipped() {
        let reporter = Arc::new(MemoryMetricsReporter::new());
        let sink = BufferedMetricsSink::new(reporter.clone(), MonitoringOptions::default());
        sink.configure(&MonitoringOptions {
            sampling_rate: 0,
            ..Default::default()
        });
        sink.record(record("sampled-out"));
        sink.configure(&MonitoringOptions {
            monitoring_enabled: false,
            ..Default::default()
        });
        sink.record(record("disabled"));
        sink.flush().await.unwrap();

        assert!(reporter.records().await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_reporter_never_blocks_record() {
        let options = MonitoringOptions {
            max_batch_size: 1,
            max_buffered_records: 4,
            ..Default::default()
        };
        let sink = BufferedMetricsSink::new(Arc::new(SlowReporter), options);

        let started = Instant::now();
        for idx in 0..20 {
            sink.record(record(&idx.to_string()));
        }
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(sink.dropped_records() > 0);
    }

    #[test]
    fn submit_contains_sink_panics() {
        submit(&PanickingSink, record("boom"));
        let collecting = CollectingMetricsSink::new();
        submit(&collecting, record("fine"));
        assert_eq!(collecting.len(), 1);
    }
}
