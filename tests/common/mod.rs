// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use mom_send::{
    // ---
    BrokerMessage,
    CancelOutcome,
    ClientContext,
    ObserverResult,
    Result,
    ScheduleOutcome,
    SendEnvelope,
    SendError,
    SendLog,
    SendObserver,
    SendTransport,
    SendTransportBuilder,
    SharedContextSource,
};

/// Ordered record of everything the fakes saw, shared between them.
pub type Timeline = Arc<Mutex<Vec<String>>>;

pub fn events(timeline: &Timeline) -> Vec<String> {
    timeline.lock().unwrap().clone()
}

/// Client context that records every broker call on the timeline and
/// answers schedule/cancel requests with scripted outcomes.
pub struct ScriptedClient {
    // ---
    timeline: Timeline,
    schedule_outcome: Mutex<ScheduleOutcome>,
    cancel_outcome: Mutex<CancelOutcome>,
    send_faults: Mutex<Vec<SendError>>,
    schedule_faults: Mutex<Vec<SendError>>,
    cancel_gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    pub messages: Mutex<Vec<BrokerMessage>>,
    pub cancelled: Mutex<Vec<i64>>,
    pub enqueue_times: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedClient {
    pub fn new(timeline: &Timeline) -> Arc<Self> {
        Arc::new(Self {
            timeline: timeline.clone(),
            schedule_outcome: Mutex::new(ScheduleOutcome::Scheduled(1)),
            cancel_outcome: Mutex::new(CancelOutcome::Cancelled),
            send_faults: Mutex::new(Vec::new()),
            schedule_faults: Mutex::new(Vec::new()),
            cancel_gate: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            enqueue_times: Mutex::new(Vec::new()),
        })
    }

    pub fn answer_schedule(&self, outcome: ScheduleOutcome) {
        *self.schedule_outcome.lock().unwrap() = outcome;
    }

    pub fn answer_cancel(&self, outcome: CancelOutcome) {
        *self.cancel_outcome.lock().unwrap() = outcome;
    }

    /// Fail the next immediate send with `err`. Queued faults apply in order.
    pub fn fail_send(&self, err: SendError) {
        self.send_faults.lock().unwrap().push(err);
    }

    /// Fail the next schedule request with `err`. Queued faults apply in
    /// order; a failed request records nothing but the timeline event.
    pub fn fail_schedule(&self, err: SendError) {
        self.schedule_faults.lock().unwrap().push(err);
    }

    /// Hold the next cancel request: `entered` fires once it reached the
    /// client, and the broker answers only after `release` fires.
    pub fn hold_cancel(&self, entered: oneshot::Sender<()>, release: oneshot::Receiver<()>) {
        *self.cancel_gate.lock().unwrap() = Some((entered, release));
    }

    pub fn messages(&self) -> Vec<BrokerMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.timeline.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl ClientContext for ScriptedClient {
    // ---
    fn entity_path(&self) -> &str {
        "orders"
    }

    async fn send(&self, message: BrokerMessage, _cancel: &CancellationToken) -> Result<()> {
        // ---
        self.record("send");
        self.messages.lock().unwrap().push(message);

        let mut faults = self.send_faults.lock().unwrap();
        if faults.is_empty() {
            Ok(())
        } else {
            Err(faults.remove(0))
        }
    }

    async fn schedule_send(
        &self,
        message: BrokerMessage,
        enqueue_at: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        // ---
        self.record("schedule_send");

        {
            let mut faults = self.schedule_faults.lock().unwrap();
            if !faults.is_empty() {
                return Err(faults.remove(0));
            }
        }

        self.messages.lock().unwrap().push(message);
        self.enqueue_times.lock().unwrap().push(enqueue_at);
        Ok(*self.schedule_outcome.lock().unwrap())
    }

    async fn cancel_scheduled_send(
        &self,
        sequence_number: i64,
        _cancel: &CancellationToken,
    ) -> Result<CancelOutcome> {
        // ---
        self.record(format!("cancel_scheduled_send:{sequence_number}"));
        self.cancelled.lock().unwrap().push(sequence_number);

        let gate = self.cancel_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }

        Ok(*self.cancel_outcome.lock().unwrap())
    }
}

/// Observer writing `pre_send`, `post_send` and `send_fault:<label>` to the
/// timeline.
pub struct RecordingObserver {
    // ---
    timeline: Timeline,
    pub faults: Mutex<Vec<String>>,
    pub envelopes: Mutex<Vec<SendEnvelope>>,
    pub fault_envelopes: Mutex<Vec<SendEnvelope>>,
}

impl RecordingObserver {
    pub fn new(timeline: &Timeline) -> Arc<Self> {
        Arc::new(Self {
            timeline: timeline.clone(),
            faults: Mutex::new(Vec::new()),
            envelopes: Mutex::new(Vec::new()),
            fault_envelopes: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, event: impl Into<String>) {
        self.timeline.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl SendObserver for RecordingObserver {
    async fn pre_send(&self, envelope: &SendEnvelope) -> ObserverResult {
        self.record("pre_send");
        self.envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn post_send(&self, _envelope: &SendEnvelope) -> ObserverResult {
        self.record("post_send");
        Ok(())
    }

    async fn send_fault(&self, envelope: &SendEnvelope, error: &SendError) -> ObserverResult {
        self.record(format!("send_fault:{}", error.as_label()));
        self.faults.lock().unwrap().push(error.to_string());
        self.fault_envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// [`SendLog`] keeping the names of the events it received.
#[derive(Clone, Default)]
pub struct RecordingLog {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl SendLog for RecordingLog {
    fn sent(&self, _envelope: &SendEnvelope) {
        self.push("sent");
    }

    fn scheduled(&self, _envelope: &SendEnvelope, _enqueue_at: DateTime<Utc>, sequence_number: i64) {
        self.push(format!("scheduled:{sequence_number}"));
    }

    fn schedule_fallback(&self, _envelope: &SendEnvelope, _enqueue_at: DateTime<Utc>) {
        self.push("schedule_fallback");
    }

    fn cancelled_scheduled(&self, _entity_path: &str, sequence_number: i64) {
        self.push(format!("cancelled_scheduled:{sequence_number}"));
    }

    fn cancel_not_found(&self, _entity_path: &str, sequence_number: i64) {
        self.push(format!("cancel_not_found:{sequence_number}"));
    }

    fn unknown_schedule_token(&self, _entity_path: &str, _token_id: uuid::Uuid) {
        self.push("unknown_schedule_token");
    }

    fn faulted(&self, _envelope: &SendEnvelope, error: &SendError) {
        self.push(format!("faulted:{}", error.as_label()));
    }

    fn observer_faulted(&self, observer: &str, _message: &str) {
        self.push(format!("observer_faulted:{observer}"));
    }

    fn stopping(&self, _entity_path: &str, in_flight: usize) {
        self.push(format!("stopping:{in_flight}"));
    }

    fn stopped(&self, _entity_path: &str) {
        self.push("stopped");
    }

    fn stop_grace_exceeded(&self, _entity_path: &str, _grace: Duration, in_flight: usize) {
        self.push(format!("stop_grace_exceeded:{in_flight}"));
    }
}

/// A transport over a scripted client, with one recording observer
/// connected for the transport's lifetime.
pub struct Harness {
    pub transport: SendTransport,
    pub client: Arc<ScriptedClient>,
    pub source: Arc<SharedContextSource>,
    pub observer: Arc<RecordingObserver>,
    pub log: RecordingLog,
    pub timeline: Timeline,
    _handle: mom_send::ObserverHandle,
}

pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

pub fn harness_with(
    configure: impl FnOnce(SendTransportBuilder) -> SendTransportBuilder,
) -> Harness {
    // ---
    init_logging();

    let timeline: Timeline = Arc::default();
    let client = ScriptedClient::new(&timeline);
    let observer = RecordingObserver::new(&timeline);
    let log = RecordingLog::default();

    let source = Arc::new(SharedContextSource::new(client.clone()));
    let transport = configure(SendTransportBuilder::new(source.clone()).log(log.clone()))
        .build()
        .expect("failed to build transport");

    let handle = transport.connect_send_observer(observer.clone());

    Harness {
        transport,
        client,
        source,
        observer,
        log,
        timeline,
        _handle: handle,
    }
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
