use std::sync::Arc;

use async_trait::async_trait;
use narwhal::{
    EventEmitter, EventType, Execution, ExecutionCounter, ExecutionEvent, RunParams,
    TimeoutHandler, UsageReporter,
};
use parking_lot::Mutex;

/// Emitter that keeps every event it receives.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    pub fn assert_event_count_eq(&self, expected: usize) {
        let actual = self.events.lock().len();
        assert_eq!(actual, expected, "Expected {expected} events, got {actual}");
    }
}

impl EventEmitter for RecordingEmitter {
    fn notify(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Clone, Debug)]
pub struct CountRecord {
    pub execution_id: String,
    pub status: String,
    pub dashboard_uri: String,
}

#[derive(Clone, Default)]
pub struct RecordingCounter {
    records: Arc<Mutex<Vec<CountRecord>>>,
}

impl RecordingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CountRecord> {
        self.records.lock().clone()
    }
}

impl ExecutionCounter for RecordingCounter {
    fn inc_execute_test(&self, execution: &Execution, dashboard_uri: &str) {
        self.records.lock().push(CountRecord {
            execution_id: execution.id.clone(),
            status: execution.status().to_string(),
            dashboard_uri: dashboard_uri.to_string(),
        });
    }
}

#[derive(Clone, Default)]
pub struct RecordingUsageReporter {
    sent: Arc<Mutex<Vec<(String, RunParams)>>>,
}

impl RecordingUsageReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, RunParams)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl UsageReporter for RecordingUsageReporter {
    async fn send_run_event(&self, name: &str, params: RunParams) -> anyhow::Result<()> {
        self.sent.lock().push((name.to_string(), params));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingTimeoutHandler {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingTimeoutHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TimeoutHandler for RecordingTimeoutHandler {
    async fn on_timeout(&self, job_name: &str) {
        self.calls.lock().push(job_name.to_string());
    }
}
