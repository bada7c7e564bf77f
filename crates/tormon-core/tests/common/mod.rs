//! Shared test infrastructure for tormon-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::{FakeControl, RecordingSink};
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tormon_core::auth::AuthGate;
use tormon_core::control::{ControlClient, ControlFuture, Credential};
use tormon_core::error::{ControlError, SinkError};
use tormon_core::event::MeasurementEvent;
use tormon_core::router::QueryRouter;
use tormon_core::sink::{MetricsSink, SinkFuture};

/// In-memory control port with scripted GETINFO replies.
#[derive(Default)]
pub struct FakeControl {
    replies: Mutex<HashMap<String, String>>,
    reject_auth: AtomicBool,
    auth_calls: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl FakeControl {
    pub fn with_replies(pairs: &[(&str, &str)]) -> Arc<Self> {
        let fake = Self::default();
        for (key, value) in pairs {
            fake.set_reply(key, value);
        }
        Arc::new(fake)
    }

    pub fn set_reply(&self, key: &str, value: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl ControlClient for FakeControl {
    fn authenticate<'a>(&'a self, _credential: &'a Credential) -> ControlFuture<'a, ()> {
        Box::pin(async move {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_auth.load(Ordering::SeqCst) {
                Err(ControlError::AuthenticationFailed(
                    "Authentication failed: Password did not match HashedControlPassword value"
                        .into(),
                ))
            } else {
                Ok(())
            }
        })
    }

    fn get_info<'a>(&'a self, key: &'a str) -> ControlFuture<'a, String> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(key.to_string());
            self.replies
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| ControlError::Rejected {
                    code: 552,
                    message: format!("Unrecognized key \"{key}\""),
                })
        })
    }
}

/// Sink that records every write; can be switched to fail.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MeasurementEvent>>,
    fail_writes: AtomicBool,
    write_attempts: AtomicU32,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<MeasurementEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, measurement: &str) -> Vec<MeasurementEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.measurement == measurement)
            .collect()
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

impl MetricsSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn ping(&self) -> SinkFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn create_database<'a>(&'a self, _database: &'a str) -> SinkFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn write<'a>(&'a self, event: &'a MeasurementEvent, _database: &'a str) -> SinkFuture<'a> {
        Box::pin(async move {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SinkError::Rejected {
                    status: 503,
                    body: "influxdb unavailable".into(),
                });
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// Router over `control` with the standard authentication policy.
pub fn router_for(control: &Arc<FakeControl>) -> QueryRouter {
    let client: Arc<dyn ControlClient> = control.clone();
    QueryRouter::new(AuthGate::new(client.clone(), Credential::None), client)
}
