//! Test doubles shared by the pipeline tests.

#![allow(dead_code, clippy::disallowed_methods)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storage::{ObjectBackend, StorageError, StorageFuture, SyncOptions, SyncReport};
use worker::{Acknowledger, BrokerError, BrokerFuture, Delivery, Publisher};

/// One broker interaction, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Declare(String),
    Publish(String, Vec<u8>),
    Ack(usize),
}

/// Records every declare, publish and ack. Publishing to a queue listed in
/// `failing_queues` fails.
#[derive(Default)]
pub struct RecordingBroker {
    calls: Mutex<Vec<BrokerCall>>,
    failing_queues: Vec<String>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(queues: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing_queues: queues.iter().map(|q| q.to_string()).collect(),
        })
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Publish(queue, payload) => Some((queue, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Ack(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    /// Wrap `payload` as a delivery whose ack is recorded under `tag`.
    pub fn delivery(self: &Arc<Self>, tag: usize, payload: impl Into<Vec<u8>>) -> Delivery {
        Delivery::new(
            payload.into(),
            RecordingAck {
                broker: Arc::clone(self),
                tag,
                on_ack: None,
            },
        )
    }

    /// Like [`RecordingBroker::delivery`], but also runs `on_ack` when acked.
    pub fn delivery_with_hook(
        self: &Arc<Self>,
        tag: usize,
        payload: impl Into<Vec<u8>>,
        on_ack: impl Fn() + Send + Sync + 'static,
    ) -> Delivery {
        Delivery::new(
            payload.into(),
            RecordingAck {
                broker: Arc::clone(self),
                tag,
                on_ack: Some(Box::new(on_ack)),
            },
        )
    }

    fn record(&self, call: BrokerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Publisher for RecordingBroker {
    fn declare_durable<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.record(BrokerCall::Declare(queue.to_string()));
            Ok(())
        })
    }

    fn publish<'a>(&'a self, queue: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            if self.failing_queues.iter().any(|q| q == queue) {
                return Err(BrokerError::Publish {
                    queue: queue.to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.record(BrokerCall::Publish(queue.to_string(), payload.to_vec()));
            Ok(())
        })
    }
}

pub struct RecordingAck {
    broker: Arc<RecordingBroker>,
    tag: usize,
    on_ack: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Acknowledger for RecordingAck {
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()> {
        Box::pin(async move {
            if let Some(hook) = &self.on_ack {
                hook();
            }
            self.broker.record(BrokerCall::Ack(self.tag));
            Ok(())
        })
    }
}

/// Object backend whose behaviour is scripted per test.
///
/// - `fail_first` calls to any method fail with a backend error
/// - `fail_always` makes every call fail
/// - `delay` is awaited inside every call
/// - `partial_write` makes `sync_down` create a file under the local
///   directory before failing, leaving a partial destination behind
#[derive(Default)]
pub struct ScriptedBackend {
    pub calls: AtomicUsize,
    pub fail_first: usize,
    pub fail_always: bool,
    pub delay: Option<Duration>,
    pub partial_write: bool,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first: n,
            ..Default::default()
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            fail_always: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn step(&self) -> Result<(), StorageError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_always || n <= self.fail_first {
            return Err(StorageError::InvalidConfig(format!("scripted failure {n}")));
        }
        Ok(())
    }
}

impl ObjectBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn put<'a>(
        &'a self,
        _bucket: &'a str,
        _region: &'a str,
        _local_path: &'a Path,
        _remote_path: &'a str,
        _headers: &'a BTreeMap<String, String>,
    ) -> StorageFuture<'a, ()> {
        Box::pin(self.step())
    }

    fn get<'a>(
        &'a self,
        _bucket: &'a str,
        _region: &'a str,
        _remote_path: &'a str,
        _local_path: &'a Path,
    ) -> StorageFuture<'a, ()> {
        Box::pin(self.step())
    }

    fn delete<'a>(
        &'a self,
        _bucket: &'a str,
        _region: &'a str,
        _remote_path: &'a str,
    ) -> StorageFuture<'a, ()> {
        Box::pin(self.step())
    }

    fn sync_up<'a>(
        &'a self,
        _bucket: &'a str,
        _region: &'a str,
        _local_dir: &'a Path,
        _remote_dir: &'a str,
        _options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport> {
        Box::pin(async move {
            self.step().await?;
            Ok(SyncReport::default())
        })
    }

    fn sync_down<'a>(
        &'a self,
        _bucket: &'a str,
        _region: &'a str,
        _remote_dir: &'a str,
        local_dir: &'a Path,
        _options: &'a SyncOptions,
    ) -> StorageFuture<'a, SyncReport> {
        Box::pin(async move {
            if self.partial_write {
                tokio::fs::create_dir_all(local_dir).await?;
                tokio::fs::write(local_dir.join("partial.bin"), b"half").await?;
            }
            self.step().await?;
            Ok(SyncReport::default())
        })
    }
}

/// JSON body of a job message.
pub fn job_message(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}
