//! `storage-worker`: consumes storage jobs from RabbitMQ and runs them
//! against S3, OSS or the local disk.

use std::sync::Arc;

use futures_util::StreamExt;
use job_core::JobEvent;
use storage::{ObjectStoreBackend, ObjectStoreConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, fmt};
use worker::{
    ActorRef, CallbackPublisher, HeartbeatArgs, HeartbeatMessage, JobConsumer, Router,
    start_heartbeat,
};

use crate::amqp::AmqpBroker;
use crate::config::{LogConfig, LogFormat, WorkerConfig};

mod amqp;
mod config;

/// Job events buffered for the event log before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LogConfig::from_env());

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        queue = %config.rabbit.queue,
        concurrency = config.concurrency,
        host = %config.host.name,
        "starting storage worker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let s3 = Arc::new(ObjectStoreBackend::new(ObjectStoreConfig::s3_from_env()?));
    let oss = Arc::new(ObjectStoreBackend::new(ObjectStoreConfig::oss_from_env()?));
    let router = Router::new(s3, oss).with_timeout(config.backend_timeout);

    let broker = Arc::new(AmqpBroker::connect(&config.rabbit).await?);

    let heartbeat = match config.rabbit.heartbeat_queues() {
        Some((ping, pong)) => Some(spawn_heartbeat(&broker, &config, ping, pong).await?),
        None => {
            tracing::info!("RABBIT_PING/RABBIT_PONG not set, heartbeat disabled");
            None
        }
    };

    let deliveries = broker
        .consume(&config.rabbit.queue, config.concurrency)
        .await?;
    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    tokio::spawn(log_events(event_rx));
    let consumer = JobConsumer::new(
        router,
        CallbackPublisher::new(broker.clone()),
        config.concurrency,
    )
    .with_event_tx(event_tx);

    let result = tokio::select! {
        result = consumer.run(deliveries) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            Ok(())
        }
    };

    if let Some((actor, handle)) = heartbeat {
        actor.stop(None);
        let _ = handle.await;
    }

    result?;
    tracing::info!("storage worker stopped");
    Ok(())
}

/// Start the heartbeat actor and forward every probe from `ping` to it.
async fn spawn_heartbeat(
    broker: &Arc<AmqpBroker>,
    config: &WorkerConfig,
    ping: &str,
    pong: &str,
) -> Result<(ActorRef<HeartbeatMessage>, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>>
{
    let (actor, handle) = start_heartbeat(HeartbeatArgs {
        publisher: broker.clone(),
        pong_queue: pong.to_string(),
        identity: config.host.clone(),
    })
    .await?;

    let mut probes = broker.probes(ping).await?;
    let forward = actor.clone();
    tokio::spawn(async move {
        while let Some(probe) = probes.next().await {
            if let Err(e) = probe {
                tracing::warn!(error = %e, "heartbeat probe stream failed");
                break;
            }
            if forward.send_message(HeartbeatMessage::Probe).is_err() {
                break;
            }
        }
    });

    tracing::info!(ping, pong, "heartbeat enabled");
    Ok((actor, handle))
}

/// Record the job lifecycle at debug level, one line per event.
async fn log_events(mut rx: broadcast::Receiver<JobEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(
                target: "storage_worker::events",
                delivery = %event.delivery(),
                "{}",
                event.description()
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "job event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
