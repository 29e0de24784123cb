//! Heartbeat actor answering presence probes.
//!
//! Runs beside the job consumer on the same broker connection but shares no
//! job state with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde::Serialize;

use crate::broker::Publisher;
use crate::messages::HeartbeatMessage;

/// Host identity reported in every presence answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub name: String,
    pub kind: String,
}

/// Body published on the pong queue.
#[derive(Debug, Clone, Serialize)]
pub struct Presence<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub timestamp: DateTime<Utc>,
}

pub struct HeartbeatArgs {
    pub publisher: Arc<dyn Publisher>,
    pub pong_queue: String,
    pub identity: HostIdentity,
}

pub struct HeartbeatState {
    publisher: Arc<dyn Publisher>,
    pong_queue: String,
    identity: HostIdentity,
    answered: u64,
}

impl HeartbeatState {
    async fn answer(&mut self) -> Result<(), ActorProcessingErr> {
        let presence = Presence {
            name: &self.identity.name,
            kind: &self.identity.kind,
            timestamp: Utc::now(),
        };
        let body = serde_json::to_vec(&presence)?;
        self.publisher.publish(&self.pong_queue, &body).await?;
        self.answered += 1;
        Ok(())
    }
}

pub struct HeartbeatActor;

impl Actor for HeartbeatActor {
    type Msg = HeartbeatMessage;
    type State = HeartbeatState;
    type Arguments = HeartbeatArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        args.publisher.declare_durable(&args.pong_queue).await?;
        tracing::info!(
            queue = %args.pong_queue,
            host = %args.identity.name,
            "heartbeat responder started"
        );

        Ok(HeartbeatState {
            publisher: args.publisher,
            pong_queue: args.pong_queue,
            identity: args.identity,
            answered: 0,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HeartbeatMessage::Probe => {
                // A lost answer is not fatal; the next probe retries.
                if let Err(e) = state.answer().await {
                    tracing::warn!(queue = %state.pong_queue, error = %e, "failed to answer probe");
                }
            }

            HeartbeatMessage::Answered { reply } => {
                let _ = reply.send(state.answered);
            }
        }

        Ok(())
    }
}

/// Spawn the heartbeat actor.
pub async fn start_heartbeat(
    args: HeartbeatArgs,
) -> Result<(ActorRef<HeartbeatMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(Some("heartbeat".to_string()), HeartbeatActor, args).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::sync::Mutex;
    use std::time::Duration;

    use crate::broker::BrokerFuture;

    use super::*;

    #[derive(Default)]
    struct Sink {
        declared: Mutex<Vec<String>>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publisher for Sink {
        fn declare_durable<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
            Box::pin(async move {
                self.declared.lock().unwrap().push(queue.to_string());
                Ok(())
            })
        }

        fn publish<'a>(&'a self, queue: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()> {
            Box::pin(async move {
                self.published
                    .lock()
                    .unwrap()
                    .push((queue.to_string(), payload.to_vec()));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn answers_each_probe_with_identity() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(Sink::default());
        let (actor, handle) = Actor::spawn(
            None,
            HeartbeatActor,
            HeartbeatArgs {
                publisher: sink.clone(),
                pong_queue: "pong".to_string(),
                identity: HostIdentity {
                    name: "box-1".to_string(),
                    kind: "worker".to_string(),
                },
            },
        )
        .await?;

        actor.send_message(HeartbeatMessage::Probe)?;
        actor.send_message(HeartbeatMessage::Probe)?;
        let answered = ractor::rpc::call(
            &actor,
            |reply| HeartbeatMessage::Answered { reply },
            Some(Duration::from_secs(5)),
        )
        .await?;
        assert!(matches!(answered, ractor::rpc::CallResult::Success(2)));

        assert_eq!(sink.declared.lock().unwrap().as_slice(), ["pong".to_string()]);
        let published = sink.published.lock().unwrap().clone();
        assert_eq!(published.len(), 2);
        let body: serde_json::Value = serde_json::from_slice(&published[0].1)?;
        assert_eq!(published[0].0, "pong");
        assert_eq!(body["name"], "box-1");
        assert_eq!(body["type"], "worker");
        assert!(body["timestamp"].is_string());

        actor.stop(None);
        handle.await?;
        Ok(())
    }
}
