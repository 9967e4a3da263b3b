use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;

use crate::{
    aggregate::Projection,
    errors::{StartupError, TransportError},
    sink::{RenderError, RenderSink},
    source::{Delivery, MessageSource, SourceEvent, TopicConnector},
    store::SongStore,
};

/// A private in-memory database. A single connection keeps every query on the
/// same database for the life of the store.
pub async fn memory_store() -> SongStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");
    SongStore::new(pool)
}

#[derive(Clone, Debug)]
pub enum ScriptStep {
    Payload(Vec<u8>),
    NoPayload,
    TransportFailure(String),
}

impl ScriptStep {
    pub fn json(value: serde_json::Value) -> Self {
        ScriptStep::Payload(value.to_string().into_bytes())
    }
}

/// What a scripted source does once its steps run out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterScript {
    EndOfStream,
    /// Wait forever, like a live topic nobody is producing to
    Block,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupOutcome {
    Ready,
    BrokerUnreachable,
    TopicMissing,
    ConsumerCreationFails,
    /// Verification never answers, like a metadata fetch against a silent broker
    VerifyHangs,
}

/// Stands in for a broker: replays a fixed list of steps and records which
/// offsets the consumer completed.
pub struct ScriptedConnector {
    startup: StartupOutcome,
    steps: Mutex<Option<Vec<ScriptStep>>>,
    after: AfterScript,
    completed: Arc<Mutex<Vec<i64>>>,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<ScriptStep>, after: AfterScript) -> Self {
        Self {
            startup: StartupOutcome::Ready,
            steps: Mutex::new(Some(steps)),
            after,
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(startup: StartupOutcome) -> Self {
        Self {
            startup,
            ..Self::new(Vec::new(), AfterScript::EndOfStream)
        }
    }

    pub fn completed_offsets(&self) -> Vec<i64> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopicConnector for ScriptedConnector {
    async fn verify(&self) -> Result<(), StartupError> {
        match self.startup {
            StartupOutcome::BrokerUnreachable => Err(StartupError::BrokerUnreachable(
                "scripted broker is down".to_string(),
            )),
            StartupOutcome::TopicMissing => {
                Err(StartupError::TopicMissing("song_attributes".to_string()))
            }
            StartupOutcome::VerifyHangs => std::future::pending().await,
            StartupOutcome::Ready | StartupOutcome::ConsumerCreationFails => Ok(()),
        }
    }

    async fn subscribe(&self) -> Result<Box<dyn MessageSource>, StartupError> {
        if self.startup == StartupOutcome::ConsumerCreationFails {
            return Err(StartupError::ConsumerCreation(
                "scripted consumer refused".to_string(),
            ));
        }

        let steps = self
            .steps
            .lock()
            .unwrap()
            .take()
            .expect("scripted connector subscribed twice");

        Ok(Box::new(ScriptedSource {
            steps: steps.into(),
            after: self.after,
            next_offset: 0,
            completed: self.completed.clone(),
        }))
    }
}

pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    after: AfterScript,
    next_offset: i64,
    completed: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn next(&mut self) -> Result<SourceEvent, TransportError> {
        let Some(step) = self.steps.pop_front() else {
            return match self.after {
                AfterScript::EndOfStream => Ok(SourceEvent::EndOfStream),
                AfterScript::Block => std::future::pending().await,
            };
        };

        let payload = match step {
            ScriptStep::Payload(bytes) => Some(bytes),
            ScriptStep::NoPayload => None,
            ScriptStep::TransportFailure(reason) => return Err(TransportError::Closed(reason)),
        };

        let offset = self.next_offset;
        self.next_offset += 1;
        Ok(SourceEvent::Message(Delivery {
            payload,
            partition: 0,
            offset,
        }))
    }

    async fn complete(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.completed.lock().unwrap().push(delivery.offset);
        Ok(())
    }
}

/// Keeps every batch of projections it is handed.
#[derive(Clone, Default)]
pub struct RecordingSink {
    renders: Arc<Mutex<Vec<Vec<Projection>>>>,
}

impl RecordingSink {
    pub fn renders(&self) -> Vec<Vec<Projection>> {
        self.renders.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderSink for RecordingSink {
    async fn render(&self, projections: &[Projection]) -> Result<(), RenderError> {
        self.renders.lock().unwrap().push(projections.to_vec());
        Ok(())
    }
}
