//! Pipelines described in JSON.
//!
//! ```json
//! {
//!   "pipeline": { "buffer_seconds": 2.0 },
//!   "providers": [
//!     { "name": "sine", "period_seconds": 0.1,
//!       "source": { "kind": "sine", "sample_rate": 50.0, "dim": 3 } }
//!   ],
//!   "consumers": [
//!     { "name": "mean", "inputs": ["sine"], "frame_seconds": 0.5,
//!       "sink": { "kind": "mean_event_sender" } },
//!     { "name": "log", "listen": ["mean"], "sink": { "kind": "event_logger" } }
//!   ]
//! }
//! ```
//!
//! Consumers name their inputs by provider name and the channels they listen
//! to by the name of the consumer producing them. A producing consumer gets
//! its event channel as soon as anything listens to it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sigweave_core::{
    ChannelId, Consumer, ConsumerConfig, ConsumerId, Pipeline, PipelineConfig, PipelineError,
    Provider, ProviderConfig, StreamId,
};

use crate::demo::{EventLogger, MeanEventSender, SineConfig, SineProvider};

/// Errors turning a description into a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline description: {0}")]
    Json(#[from] serde_json::Error),

    /// Two components share a name.
    #[error("duplicate component name '{0}'")]
    DuplicateName(String),

    #[error("consumer '{consumer}' reads unknown provider '{input}'")]
    UnknownInput { consumer: String, input: String },

    #[error("consumer '{consumer}' listens to unknown consumer '{producer}'")]
    UnknownProducer { consumer: String, producer: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn default_period() -> f64 {
    ProviderConfig::default().period_seconds
}

fn default_frame() -> f64 {
    ConsumerConfig::default().frame_seconds
}

/// Where a provider's samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSource {
    Sine(SineConfig),
    #[cfg(feature = "replay")]
    Replay(sigweave_replay::ReplayConfig),
    #[cfg(feature = "link")]
    StreamReader { link: sigweave_link::ConnectionConfig },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default = "default_period")]
    pub period_seconds: f64,
    pub source: ProviderSource,
}

/// What a consumer does with its windows and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsumerSink {
    MeanEventSender,
    EventLogger,
    #[cfg(feature = "replay")]
    Recorder(sigweave_replay::RecorderConfig),
    #[cfg(feature = "link")]
    StreamWriter { link: sigweave_link::ConnectionConfig },
    #[cfg(feature = "link")]
    EventWriter { link: sigweave_link::ConnectionConfig },
    #[cfg(feature = "link")]
    EventReader { link: sigweave_link::ConnectionConfig },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerEntry {
    pub name: String,
    /// Provider names, one window each per step.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Names of consumers whose events this one receives.
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default = "default_frame")]
    pub frame_seconds: f64,
    #[serde(default)]
    pub delta_seconds: f64,
    pub sink: ConsumerSink,
}

/// A whole pipeline: engine settings plus components in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDescription {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
}

impl PipelineDescription {
    pub fn from_json(raw: &str) -> Result<Self, AssemblyError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, AssemblyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AssemblyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Register every component; the returned pipeline is ready to start.
    pub fn build(&self) -> Result<Pipeline, AssemblyError> {
        let mut pipeline = Pipeline::new(self.pipeline.clone())?;
        let mut names: HashSet<&str> = HashSet::new();
        let mut streams: HashMap<&str, StreamId> = HashMap::new();
        let mut consumers: HashMap<&str, ConsumerId> = HashMap::new();

        for entry in &self.providers {
            if !names.insert(&entry.name) {
                return Err(AssemblyError::DuplicateName(entry.name.clone()));
            }
            let config = ProviderConfig {
                period_seconds: entry.period_seconds,
            };
            let id = pipeline.add_provider(provider_for(entry), config)?;
            streams.insert(&entry.name, id);
        }

        for entry in &self.consumers {
            if !names.insert(&entry.name) {
                return Err(AssemblyError::DuplicateName(entry.name.clone()));
            }
            let inputs = entry
                .inputs
                .iter()
                .map(|input| {
                    streams
                        .get(input.as_str())
                        .copied()
                        .ok_or_else(|| AssemblyError::UnknownInput {
                            consumer: entry.name.clone(),
                            input: input.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let config = ConsumerConfig {
                frame_seconds: entry.frame_seconds,
                delta_seconds: entry.delta_seconds,
            };
            let id = pipeline.add_consumer(consumer_for(entry), &inputs, config)?;
            consumers.insert(&entry.name, id);
        }

        let mut channels: HashMap<&str, ChannelId> = HashMap::new();
        for entry in &self.consumers {
            for producer in &entry.listen {
                let Some(&source) = consumers.get(producer.as_str()) else {
                    return Err(AssemblyError::UnknownProducer {
                        consumer: entry.name.clone(),
                        producer: producer.clone(),
                    });
                };
                let channel = match channels.get(producer.as_str()) {
                    Some(&channel) => channel,
                    None => {
                        let channel = pipeline.register_event_channel(source)?;
                        channels.insert(producer.as_str(), channel);
                        channel
                    }
                };
                pipeline.listen(consumers[entry.name.as_str()], channel)?;
            }
        }

        tracing::debug!(
            providers = self.providers.len(),
            consumers = self.consumers.len(),
            channels = channels.len(),
            "pipeline assembled"
        );
        Ok(pipeline)
    }
}

fn provider_for(entry: &ProviderEntry) -> Box<dyn Provider> {
    let name = entry.name.clone();
    match &entry.source {
        ProviderSource::Sine(config) => Box::new(SineProvider::new(name, config.clone())),
        #[cfg(feature = "replay")]
        ProviderSource::Replay(config) => Box::new(sigweave_replay::FileReplayProvider::new(
            name,
            config.clone(),
        )),
        #[cfg(feature = "link")]
        ProviderSource::StreamReader { link } => {
            Box::new(sigweave_link::StreamReader::new(name, link.clone()))
        }
    }
}

fn consumer_for(entry: &ConsumerEntry) -> Box<dyn Consumer> {
    let name = entry.name.clone();
    match &entry.sink {
        ConsumerSink::MeanEventSender => Box::new(MeanEventSender::new(name)),
        ConsumerSink::EventLogger => Box::new(EventLogger::new(name)),
        #[cfg(feature = "replay")]
        ConsumerSink::Recorder(config) => {
            Box::new(sigweave_replay::FileRecorder::new(name, config.clone()))
        }
        #[cfg(feature = "link")]
        ConsumerSink::StreamWriter { link } => {
            Box::new(sigweave_link::StreamWriter::new(name, link.clone()))
        }
        #[cfg(feature = "link")]
        ConsumerSink::EventWriter { link } => {
            Box::new(sigweave_link::EventWriter::new(name, link.clone()))
        }
        #[cfg(feature = "link")]
        ConsumerSink::EventReader { link } => {
            Box::new(sigweave_link::EventReader::new(name, link.clone()))
        }
    }
}
