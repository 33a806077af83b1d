//! Synthetic components for trying pipelines without hardware.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sigweave_core::{
    ComponentError, Connectable, ConnectContext, Consumer, Event, EventPayload, Provider,
    SampleBlock, SampleFormat, SampleType, SampleWindow, TickContext,
};
use tracing::info;

fn default_dim() -> u32 {
    1
}

fn default_frequency() -> f64 {
    1.0
}

fn default_amplitude() -> f64 {
    1.0
}

/// Shape of a synthetic sine signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SineConfig {
    pub sample_rate: f64,
    #[serde(default = "default_dim")]
    pub dim: u32,
    /// Hertz.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

impl SineConfig {
    pub fn format(&self) -> Result<SampleFormat, ComponentError> {
        Ok(SampleFormat::of(self.sample_rate, self.dim, SampleType::Float)?)
    }
}

/// Provides a float sine wave, one channel per dimension, each a quarter
/// period behind the previous one.
pub struct SineProvider {
    name: String,
    config: SineConfig,
    format: Option<SampleFormat>,
    sample: u64,
}

impl SineProvider {
    pub fn new(name: impl Into<String>, config: SineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            format: None,
            sample: 0,
        }
    }

    fn value(&self, sample: u64, channel: u32) -> f64 {
        let t = sample as f64 / self.config.sample_rate;
        let phase = f64::from(channel) * TAU / 4.0;
        self.config.amplitude * (TAU * self.config.frequency * t - phase).sin()
    }
}

impl Connectable for SineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, _ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        if !self.config.frequency.is_finite() || self.config.frequency < 0.0 {
            return Err(ComponentError::Setup(format!(
                "frequency must be non-negative, got {}",
                self.config.frequency
            )));
        }
        self.format = Some(self.config.format()?);
        self.sample = 0;
        Ok(())
    }
}

impl Provider for SineProvider {
    fn format(&self) -> Option<SampleFormat> {
        self.format
    }

    fn produce(&mut self, tick: &TickContext) -> Result<SampleBlock, ComponentError> {
        let Some(format) = self.format else {
            return Err(ComponentError::Runtime("sine provider is not connected".to_string()));
        };
        let count = tick.samples_due(&format).saturating_sub(self.sample).max(1);
        let mut values = Vec::with_capacity((count * u64::from(format.dim)) as usize);
        for sample in self.sample..self.sample + count {
            for channel in 0..format.dim {
                values.push(self.value(sample, channel));
            }
        }
        self.sample += count;
        Ok(SampleBlock::from_values(format, tick.time_us, &values)?)
    }
}

/// Emits the per-dimension mean of each window as a `Floats` event.
///
/// With several inputs the means are concatenated in input order. The event
/// spans the first input's window.
pub struct MeanEventSender {
    name: String,
}

impl MeanEventSender {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Connectable for MeanEventSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        if ctx.inputs.is_empty() {
            return Err(ComponentError::Setup(
                "mean event sender needs at least one input".to_string(),
            ));
        }
        Ok(())
    }
}

impl Consumer for MeanEventSender {
    fn consume(
        &mut self,
        windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError> {
        let Some(first) = windows.first() else {
            return Ok(None);
        };
        let mut means = Vec::new();
        for window in windows {
            means.extend(window.mean()?.into_iter().map(|m| m as f32));
        }
        let duration_us = first.format.offset_us(first.count as u64);
        Ok(Some(Event::new(
            self.name.clone(),
            first.time_us,
            duration_us,
            EventPayload::Floats(means),
        )))
    }
}

/// Logs every event it listens to.
pub struct EventLogger {
    name: String,
    received: Arc<AtomicU64>,
}

impl EventLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of events received, readable while the pipeline runs.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.received)
    }
}

impl Connectable for EventLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, _ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        Ok(())
    }
}

impl Consumer for EventLogger {
    fn listen(&mut self, event: &Event) -> Result<(), ComponentError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        let payload = match &event.payload {
            EventPayload::Empty => String::new(),
            EventPayload::Floats(values) => format!("{values:?}"),
            EventPayload::Text(text) => text.clone(),
            EventPayload::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        };
        info!(
            component = %self.name,
            sender = %event.sender,
            time_us = event.time_us,
            duration_us = event.duration_us,
            payload = %payload,
            "event"
        );
        Ok(())
    }

    fn consume(
        &mut self,
        _windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sigweave_core::PipelineContext;

    use super::*;

    fn connect_ctx(ctx: &Arc<PipelineContext>, inputs: &[SampleFormat]) -> bool {
        let mut sender = MeanEventSender::new("mean");
        sender
            .connect(&ConnectContext {
                pipeline: ctx,
                inputs,
            })
            .is_ok()
    }

    #[test]
    fn sine_blocks_cover_one_period() {
        let ctx = Arc::new(PipelineContext::new());
        let mut sine = SineProvider::new(
            "sine",
            SineConfig {
                sample_rate: 40.0,
                dim: 2,
                frequency: 1.0,
                amplitude: 2.0,
            },
        );
        sine.connect(&ConnectContext {
            pipeline: &ctx,
            inputs: &[],
        })
        .unwrap();
        let block = sine
            .produce(&TickContext {
                index: 0,
                time_us: 0,
                period: Duration::from_millis(250),
            })
            .unwrap();
        assert_eq!(block.count, 10);
        let values = block.format.decode_values(&block.data).unwrap();
        // first channel starts at zero, second a quarter period behind
        assert!(values[0].abs() < 1e-6);
        assert!((values[1] + 2.0).abs() < 1e-6);
        // sample 10 of a 1 Hz wave at 40 Hz is the positive peak
        let next = sine
            .produce(&TickContext {
                index: 1,
                time_us: 250_000,
                period: Duration::from_millis(250),
            })
            .unwrap();
        let values = next.format.decode_values(&next.data).unwrap();
        assert!((values[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn mean_event_sender_concatenates_means() {
        let format = SampleFormat::of(10.0, 2, SampleType::Float).unwrap();
        let window = |values: &[f64]| SampleWindow {
            format,
            time_us: 100_000,
            count: values.len() / 2,
            overlap: 0,
            data: format.encode_values(values).unwrap(),
        };
        let mut sender = MeanEventSender::new("mean");
        let event = sender
            .consume(
                &[window(&[1.0, 10.0, 3.0, 20.0]), window(&[0.0, 0.0, 2.0, 2.0])],
                &TickContext {
                    index: 0,
                    time_us: 0,
                    period: Duration::from_millis(200),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(event.sender, "mean");
        assert_eq!(event.time_us, 100_000);
        assert_eq!(event.duration_us, 200_000);
        assert_eq!(event.payload, EventPayload::Floats(vec![2.0, 15.0, 1.0, 1.0]));
    }

    #[test]
    fn mean_event_sender_requires_inputs() {
        let ctx = Arc::new(PipelineContext::new());
        assert!(!connect_ctx(&ctx, &[]));
        let format = SampleFormat::of(10.0, 1, SampleType::Float).unwrap();
        assert!(connect_ctx(&ctx, &[format]));
    }

    #[test]
    fn event_logger_counts_events() {
        let mut logger = EventLogger::new("log");
        let counter = logger.counter();
        logger
            .listen(&Event::new("x", 0, 0, EventPayload::Text("hi".to_string())))
            .unwrap();
        logger
            .listen(&Event::new("x", 1, 0, EventPayload::Empty))
            .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
