use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sigweave_core::{
    ComponentError, Connectable, ConnectContext, Consumer, Event, SampleFormat, SampleWindow,
    TickContext,
};
use tracing::{debug, info};

use crate::error::{ReplayError, Result};
use crate::header::{resolve_paths, ReplayHeader};
use crate::swap_file_order;

/// Where to record to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderConfig {
    /// Header file; the data file is written next to it.
    pub path: PathBuf,
}

struct Recording {
    format: SampleFormat,
    header_path: PathBuf,
    data: BufWriter<File>,
    first_us: Option<i64>,
    samples: u64,
}

impl Recording {
    fn header(&self) -> ReplayHeader {
        let from = self.first_us.unwrap_or(0) as f64 / 1_000_000.0;
        ReplayHeader::single(self.format, from, self.samples)
    }

    fn finish(&mut self) -> Result<()> {
        self.data
            .flush()
            .map_err(ReplayError::io(&self.header_path))?;
        self.header().write(&self.header_path)
    }
}

/// Writes the windows of exactly one input to a header and data file pair
/// that [`FileReplayProvider`](crate::FileReplayProvider) can play back.
pub struct FileRecorder {
    name: String,
    config: RecorderConfig,
    recording: Option<Recording>,
}

impl FileRecorder {
    pub fn new(name: impl Into<String>, config: RecorderConfig) -> Self {
        Self {
            name: name.into(),
            config,
            recording: None,
        }
    }

    fn open(&self, format: SampleFormat) -> Result<Recording> {
        let (header_path, data_path) = resolve_paths(&self.config.path);
        let file = File::create(&data_path).map_err(ReplayError::io(&data_path))?;
        let recording = Recording {
            format,
            header_path,
            data: BufWriter::new(file),
            first_us: None,
            samples: 0,
        };
        // an empty but valid header until the recording is finished
        recording.header().write(&recording.header_path)?;
        Ok(recording)
    }
}

impl Connectable for FileRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, ctx: &ConnectContext<'_>) -> std::result::Result<(), ComponentError> {
        let [format] = ctx.inputs else {
            return Err(ComponentError::Setup(format!(
                "recorder needs exactly one input, got {}",
                ctx.inputs.len()
            )));
        };
        let recording = self.open(*format)?;
        info!(
            component = %self.name,
            path = %recording.header_path.display(),
            "recording started"
        );
        self.recording = Some(recording);
        Ok(())
    }

    fn disconnect(&mut self) -> std::result::Result<(), ComponentError> {
        let Some(mut recording) = self.recording.take() else {
            return Ok(());
        };
        recording.finish()?;
        info!(
            component = %self.name,
            path = %recording.header_path.display(),
            samples = recording.samples,
            "recording finished"
        );
        Ok(())
    }
}

impl Consumer for FileRecorder {
    fn consume(
        &mut self,
        windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> std::result::Result<Option<Event>, ComponentError> {
        let Some(recording) = self.recording.as_mut() else {
            return Err(ComponentError::Runtime("recorder is not connected".to_string()));
        };
        let Some(window) = windows.first().map(SampleWindow::fresh) else {
            return Ok(None);
        };
        if window.count == 0 {
            return Ok(None);
        }
        let bytes = swap_file_order(window.data.clone(), recording.format.bytes_per_value);
        recording.data.write_all(&bytes)?;
        recording.first_us.get_or_insert(window.time_us);
        recording.samples += window.count as u64;
        debug!(component = %self.name, samples = recording.samples, "window recorded");
        Ok(None)
    }
}
