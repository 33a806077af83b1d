use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sigweave_core::{
    ComponentError, Connectable, ConnectContext, Provider, SampleBlock, SampleFormat, TickContext,
};
use tracing::{debug, info, warn};

use crate::error::{ReplayError, Result};
use crate::header::{resolve_paths, ReplayHeader};
use crate::swap_file_order;

fn default_loop() -> bool {
    true
}

/// Where to replay from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    /// Header file, or its data file.
    pub path: PathBuf,
    /// Restart from the first sample at the end of the data.
    #[serde(rename = "loop", default = "default_loop")]
    pub loop_playback: bool,
}

impl ReplayConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loop_playback: default_loop(),
        }
    }
}

struct Playback {
    header: ReplayHeader,
    data: BufReader<File>,
    data_path: PathBuf,
    /// Samples read from the current pass.
    position: u64,
}

/// Provides the samples of a recording as if they came from a live sensor.
///
/// Each step emits the samples covering one tick period. Sample `i` carries
/// the time `from + i / sr`, continuing across loop restarts.
pub struct FileReplayProvider {
    name: String,
    config: ReplayConfig,
    playback: Option<Playback>,
    emitted: u64,
    loops: u64,
}

impl FileReplayProvider {
    pub fn new(name: impl Into<String>, config: ReplayConfig) -> Self {
        Self {
            name: name.into(),
            config,
            playback: None,
            emitted: 0,
            loops: 0,
        }
    }

    /// Samples emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn open(&self) -> Result<Playback> {
        let (header_path, data_path) = resolve_paths(&self.config.path);
        let header = ReplayHeader::read(&header_path)?;
        let file = File::open(&data_path).map_err(ReplayError::io(&data_path))?;
        let actual = file
            .metadata()
            .map_err(ReplayError::io(&data_path))?
            .len();
        let expected = header.data_len();
        if actual < expected {
            return Err(ReplayError::Truncated { expected, actual });
        }
        if actual > expected {
            warn!(
                path = %data_path.display(),
                expected,
                actual,
                "data file is longer than its header announces, extra bytes ignored"
            );
        }
        Ok(Playback {
            header,
            data: BufReader::new(file),
            data_path,
            position: 0,
        })
    }

    fn rewind(playback: &mut Playback) -> Result<()> {
        playback
            .data
            .seek(SeekFrom::Start(0))
            .map_err(ReplayError::io(&playback.data_path))?;
        playback.position = 0;
        Ok(())
    }
}

impl Connectable for FileReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, _ctx: &ConnectContext<'_>) -> std::result::Result<(), ComponentError> {
        let playback = self.open()?;
        if playback.header.total_samples() == 0 {
            return Err(ComponentError::Setup(format!(
                "{} holds no samples",
                self.config.path.display()
            )));
        }
        info!(
            component = %self.name,
            path = %self.config.path.display(),
            sample_rate = playback.header.format.sample_rate,
            dim = playback.header.format.dim,
            samples = playback.header.total_samples(),
            looping = self.config.loop_playback,
            "replay opened"
        );
        self.playback = Some(playback);
        self.emitted = 0;
        self.loops = 0;
        Ok(())
    }

    fn disconnect(&mut self) -> std::result::Result<(), ComponentError> {
        if self.playback.take().is_some() {
            debug!(component = %self.name, emitted = self.emitted, loops = self.loops, "replay closed");
        }
        Ok(())
    }
}

impl Provider for FileReplayProvider {
    fn format(&self) -> Option<SampleFormat> {
        self.playback.as_ref().map(|p| p.header.format)
    }

    fn produce(&mut self, tick: &TickContext) -> std::result::Result<SampleBlock, ComponentError> {
        let Some(playback) = self.playback.as_mut() else {
            return Err(ComponentError::Runtime("replay is not connected".to_string()));
        };
        let format = playback.header.format;
        let total = playback.header.total_samples();
        let wanted = tick.samples_due(&format).saturating_sub(self.emitted).max(1);
        let sample_bytes = format.sample_bytes();

        let mut data = BytesMut::with_capacity(wanted as usize * sample_bytes);
        let mut count = 0u64;
        while count < wanted {
            if playback.position == total {
                if !self.config.loop_playback {
                    break;
                }
                Self::rewind(playback)?;
                self.loops += 1;
                debug!(component = %self.name, loops = self.loops, "replay restarted");
            }
            let take = (wanted - count).min(total - playback.position);
            let start = data.len();
            data.resize(start + take as usize * sample_bytes, 0);
            if let Err(err) = playback.data.read_exact(&mut data[start..]) {
                if err.kind() == ErrorKind::UnexpectedEof {
                    return Err(ComponentError::Runtime(format!(
                        "{} ended early",
                        playback.data_path.display()
                    )));
                }
                return Err(err.into());
            }
            playback.position += take;
            count += take;
        }

        if count == 0 {
            return Err(ComponentError::EndOfStream);
        }
        let time_us = playback.header.start_us() + format.offset_us(self.emitted);
        self.emitted += count;
        let data: Bytes = swap_file_order(data.freeze(), format.bytes_per_value);
        Ok(SampleBlock::new(format, time_us, count as u32, data)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sigweave_core::SampleType;

    use super::*;
    use crate::testutil::write_recording;

    fn tick(index: u64, period_ms: u64) -> TickContext {
        TickContext {
            index,
            time_us: (index * period_ms * 1000) as i64,
            period: Duration::from_millis(period_ms),
        }
    }

    fn connect(provider: &mut FileReplayProvider) {
        let ctx = sigweave_core::PipelineContext::new();
        let ctx = std::sync::Arc::new(ctx);
        provider
            .connect(&ConnectContext {
                pipeline: &ctx,
                inputs: &[],
            })
            .unwrap();
    }

    #[test]
    fn replays_blocks_with_recorded_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let format = SampleFormat::of(100.0, 1, SampleType::Double).unwrap();
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let path = write_recording(dir.path(), "ramp.stream", format, 2.0, &values);

        let mut config = ReplayConfig::new(&path);
        config.loop_playback = false;
        let mut provider = FileReplayProvider::new("replay", config);
        connect(&mut provider);
        assert_eq!(provider.format(), Some(format));

        let first = provider.produce(&tick(0, 40)).unwrap();
        assert_eq!(first.count, 4);
        assert_eq!(first.time_us, 2_000_000);
        assert_eq!(format.decode_values(&first.data).unwrap(), vec![0.0, 1.0, 2.0, 3.0]);

        let second = provider.produce(&tick(1, 40)).unwrap();
        assert_eq!(second.time_us, 2_040_000);

        // the last block is short, then the stream ends
        let third = provider.produce(&tick(2, 40)).unwrap();
        assert_eq!(third.count, 2);
        assert_eq!(format.decode_values(&third.data).unwrap(), vec![8.0, 9.0]);
        assert!(matches!(
            provider.produce(&tick(3, 40)),
            Err(ComponentError::EndOfStream)
        ));
    }

    #[test]
    fn loops_back_to_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let format = SampleFormat::of(10.0, 2, SampleType::Float).unwrap();
        let values = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let path = write_recording(dir.path(), "loop.stream", format, 0.0, &values);

        let mut provider = FileReplayProvider::new("replay", ReplayConfig::new(&path));
        connect(&mut provider);

        let block = provider.produce(&tick(0, 500)).unwrap();
        assert_eq!(block.count, 5);
        assert_eq!(
            format.decode_values(&block.data).unwrap(),
            vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 1.0, -1.0, 2.0, -2.0]
        );
        let next = provider.produce(&tick(1, 500)).unwrap();
        assert_eq!(next.time_us, 500_000);
        assert_eq!(provider.emitted(), 10);
    }

    #[test]
    fn truncated_data_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let format = SampleFormat::of(10.0, 1, SampleType::Int).unwrap();
        let path = write_recording(dir.path(), "short.stream", format, 0.0, &[1.0, 2.0]);
        let mut header = ReplayHeader::read(&path).unwrap();
        header.chunks[0].num = 5;
        header.write(&path).unwrap();

        let mut provider = FileReplayProvider::new("replay", ReplayConfig::new(&path));
        let ctx = std::sync::Arc::new(sigweave_core::PipelineContext::new());
        let err = provider
            .connect(&ConnectContext {
                pipeline: &ctx,
                inputs: &[],
            })
            .unwrap_err();
        assert!(matches!(err, ComponentError::Setup(msg) if msg.contains("announces")));
    }

    #[test]
    fn config_reads_loop_flag() {
        let cfg: ReplayConfig = serde_json::from_str(r#"{"path": "/rec/a.stream"}"#).unwrap();
        assert!(cfg.loop_playback);
        let cfg: ReplayConfig =
            serde_json::from_str(r#"{"path": "/rec/a.stream", "loop": false}"#).unwrap();
        assert!(!cfg.loop_playback);
    }
}
