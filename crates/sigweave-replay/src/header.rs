//! The XML header describing a recorded stream.
//!
//! ```text
//! <?xml version="1.0" ?>
//! <stream ssi-v="2">
//!     <info ftype="BINARY" sr="50.000000" dim="3" byte="4" type="FLOAT"/>
//!     <chunk from="0.000000" to="2.000000" byte="0" num="100"/>
//! </stream>
//! ```
//!
//! Sample bytes live in a separate data file named after the header with a
//! trailing `~`.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use sigweave_core::{SampleFormat, SampleType};

use crate::error::{ReplayError, Result};

/// Suffix appended to a header path to name its data file.
pub const DATA_FILE_SUFFIX: &str = "~";

const BINARY: &str = "BINARY";
const HEADER_VERSION: &str = "2";

/// One contiguous recorded run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    /// Stream time of the first sample, in seconds.
    pub from: f64,
    /// Stream time just after the last sample, in seconds.
    pub to: f64,
    /// Offset of the chunk in the data file.
    pub byte: u64,
    /// Number of samples.
    pub num: u64,
}

impl Chunk {
    pub fn from_us(&self) -> i64 {
        (self.from * 1_000_000.0).round() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHeader {
    pub format: SampleFormat,
    pub chunks: Vec<Chunk>,
}

impl ReplayHeader {
    /// Header for a single chunk of `num` samples starting at `from` seconds.
    pub fn single(format: SampleFormat, from: f64, num: u64) -> Self {
        let to = from + num as f64 / format.sample_rate;
        Self {
            format,
            chunks: vec![Chunk {
                from,
                to,
                byte: 0,
                num,
            }],
        }
    }

    /// Total samples over all chunks.
    pub fn total_samples(&self) -> u64 {
        self.chunks.iter().fold(0u64, |acc, c| acc.saturating_add(c.num))
    }

    /// Bytes the data file must hold.
    pub fn data_len(&self) -> u64 {
        self.total_samples()
            .saturating_mul(self.format.sample_bytes() as u64)
    }

    /// Stream time of the first sample in microseconds.
    pub fn start_us(&self) -> i64 {
        self.chunks.first().map_or(0, Chunk::from_us)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(ReplayError::io(path))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut reader = Reader::from_str(raw);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut in_stream = false;
        let mut format = None;
        let mut chunks = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(xml_err)?;
            match event {
                Event::Start(element) | Event::Empty(element) => {
                    match element.name().as_ref() {
                        b"stream" => in_stream = true,
                        b"info" if in_stream => format = Some(parse_info(&element)?),
                        b"chunk" if in_stream => chunks.push(parse_chunk(&element)?),
                        _ => {}
                    }
                }
                Event::End(element) if element.name().as_ref() == b"stream" => break,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !in_stream {
            return Err(ReplayError::MissingElement("stream"));
        }
        let format = format.ok_or(ReplayError::MissingElement("info"))?;
        if chunks.is_empty() {
            return Err(ReplayError::MissingElement("chunk"));
        }
        Ok(Self { format, chunks })
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
            .map_err(xml_err)?;

        let mut stream = BytesStart::new("stream");
        stream.push_attribute(("ssi-v", HEADER_VERSION));
        writer.write_event(Event::Start(stream)).map_err(xml_err)?;

        let sr = format!("{:.6}", self.format.sample_rate);
        let dim = self.format.dim.to_string();
        let width = self.format.bytes_per_value.to_string();
        let mut info = BytesStart::new("info");
        info.push_attribute(("ftype", BINARY));
        info.push_attribute(("sr", sr.as_str()));
        info.push_attribute(("dim", dim.as_str()));
        info.push_attribute(("byte", width.as_str()));
        info.push_attribute(("type", self.format.sample_type.name()));
        writer.write_event(Event::Empty(info)).map_err(xml_err)?;

        for chunk in &self.chunks {
            let from = format!("{:.6}", chunk.from);
            let to = format!("{:.6}", chunk.to);
            let byte = chunk.byte.to_string();
            let num = chunk.num.to_string();
            let mut element = BytesStart::new("chunk");
            element.push_attribute(("from", from.as_str()));
            element.push_attribute(("to", to.as_str()));
            element.push_attribute(("byte", byte.as_str()));
            element.push_attribute(("num", num.as_str()));
            writer.write_event(Event::Empty(element)).map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("stream")))
            .map_err(xml_err)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(xml_err)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut xml = self.to_xml()?;
        xml.push('\n');
        fs::write(path, xml).map_err(ReplayError::io(path))
    }
}

/// Header and data file paths for a recording named by either of them.
pub fn resolve_paths(path: &Path) -> (PathBuf, PathBuf) {
    let raw = path.as_os_str().to_string_lossy();
    match raw.strip_suffix(DATA_FILE_SUFFIX) {
        Some(header) => (PathBuf::from(header), path.to_path_buf()),
        None => (path.to_path_buf(), PathBuf::from(format!("{raw}{DATA_FILE_SUFFIX}"))),
    }
}

fn xml_err<E: std::fmt::Display>(err: E) -> ReplayError {
    ReplayError::Xml(err.to_string())
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(Vec<u8>, String)>> {
    let mut out = Vec::new();
    for attr in element.attributes().with_checks(false) {
        let attr = attr.map_err(xml_err)?;
        let value = std::str::from_utf8(attr.value.as_ref())
            .map_err(xml_err)?
            .trim()
            .to_string();
        out.push((attr.key.as_ref().to_vec(), value));
    }
    Ok(out)
}

fn required<'a>(
    attrs: &'a [(Vec<u8>, String)],
    element: &'static str,
    attribute: &'static str,
) -> Result<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key.as_slice() == attribute.as_bytes())
        .map(|(_, value)| value.as_str())
        .ok_or(ReplayError::MissingAttribute { element, attribute })
}

fn number<T: std::str::FromStr>(value: &str, attribute: &'static str) -> Result<T> {
    value.parse().map_err(|_| ReplayError::InvalidAttribute {
        attribute,
        value: value.to_string(),
    })
}

fn parse_info(element: &BytesStart<'_>) -> Result<SampleFormat> {
    let attrs = attributes(element)?;
    if let Ok(ftype) = required(&attrs, "info", "ftype") {
        if !ftype.eq_ignore_ascii_case(BINARY) {
            return Err(ReplayError::UnsupportedFileType(ftype.to_string()));
        }
    }
    let sample_rate: f64 = number(required(&attrs, "info", "sr")?, "sr")?;
    let dim: u32 = number(required(&attrs, "info", "dim")?, "dim")?;
    let width: u32 = number(required(&attrs, "info", "byte")?, "byte")?;
    let type_name = required(&attrs, "info", "type")?;
    let sample_type =
        SampleType::from_name(type_name).ok_or_else(|| ReplayError::InvalidAttribute {
            attribute: "type",
            value: type_name.to_string(),
        })?;
    Ok(SampleFormat::new(sample_rate, dim, width, sample_type)?)
}

fn parse_chunk(element: &BytesStart<'_>) -> Result<Chunk> {
    let attrs = attributes(element)?;
    let from: f64 = number(required(&attrs, "chunk", "from")?, "from")?;
    let to: f64 = number(required(&attrs, "chunk", "to")?, "to")?;
    let num: u64 = number(required(&attrs, "chunk", "num")?, "num")?;
    let byte: u64 = match required(&attrs, "chunk", "byte") {
        Ok(value) => number(value, "byte")?,
        Err(_) => 0,
    };
    Ok(Chunk { from, to, byte, num })
}
