//! Sample formats and the blocks and windows that carry sample data.
//!
//! Element bytes are kept in the host's native byte order everywhere inside a
//! pipeline. Links convert to and from the order declared on the wire.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::SampleError;

/// Element type of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SampleType {
    /// Opaque elements of any width.
    Undef,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
}

impl SampleType {
    pub const ALL: [SampleType; 9] = [
        SampleType::Undef,
        SampleType::Byte,
        SampleType::Char,
        SampleType::Short,
        SampleType::Int,
        SampleType::Long,
        SampleType::Float,
        SampleType::Double,
        SampleType::Bool,
    ];

    /// Numeric code used on the wire.
    pub fn code(self) -> u32 {
        match self {
            SampleType::Undef => 0,
            SampleType::Byte => 1,
            SampleType::Char => 2,
            SampleType::Short => 3,
            SampleType::Int => 4,
            SampleType::Long => 5,
            SampleType::Float => 6,
            SampleType::Double => 7,
            SampleType::Bool => 8,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.code() == code)
    }

    /// Name used in replay headers.
    pub fn name(self) -> &'static str {
        match self {
            SampleType::Undef => "UNDEF",
            SampleType::Byte => "BYTE",
            SampleType::Char => "CHAR",
            SampleType::Short => "SHORT",
            SampleType::Int => "INT",
            SampleType::Long => "LONG",
            SampleType::Float => "FLOAT",
            SampleType::Double => "DOUBLE",
            SampleType::Bool => "BOOL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Width in bytes of one element, if the type fixes it.
    pub fn natural_width(self) -> Option<u32> {
        match self {
            SampleType::Undef => None,
            SampleType::Byte | SampleType::Bool => Some(1),
            SampleType::Char | SampleType::Short => Some(2),
            SampleType::Int | SampleType::Float => Some(4),
            SampleType::Long | SampleType::Double => Some(8),
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of every sample in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Samples per second.
    pub sample_rate: f64,
    /// Values per sample.
    pub dim: u32,
    /// Bytes per value.
    pub bytes_per_value: u32,
    pub sample_type: SampleType,
}

impl SampleFormat {
    /// Build a validated format.
    pub fn new(
        sample_rate: f64,
        dim: u32,
        bytes_per_value: u32,
        sample_type: SampleType,
    ) -> Result<Self, SampleError> {
        let format = Self {
            sample_rate,
            dim,
            bytes_per_value,
            sample_type,
        };
        format.validate()?;
        Ok(format)
    }

    /// Build a format whose element width is the type's natural width.
    pub fn of(sample_rate: f64, dim: u32, sample_type: SampleType) -> Result<Self, SampleError> {
        let width = sample_type.natural_width().ok_or_else(|| {
            SampleError::InvalidFormat(format!("{sample_type} has no natural width"))
        })?;
        Self::new(sample_rate, dim, width, sample_type)
    }

    pub fn validate(&self) -> Result<(), SampleError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(SampleError::InvalidFormat(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.dim == 0 {
            return Err(SampleError::InvalidFormat(
                "dimension must be at least 1".to_string(),
            ));
        }
        if self.bytes_per_value == 0 {
            return Err(SampleError::InvalidFormat(
                "element width must be at least 1 byte".to_string(),
            ));
        }
        if let Some(width) = self.sample_type.natural_width() {
            if width != self.bytes_per_value {
                return Err(SampleError::InvalidFormat(format!(
                    "{} elements are {width} bytes, got {}",
                    self.sample_type, self.bytes_per_value
                )));
            }
        }
        Ok(())
    }

    /// Bytes occupied by one sample across all dimensions.
    pub fn sample_bytes(&self) -> usize {
        self.dim as usize * self.bytes_per_value as usize
    }

    /// Number of samples covering `seconds`, rounded to the nearest sample.
    pub fn samples_for(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate).round().max(0.0) as usize
    }

    /// Offset in microseconds of sample `index` from the first sample.
    pub fn offset_us(&self, index: u64) -> i64 {
        (index as f64 * 1_000_000.0 / self.sample_rate).round() as i64
    }

    /// Pack numeric values (sample-major, `dim` values per sample) into
    /// native-order element bytes.
    pub fn encode_values(&self, values: &[f64]) -> Result<Bytes, SampleError> {
        if values.len() % self.dim as usize != 0 {
            return Err(SampleError::PayloadMismatch {
                expected: values.len().next_multiple_of(self.dim as usize)
                    * self.bytes_per_value as usize,
                actual: values.len() * self.bytes_per_value as usize,
            });
        }
        let mut out = BytesMut::with_capacity(values.len() * self.bytes_per_value as usize);
        for &v in values {
            match self.sample_type {
                SampleType::Undef => return Err(SampleError::NotNumeric("UNDEF")),
                SampleType::Byte => out.put_i8(v as i8),
                SampleType::Bool => out.put_u8(u8::from(v != 0.0)),
                SampleType::Char => out.put_slice(&(v as u16).to_ne_bytes()),
                SampleType::Short => out.put_slice(&(v as i16).to_ne_bytes()),
                SampleType::Int => out.put_slice(&(v as i32).to_ne_bytes()),
                SampleType::Long => out.put_slice(&(v as i64).to_ne_bytes()),
                SampleType::Float => out.put_slice(&(v as f32).to_ne_bytes()),
                SampleType::Double => out.put_slice(&v.to_ne_bytes()),
            }
        }
        Ok(out.freeze())
    }

    /// Unpack native-order element bytes into numeric values.
    pub fn decode_values(&self, data: &[u8]) -> Result<Vec<f64>, SampleError> {
        let width = self.bytes_per_value as usize;
        if data.len() % self.sample_bytes() != 0 {
            return Err(SampleError::PayloadMismatch {
                expected: data.len().next_multiple_of(self.sample_bytes()),
                actual: data.len(),
            });
        }
        data.chunks_exact(width)
            .map(|raw| {
                Ok(match self.sample_type {
                    SampleType::Undef => return Err(SampleError::NotNumeric("UNDEF")),
                    SampleType::Byte => f64::from(raw[0] as i8),
                    SampleType::Bool => f64::from(u8::from(raw[0] != 0)),
                    SampleType::Char => f64::from(u16::from_ne_bytes([raw[0], raw[1]])),
                    SampleType::Short => f64::from(i16::from_ne_bytes([raw[0], raw[1]])),
                    SampleType::Int => f64::from(i32::from_ne_bytes(array(raw))),
                    SampleType::Long => i64::from_ne_bytes(array(raw)) as f64,
                    SampleType::Float => f64::from(f32::from_ne_bytes(array(raw))),
                    SampleType::Double => f64::from_ne_bytes(array(raw)),
                })
            })
            .collect()
    }
}

fn array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[..N]);
    out
}

/// Reverse the byte order of every `width`-byte element in `data`.
pub fn swap_element_order(data: &[u8], width: usize) -> Bytes {
    if width <= 1 {
        return Bytes::copy_from_slice(data);
    }
    let mut out = BytesMut::with_capacity(data.len());
    for element in data.chunks(width) {
        out.extend(element.iter().rev());
    }
    out.freeze()
}

/// Timestamped run of samples produced by one provider step.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub format: SampleFormat,
    /// Pipeline-relative time of the first sample, in microseconds.
    pub time_us: i64,
    pub count: u32,
    pub data: Bytes,
}

impl SampleBlock {
    pub fn new(
        format: SampleFormat,
        time_us: i64,
        count: u32,
        data: Bytes,
    ) -> Result<Self, SampleError> {
        let expected = (count as usize)
            .checked_mul(format.sample_bytes())
            .unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(SampleError::PayloadMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            format,
            time_us,
            count,
            data,
        })
    }

    /// Build a block from numeric values, `dim` per sample.
    pub fn from_values(
        format: SampleFormat,
        time_us: i64,
        values: &[f64],
    ) -> Result<Self, SampleError> {
        let data = format.encode_values(values)?;
        let count = (values.len() / format.dim as usize) as u32;
        Self::new(format, time_us, count, data)
    }
}

/// Samples handed to a consumer for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    pub format: SampleFormat,
    /// Pipeline-relative time of the first sample, in microseconds.
    pub time_us: i64,
    pub count: usize,
    /// Leading samples already handed out in an earlier window.
    pub overlap: usize,
    pub data: Bytes,
}

impl SampleWindow {
    /// The trailing samples no earlier window held. Sinks that forward or
    /// store samples use this so a look-back is never written twice.
    pub fn fresh(&self) -> SampleWindow {
        let skip = self.overlap.min(self.count);
        let at = (skip * self.format.sample_bytes()).min(self.data.len());
        SampleWindow {
            format: self.format,
            time_us: self.time_us + self.format.offset_us(skip as u64),
            count: self.count - skip,
            overlap: 0,
            data: self.data.slice(at..),
        }
    }

    pub fn values(&self) -> Result<Vec<f64>, SampleError> {
        self.format.decode_values(&self.data)
    }

    /// Mean of each dimension over the window.
    pub fn mean(&self) -> Result<Vec<f64>, SampleError> {
        let dim = self.format.dim as usize;
        let values = self.values()?;
        let mut sums = vec![0.0; dim];
        for sample in values.chunks_exact(dim) {
            for (sum, v) in sums.iter_mut().zip(sample) {
                *sum += v;
            }
        }
        let n = self.count.max(1) as f64;
        Ok(sums.into_iter().map(|s| s / n).collect())
    }
}
