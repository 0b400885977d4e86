//! Human-biometrics blob codec.
//!
//! A biometrics blob is a tightly packed sequence of records, each a fixed
//! 9-byte [`SeriesHeader`] followed by `ss` data elements. An element is one
//! offset byte plus a value whose width is given by the header's value type.
//! All multi-byte integers are network byte order. There is no overall length
//! prefix and no checksum: a blob is valid only if its records consume the
//! buffer exactly.
//!
//! ```text
//! +----+----------+----+----+----+----+-----+-----+-----+-----+ ...
//! | t  | ts (BE)  | it | im | vt | ss | ofs | val | ofs | val |
//! +----+----------+----+----+----+----+-----+-----+-----+-----+ ...
//!   1       4       1    1    1    1     1   1..8
//! ```

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Size of a series header on the wire.
pub const SERIES_HEADER_LEN: usize = 9;

/// Largest sample count a single header can declare.
pub const MAX_SAMPLES_PER_SERIES: usize = u8::MAX as usize;

// ── Wire header ───────────────────────────────────────────────────────────────

/// On-wire series header.
///
/// Fields keep their wire names; use [`Series`] for the decoded form.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SeriesHeader {
    /// Biometric type.
    pub t: u8,
    /// Series start, UTC seconds.
    pub ts: U32<NetworkEndian>,
    /// Interval type.
    pub it: u8,
    /// Interval multiplier.
    pub im: u8,
    /// Value type (element value width).
    pub vt: u8,
    /// Number of data elements that follow.
    pub ss: u8,
}

assert_eq_size!(SeriesHeader, [u8; SERIES_HEADER_LEN]);

// ── Types ─────────────────────────────────────────────────────────────────────

/// What a series measures.
///
/// Unrecognised type bytes are kept as `Unknown(raw)` so that decoding and
/// re-encoding a blob never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricType {
    HeartRate,
    SkinTemp,
    CoreTemp,
    Hydration,
    BloodOxygenation,
    FatigueLevel,
    TaskEffectiveness,
    Unknown(u8),
}

impl From<u8> for BiometricType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::HeartRate,
            2 => Self::SkinTemp,
            3 => Self::CoreTemp,
            4 => Self::Hydration,
            5 => Self::BloodOxygenation,
            6 => Self::FatigueLevel,
            7 => Self::TaskEffectiveness,
            other => Self::Unknown(other),
        }
    }
}

impl From<BiometricType> for u8 {
    fn from(t: BiometricType) -> u8 {
        match t {
            BiometricType::HeartRate => 1,
            BiometricType::SkinTemp => 2,
            BiometricType::CoreTemp => 3,
            BiometricType::Hydration => 4,
            BiometricType::BloodOxygenation => 5,
            BiometricType::FatigueLevel => 6,
            BiometricType::TaskEffectiveness => 7,
            BiometricType::Unknown(raw) => raw,
        }
    }
}

/// Width of every element value in a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
}

impl ValueType {
    /// Value width in bytes.
    pub const fn width(self) -> usize {
        match self {
            ValueType::U8 => 1,
            ValueType::U16 => 2,
            ValueType::U32 => 4,
            ValueType::U64 => 8,
        }
    }

    /// Bytes per data element: the offset byte plus the value.
    pub const fn element_len(self) -> usize {
        1 + self.width()
    }

    /// Largest value representable at this width.
    pub const fn max_value(self) -> u64 {
        match self {
            ValueType::U8 => u8::MAX as u64,
            ValueType::U16 => u16::MAX as u64,
            ValueType::U32 => u32::MAX as u64,
            ValueType::U64 => u64::MAX,
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ValueType::U8),
            2 => Ok(ValueType::U16),
            3 => Ok(ValueType::U32),
            4 => Ok(ValueType::U64),
            other => Err(CodecError::UnsupportedValueType(other)),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(vt: ValueType) -> u8 {
        vt as u8
    }
}

/// One data element: an offset within the series and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub offset: u8,
    pub value: u64,
}

/// A decoded series: header fields plus its samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub kind: BiometricType,
    /// UTC seconds, host order.
    pub timestamp: u32,
    pub interval_type: u8,
    pub interval_multiplier: u8,
    pub value_type: ValueType,
    pub samples: Vec<Sample>,
}

impl Series {
    /// Encoded size of this series in bytes.
    pub fn encoded_len(&self) -> usize {
        SERIES_HEADER_LEN + self.samples.len() * self.value_type.element_len()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A record runs past the end of the buffer.
    #[error("corrupt biometrics data at byte offset {offset}")]
    CorruptData { offset: usize },

    #[error("unsupported value type: {0}")]
    UnsupportedValueType(u8),

    #[error("value {value} does not fit value type {value_type:?}")]
    ValueOutOfRange { value: u64, value_type: ValueType },

    #[error("series holds {0} samples, at most {} fit in one header", MAX_SAMPLES_PER_SERIES)]
    TooManySamples(usize),
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decode a biometrics blob into its series.
///
/// An empty buffer yields an empty list. Any record that would read past the
/// end of the buffer, including a trailing fragment shorter than a header,
/// fails with [`CodecError::CorruptData`]. A header naming a value type other
/// than 1 to 4 fails with [`CodecError::UnsupportedValueType`].
pub fn decode(buf: &[u8]) -> Result<Vec<Series>, CodecError> {
    let mut series = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        let header = SeriesHeader::read_from_prefix(&buf[pos..])
            .ok_or(CodecError::CorruptData { offset: pos })?;
        let value_type = ValueType::try_from(header.vt)?;
        pos += SERIES_HEADER_LEN;

        let element_len = value_type.element_len();
        let body_len = header.ss as usize * element_len;
        let body = buf
            .get(pos..pos + body_len)
            .ok_or(CodecError::CorruptData { offset: pos })?;

        let samples = body
            .chunks_exact(element_len)
            .map(|element| Sample {
                offset: element[0],
                value: read_be(&element[1..]),
            })
            .collect();
        pos += body_len;

        series.push(Series {
            kind: BiometricType::from(header.t),
            timestamp: header.ts.get(),
            interval_type: header.it,
            interval_multiplier: header.im,
            value_type,
            samples,
        });
    }

    Ok(series)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encoded size of a list of series.
pub fn encoded_len(series: &[Series]) -> usize {
    series.iter().map(Series::encoded_len).sum()
}

/// Encode series into a biometrics blob. Inverse of [`decode`].
pub fn encode(series: &[Series]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(encoded_len(series));

    for s in series {
        if s.samples.len() > MAX_SAMPLES_PER_SERIES {
            return Err(CodecError::TooManySamples(s.samples.len()));
        }

        let header = SeriesHeader {
            t: s.kind.into(),
            ts: U32::new(s.timestamp),
            it: s.interval_type,
            im: s.interval_multiplier,
            vt: s.value_type.into(),
            ss: s.samples.len() as u8,
        };
        out.extend_from_slice(header.as_bytes());

        let width = s.value_type.width();
        for sample in &s.samples {
            if sample.value > s.value_type.max_value() {
                return Err(CodecError::ValueOutOfRange {
                    value: sample.value,
                    value_type: s.value_type,
                });
            }
            out.push(sample.offset);
            out.extend_from_slice(&sample.value.to_be_bytes()[8 - width..]);
        }
    }

    Ok(out)
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Accumulates samples for one biometric between reports.
///
/// Call [`restart`](Self::restart) at the start of each reporting window and
/// [`snapshot`](Self::snapshot) when the window closes.
#[derive(Debug, Clone)]
pub struct SeriesBuilder {
    kind: BiometricType,
    value_type: ValueType,
    interval_type: u8,
    interval_multiplier: u8,
    timestamp: u32,
    samples: Vec<Sample>,
}

impl SeriesBuilder {
    pub fn new(kind: BiometricType, value_type: ValueType) -> Self {
        Self {
            kind,
            value_type,
            interval_type: 0,
            interval_multiplier: 0,
            timestamp: 0,
            samples: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval_type: u8, interval_multiplier: u8) -> Self {
        self.interval_type = interval_type;
        self.interval_multiplier = interval_multiplier;
        self
    }

    /// Drop accumulated samples and start a new window at `timestamp`.
    pub fn restart(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
        self.samples.clear();
    }

    /// Append a sample. Returns false once the series is full or the value
    /// does not fit the value type.
    pub fn push(&mut self, offset: u8, value: u64) -> bool {
        if self.samples.len() >= MAX_SAMPLES_PER_SERIES || value > self.value_type.max_value() {
            return false;
        }
        self.samples.push(Sample { offset, value });
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn snapshot(&self) -> Series {
        Series {
            kind: self.kind,
            timestamp: self.timestamp,
            interval_type: self.interval_type,
            interval_multiplier: self.interval_multiplier,
            value_type: self.value_type,
            samples: self.samples.clone(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
