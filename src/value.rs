//! Typed values, vector samples, and timetags
//!
//! All numeric work inside the engine happens in `f64`; conversion to the
//! slot's element type happens at buffer boundaries. Timetags are NTP-style
//! 64-bit pairs (whole seconds plus 2^-32 fractions).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{NTP_UNIX_EPOCH_OFFSET, TIMETAG_FRACTION_PER_SEC};

/// Element type of a signal or map slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed integer, wire tag `'i'`
    Int32,
    /// 32-bit float, wire tag `'f'`
    Float32,
    /// 64-bit float, wire tag `'d'`
    Float64,
}

impl ValueType {
    /// The single-character wire tag for this type
    pub fn wire_char(self) -> char {
        match self {
            Self::Int32 => 'i',
            Self::Float32 => 'f',
            Self::Float64 => 'd',
        }
    }

    /// Parse a wire tag character
    pub fn from_wire_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::Int32),
            'f' => Some(Self::Float32),
            'd' => Some(Self::Float64),
            _ => None,
        }
    }

    /// Size in bytes of one element of this type
    pub fn size(self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_char())
    }
}

/// One element of a vector sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit signed integer
    Int32(i32),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

impl Value {
    /// The element type of this value
    pub fn value_type(self) -> ValueType {
        match self {
            Self::Int32(_) => ValueType::Int32,
            Self::Float32(_) => ValueType::Float32,
            Self::Float64(_) => ValueType::Float64,
        }
    }

    /// Promote to f64 for engine arithmetic
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int32(v) => v as f64,
            Self::Float32(v) => v as f64,
            Self::Float64(v) => v,
        }
    }

    /// Build a value of the given type from an f64, truncating for integers
    pub fn from_f64(ty: ValueType, v: f64) -> Self {
        match ty {
            ValueType::Int32 => Self::Int32(v as i32),
            ValueType::Float32 => Self::Float32(v as f32),
            ValueType::Float64 => Self::Float64(v),
        }
    }

    /// Convert this value to the given element type
    pub fn coerce(self, ty: ValueType) -> Self {
        if self.value_type() == ty {
            self
        } else {
            Self::from_f64(ty, self.as_f64())
        }
    }

    /// The zero value of the given type
    pub fn zero(ty: ValueType) -> Self {
        Self::from_f64(ty, 0.0)
    }
}

/// NTP-style timetag: whole seconds plus 2^-32 fractional seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timetag {
    /// Whole seconds since the NTP epoch
    pub seconds: u32,
    /// Fractional seconds in units of 2^-32
    pub fraction: u32,
}

impl Timetag {
    /// The zero timetag ("immediately")
    pub const ZERO: Timetag = Timetag {
        seconds: 0,
        fraction: 0,
    };

    /// Current wall-clock time as a timetag
    pub fn now() -> Self {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seconds = (since_unix.as_secs() + NTP_UNIX_EPOCH_OFFSET) as u32;
        let fraction =
            (since_unix.subsec_nanos() as f64 / 1e9 * TIMETAG_FRACTION_PER_SEC) as u32;
        Timetag { seconds, fraction }
    }

    /// Timetag as seconds in f64, for interval arithmetic
    pub fn as_secs_f64(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / TIMETAG_FRACTION_PER_SEC
    }
}
