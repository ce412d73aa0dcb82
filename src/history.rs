//! History ring buffers for vector samples
//!
//! Each map slot keeps one `HistoryBuffer` per instance: a fixed-capacity
//! ring of vector samples with timetags. Appends are O(1); reads are indexed
//! backwards from the most recent sample. Reallocation preserves the causal
//! order of retained samples by rebuilding into a fresh buffer and swapping,
//! so `read(0)` observes the same sample before and after a grow or shrink
//! of an input buffer.

use crate::error::{Result, SigmapError};
use crate::value::{Timetag, Value, ValueType};

/// Fixed-capacity ring of vector samples with timetags
///
/// The element type and vector length are fixed at construction. `position`
/// is `-1` until the first write; afterwards it always points at the most
/// recent sample and `read(k)` walks `k` steps into the past.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    /// Element type of every sample
    ty: ValueType,
    /// Vector length of every sample
    length: usize,
    /// Ring capacity in samples
    capacity: usize,
    /// Number of samples currently retained (<= capacity)
    size: usize,
    /// Index of the most recent sample, -1 if never written
    position: isize,
    /// Sample storage, `capacity * length` elements, zero-initialized
    values: Vec<Value>,
    /// One timetag per ring cell
    timetags: Vec<Timetag>,
}

impl HistoryBuffer {
    /// Create a zero-initialized history with the given shape
    pub fn new(ty: ValueType, length: usize, capacity: usize) -> Result<Self> {
        if length == 0 {
            return Err(SigmapError::config("history vector length must be > 0"));
        }
        if capacity == 0 {
            return Err(SigmapError::config("history capacity must be > 0"));
        }
        Ok(Self {
            ty,
            length,
            capacity,
            size: 0,
            position: -1,
            values: vec![Value::zero(ty); capacity * length],
            timetags: vec![Timetag::ZERO; capacity],
        })
    }

    /// Element type of the stored samples
    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Vector length of the stored samples
    pub fn vector_length(&self) -> usize {
        self.length
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples currently retained
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no sample has been written yet
    pub fn is_empty(&self) -> bool {
        self.position < 0
    }

    /// Index of the most recent sample, -1 if never written
    pub fn position(&self) -> isize {
        self.position
    }

    /// Append a sample, advancing the ring position
    ///
    /// Elements are coerced to the buffer's element type on the way in.
    pub fn write(&mut self, sample: &[Value], timetag: Timetag) -> Result<()> {
        if sample.len() != self.length {
            return Err(SigmapError::LengthMismatch {
                expected: self.length,
                actual: sample.len(),
            });
        }
        self.position = (self.position + 1).rem_euclid(self.capacity as isize);
        if self.size < self.capacity {
            self.size += 1;
        }
        let base = self.position as usize * self.length;
        for (cell, v) in self.values[base..base + self.length].iter_mut().zip(sample) {
            *cell = v.coerce(self.ty);
        }
        self.timetags[self.position as usize] = timetag;
        Ok(())
    }

    /// Append a sample given as f64 elements
    pub fn write_f64(&mut self, sample: &[f64], timetag: Timetag) -> Result<()> {
        if sample.len() != self.length {
            return Err(SigmapError::LengthMismatch {
                expected: self.length,
                actual: sample.len(),
            });
        }
        self.position = (self.position + 1).rem_euclid(self.capacity as isize);
        if self.size < self.capacity {
            self.size += 1;
        }
        let base = self.position as usize * self.length;
        for (cell, v) in self.values[base..base + self.length].iter_mut().zip(sample) {
            *cell = Value::from_f64(self.ty, *v);
        }
        self.timetags[self.position as usize] = timetag;
        Ok(())
    }

    /// Read the sample written `k` steps ago (`k = 0` is most recent)
    pub fn read(&self, k: usize) -> Result<(&[Value], Timetag)> {
        if self.position < 0 {
            return Err(SigmapError::NotYetWritten);
        }
        if k >= self.size {
            return Err(SigmapError::OutOfHistory {
                requested: k,
                available: self.size,
            });
        }
        let idx = (self.position - k as isize).rem_euclid(self.capacity as isize) as usize;
        let base = idx * self.length;
        Ok((&self.values[base..base + self.length], self.timetags[idx]))
    }

    /// The most recent sample, if any
    pub fn recent(&self) -> Result<(&[Value], Timetag)> {
        self.read(0)
    }

    /// Mutable view of the most recent sample, for in-place post-processing
    pub fn recent_mut(&mut self) -> Result<&mut [Value]> {
        if self.position < 0 {
            return Err(SigmapError::NotYetWritten);
        }
        let base = self.position as usize * self.length;
        Ok(&mut self.values[base..base + self.length])
    }

    /// Resize the ring to `new_capacity` samples
    ///
    /// For input buffers the `new_capacity` most recent samples are retained
    /// in causal order, with fresh zeroed cells placed before the oldest
    /// retained sample in modular order. Output buffers are zeroed and reset
    /// to the never-written state. The rebuild-and-swap keeps `read(0)`
    /// stable across the call for input buffers.
    pub fn realloc(&mut self, new_capacity: usize, is_input: bool) -> Result<()> {
        if new_capacity == 0 || new_capacity == self.capacity {
            return Ok(());
        }
        let mut values = vec![Value::zero(self.ty); new_capacity * self.length];
        let mut timetags = vec![Timetag::ZERO; new_capacity];

        if is_input && self.position >= 0 {
            let retained = self.size.min(new_capacity);
            // oldest retained sample lands at index 0, newest at retained-1
            for slot in 0..retained {
                let k = retained - 1 - slot;
                let (sample, tt) = self.read(k)?;
                let base = slot * self.length;
                values[base..base + self.length].copy_from_slice(sample);
                timetags[slot] = tt;
            }
            self.size = retained;
            self.position = retained as isize - 1;
        } else {
            self.size = 0;
            self.position = -1;
        }
        self.values = values;
        self.timetags = timetags;
        self.capacity = new_capacity;
        Ok(())
    }
}
