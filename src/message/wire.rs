//! Typed-argument wire frames and the transport contract
//!
//! The engine addresses frames by string path and speaks a small typed
//! argument set: i32, f32, f64, string, timetag, and nil. Frames encode to
//! little-endian bytes with a trailing crc32 so a corrupted datagram is
//! rejected at decode time rather than dispatched.

use std::net::SocketAddr;

use crate::constants::MAX_FRAME_BYTES;
use crate::error::{Result, SigmapError};
use crate::value::Timetag;

/// One typed argument in a wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireArg {
    /// 32-bit signed integer, tag `'i'`
    Int32(i32),
    /// 32-bit float, tag `'f'`
    Float32(f32),
    /// 64-bit float, tag `'d'`
    Float64(f64),
    /// UTF-8 string, tag `'s'`
    Str(String),
    /// NTP-style timetag, tag `'t'`
    Time(Timetag),
    /// Explicit null, tag `'N'`
    Nil,
}

impl WireArg {
    /// Single-byte type tag used in the encoded frame
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Int32(_) => b'i',
            Self::Float32(_) => b'f',
            Self::Float64(_) => b'd',
            Self::Str(_) => b's',
            Self::Time(_) => b't',
            Self::Nil => b'N',
        }
    }
}

/// A path-addressed frame of typed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    /// Address path, e.g. `/device/signal`
    pub path: String,
    /// Argument list
    pub args: Vec<WireArg>,
}

impl WireFrame {
    /// Create an empty frame for the given path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// Encode to bytes: path, typetags, payload, trailing crc32
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        let path = self.path.as_bytes();
        if path.len() > u16::MAX as usize {
            return Err(SigmapError::invalid_frame("path too long"));
        }
        buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
        buf.extend_from_slice(path);
        if self.args.len() > u16::MAX as usize {
            return Err(SigmapError::invalid_frame("too many arguments"));
        }
        buf.extend_from_slice(&(self.args.len() as u16).to_le_bytes());
        for arg in &self.args {
            buf.push(arg.type_tag());
        }
        for arg in &self.args {
            match arg {
                WireArg::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
                WireArg::Float32(v) => buf.extend_from_slice(&v.to_le_bytes()),
                WireArg::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                WireArg::Str(s) => {
                    let bytes = s.as_bytes();
                    if bytes.len() > u16::MAX as usize {
                        return Err(SigmapError::invalid_frame("string argument too long"));
                    }
                    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    buf.extend_from_slice(bytes);
                }
                WireArg::Time(tt) => {
                    buf.extend_from_slice(&tt.seconds.to_le_bytes());
                    buf.extend_from_slice(&tt.fraction.to_le_bytes());
                }
                WireArg::Nil => {}
            }
        }
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        if buf.len() > MAX_FRAME_BYTES {
            return Err(SigmapError::invalid_frame(format!(
                "encoded frame is {} bytes, limit {MAX_FRAME_BYTES}",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Decode a frame, verifying the trailing checksum
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(SigmapError::invalid_frame("frame shorter than header"));
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if crc32fast::hash(body) != expected {
            return Err(SigmapError::invalid_frame("checksum mismatch"));
        }

        let mut cursor = Cursor { data: body, pos: 0 };
        let path_len = cursor.read_u16()? as usize;
        let path = String::from_utf8(cursor.read_bytes(path_len)?.to_vec())
            .map_err(|_| SigmapError::invalid_frame("path is not UTF-8"))?;
        let count = cursor.read_u16()? as usize;
        let tags = cursor.read_bytes(count)?.to_vec();
        let mut args = Vec::with_capacity(count);
        for tag in tags {
            let arg = match tag {
                b'i' => WireArg::Int32(i32::from_le_bytes(cursor.read_array()?)),
                b'f' => WireArg::Float32(f32::from_le_bytes(cursor.read_array()?)),
                b'd' => WireArg::Float64(f64::from_le_bytes(cursor.read_array()?)),
                b's' => {
                    let len = cursor.read_u16()? as usize;
                    let bytes = cursor.read_bytes(len)?.to_vec();
                    WireArg::Str(
                        String::from_utf8(bytes)
                            .map_err(|_| SigmapError::invalid_frame("string is not UTF-8"))?,
                    )
                }
                b't' => WireArg::Time(Timetag {
                    seconds: u32::from_le_bytes(cursor.read_array()?),
                    fraction: u32::from_le_bytes(cursor.read_array()?),
                }),
                b'N' => WireArg::Nil,
                other => {
                    return Err(SigmapError::invalid_frame(format!(
                        "unknown type tag 0x{other:02x}"
                    )))
                }
            };
            args.push(arg);
        }
        if cursor.pos != body.len() {
            return Err(SigmapError::invalid_frame("trailing bytes after payload"));
        }
        Ok(Self { path, args })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(SigmapError::invalid_frame("frame truncated"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }
}

/// Outbound transport consumed by the engine
pub trait Transport {
    /// Send one frame towards the destination device
    fn send(&mut self, frame: &WireFrame) -> Result<()>;
}

/// Inbound dispatch contract: the transport calls this for received frames
pub trait Dispatcher {
    /// Handle one received frame
    fn dispatch(&mut self, frame: &WireFrame, source: SocketAddr);
}

/// In-memory transport that records sent frames, for tests and demos
#[derive(Debug, Default)]
pub struct QueueTransport {
    /// Frames sent so far, oldest first
    pub sent: Vec<WireFrame>,
}

impl Transport for QueueTransport {
    fn send(&mut self, frame: &WireFrame) -> Result<()> {
        self.sent.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> WireFrame {
        WireFrame {
            path: "/synth/freq".into(),
            args: vec![
                WireArg::Int32(-7),
                WireArg::Float32(1.5),
                WireArg::Float64(0.25),
                WireArg::Str("@mode".into()),
                WireArg::Time(Timetag {
                    seconds: 100,
                    fraction: 42,
                }),
                WireArg::Nil,
            ],
        }
    }

    #[test]
    fn test_serialize_round_trip() {
        let frame = sample_frame();
        let bytes = frame.serialize().unwrap();
        let decoded = WireFrame::deserialize(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_corrupted_frame_rejected() {
        let mut bytes = sample_frame().serialize().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(
            WireFrame::deserialize(&bytes),
            Err(SigmapError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = sample_frame().serialize().unwrap();
        assert!(WireFrame::deserialize(&bytes[..6]).is_err());
    }

    #[test]
    fn test_queue_transport_records_frames() {
        let mut transport = QueueTransport::default();
        transport.send(&sample_frame()).unwrap();
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].path, "/synth/freq");
    }
}
