//! Frame Streams codec
//!
//! Length-prefixed framing used by dnstap producers:
//!
//! ```text
//! data frame:    | len: u32 BE (> 0) | payload (len bytes) |
//! control frame: | 0: u32 | clen: u32 BE | type: u32 BE | fields... |
//! field:         | field type: u32 BE | flen: u32 BE | value (flen bytes) |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Content type carried by dnstap START / READY / ACCEPT frames
pub const DNSTAP_CONTENT_TYPE: &[u8] = b"protobuf:dnstap.Dnstap";

/// Largest accepted data frame payload
pub const MAX_DATA_FRAME_LEN: usize = 1024 * 1024;

/// Largest accepted control frame body
pub const MAX_CONTROL_FRAME_LEN: usize = 512;

const CONTROL_FIELD_CONTENT_TYPE: u32 = 1;

/// Control frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Accept,
    Start,
    Stop,
    Ready,
    Finish,
}

impl ControlKind {
    pub fn code(self) -> u32 {
        match self {
            Self::Accept => 1,
            Self::Start => 2,
            Self::Stop => 3,
            Self::Ready => 4,
            Self::Finish => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Accept),
            2 => Some(Self::Start),
            3 => Some(Self::Stop),
            4 => Some(Self::Ready),
            5 => Some(Self::Finish),
            _ => None,
        }
    }
}

/// A decoded control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub kind: ControlKind,
    pub content_types: Vec<Bytes>,
}

impl ControlFrame {
    pub fn new(kind: ControlKind) -> Self {
        Self {
            kind,
            content_types: Vec::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<Bytes>) -> Self {
        self.content_types.push(content_type.into());
        self
    }

    /// START frame announcing dnstap payloads
    pub fn dnstap_start() -> Self {
        Self::new(ControlKind::Start).with_content_type(Bytes::from_static(DNSTAP_CONTENT_TYPE))
    }

    /// True when the frame lists `content_type`, or lists nothing at all
    pub fn accepts(&self, content_type: &[u8]) -> bool {
        self.content_types.is_empty()
            || self
                .content_types
                .iter()
                .any(|ct| ct.as_ref() == content_type)
    }

    fn body_len(&self) -> usize {
        4 + self
            .content_types
            .iter()
            .map(|ct| 8 + ct.len())
            .sum::<usize>()
    }
}

/// One unit on a Frame Streams byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Control(ControlFrame),
}

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("data frame of {len} bytes exceeds limit of {max}")]
    DataTooLarge { len: usize, max: usize },

    #[error("control frame of {len} bytes exceeds limit of {max}")]
    ControlTooLarge { len: usize, max: usize },

    #[error("unknown control frame type {0}")]
    UnknownControl(u32),

    #[error("malformed control frame: {0}")]
    MalformedControl(&'static str),

    #[error("empty data frame cannot be encoded")]
    EmptyData,

    #[error("stream ended inside a frame ({0} bytes pending)")]
    Truncated(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stateless Frame Streams codec
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStreamCodec;

impl FrameStreamCodec {
    /// Encode one frame into a fresh buffer
    pub fn encode_frame(frame: Frame) -> Result<BytesMut, FrameError> {
        let mut buf = BytesMut::new();
        FrameStreamCodec.encode(frame, &mut buf)?;
        Ok(buf)
    }
}

impl Decoder for FrameStreamCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = read_u32(&src[..4]) as usize;

        if len > 0 {
            if len > MAX_DATA_FRAME_LEN {
                return Err(FrameError::DataTooLarge {
                    len,
                    max: MAX_DATA_FRAME_LEN,
                });
            }
            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }
            src.advance(4);
            return Ok(Some(Frame::Data(src.split_to(len).freeze())));
        }

        if src.len() < 8 {
            return Ok(None);
        }
        let control_len = read_u32(&src[4..8]) as usize;
        if control_len > MAX_CONTROL_FRAME_LEN {
            return Err(FrameError::ControlTooLarge {
                len: control_len,
                max: MAX_CONTROL_FRAME_LEN,
            });
        }
        if control_len < 4 {
            return Err(FrameError::MalformedControl("missing control type"));
        }
        if src.len() < 8 + control_len {
            src.reserve(8 + control_len - src.len());
            return Ok(None);
        }
        src.advance(8);
        let body = src.split_to(control_len).freeze();
        parse_control(body).map(|c| Some(Frame::Control(c)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated(buf.len())),
        }
    }
}

impl Encoder<Frame> for FrameStreamCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::Data(payload) => {
                if payload.is_empty() {
                    return Err(FrameError::EmptyData);
                }
                if payload.len() > MAX_DATA_FRAME_LEN {
                    return Err(FrameError::DataTooLarge {
                        len: payload.len(),
                        max: MAX_DATA_FRAME_LEN,
                    });
                }
                dst.reserve(4 + payload.len());
                dst.put_u32(payload.len() as u32);
                dst.put_slice(&payload);
            }
            Frame::Control(control) => {
                let body_len = control.body_len();
                if body_len > MAX_CONTROL_FRAME_LEN {
                    return Err(FrameError::ControlTooLarge {
                        len: body_len,
                        max: MAX_CONTROL_FRAME_LEN,
                    });
                }
                dst.reserve(8 + body_len);
                dst.put_u32(0);
                dst.put_u32(body_len as u32);
                dst.put_u32(control.kind.code());
                for content_type in &control.content_types {
                    dst.put_u32(CONTROL_FIELD_CONTENT_TYPE);
                    dst.put_u32(content_type.len() as u32);
                    dst.put_slice(content_type);
                }
            }
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_control(mut body: Bytes) -> Result<ControlFrame, FrameError> {
    let code = body.get_u32();
    let kind = ControlKind::from_code(code).ok_or(FrameError::UnknownControl(code))?;
    let mut control = ControlFrame::new(kind);

    while body.has_remaining() {
        if body.remaining() < 8 {
            return Err(FrameError::MalformedControl("truncated field header"));
        }
        let field_type = body.get_u32();
        let field_len = body.get_u32() as usize;
        if field_len > body.remaining() {
            return Err(FrameError::MalformedControl("field length exceeds frame"));
        }
        let value = body.split_to(field_len);
        // unknown field types are skipped
        if field_type == CONTROL_FIELD_CONTENT_TYPE {
            control.content_types.push(value);
        }
    }

    Ok(control)
}
