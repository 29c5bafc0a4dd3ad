//! Frame Streams session state
//!
//! Interprets control frames for one connection or file and tells the
//! driver what to do next. Data frames are passed through untouched.

use bytes::Bytes;
use contracts::{ControlFrame, ControlKind, Frame, DNSTAP_CONTENT_TYPE};
use thiserror::Error;

/// Control frame sequence the reader refuses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("unexpected {0:?} control frame")]
    UnexpectedControl(ControlKind),

    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
}

/// What the driver does with a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Hand the payload to the inbound queue
    Deliver(Bytes),
    /// Write this control frame back to the peer
    Reply(ControlFrame),
    /// End the session, optionally after writing a last control frame
    Finish(Option<ControlFrame>),
    /// Nothing to do
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Socket,
    File,
}

/// Per-source Frame Streams state
#[derive(Debug)]
pub struct FrameSession {
    source: Source,
    bidirectional: bool,
    started: bool,
}

impl FrameSession {
    /// Session for a socket connection (READY/ACCEPT handshake allowed)
    pub fn socket() -> Self {
        Self {
            source: Source::Socket,
            bidirectional: false,
            started: false,
        }
    }

    /// Session for a file; STOP does not end the file
    pub fn file() -> Self {
        Self {
            source: Source::File,
            bidirectional: false,
            started: false,
        }
    }

    /// Whether a START frame has been seen
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn on_frame(&mut self, frame: Frame) -> Result<SessionAction, ProtocolViolation> {
        let control = match frame {
            Frame::Data(payload) => return Ok(SessionAction::Deliver(payload)),
            Frame::Control(control) => control,
        };

        match control.kind {
            ControlKind::Ready if self.source == Source::Socket => {
                check_content_type(&control)?;
                self.bidirectional = true;
                Ok(SessionAction::Reply(accept_frame()))
            }
            ControlKind::Start => {
                check_content_type(&control)?;
                self.started = true;
                Ok(SessionAction::Continue)
            }
            ControlKind::Stop => {
                self.started = false;
                match self.source {
                    Source::File => Ok(SessionAction::Continue),
                    Source::Socket if self.bidirectional => Ok(SessionAction::Finish(Some(
                        ControlFrame::new(ControlKind::Finish),
                    ))),
                    Source::Socket => Ok(SessionAction::Finish(None)),
                }
            }
            kind => Err(ProtocolViolation::UnexpectedControl(kind)),
        }
    }
}

fn accept_frame() -> ControlFrame {
    ControlFrame::new(ControlKind::Accept).with_content_type(Bytes::from_static(DNSTAP_CONTENT_TYPE))
}

fn check_content_type(control: &ControlFrame) -> Result<(), ProtocolViolation> {
    if control.accepts(DNSTAP_CONTENT_TYPE) {
        return Ok(());
    }
    let offered = control
        .content_types
        .iter()
        .map(|ct| String::from_utf8_lossy(ct).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    Err(ProtocolViolation::UnsupportedContentType(offered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(kind: ControlKind) -> Frame {
        Frame::Control(ControlFrame::new(kind))
    }

    #[test]
    fn test_bidirectional_handshake() {
        let mut session = FrameSession::socket();
        let ready = Frame::Control(
            ControlFrame::new(ControlKind::Ready)
                .with_content_type(Bytes::from_static(DNSTAP_CONTENT_TYPE)),
        );

        let action = session.on_frame(ready).unwrap();
        assert!(matches!(action, SessionAction::Reply(c) if c.kind == ControlKind::Accept));

        let start = Frame::Control(ControlFrame::dnstap_start());
        assert_eq!(session.on_frame(start).unwrap(), SessionAction::Continue);
        assert!(session.is_started());

        let data = Frame::Data(Bytes::from_static(b"payload"));
        assert_eq!(
            session.on_frame(data).unwrap(),
            SessionAction::Deliver(Bytes::from_static(b"payload"))
        );

        let action = session.on_frame(control(ControlKind::Stop)).unwrap();
        assert_eq!(
            action,
            SessionAction::Finish(Some(ControlFrame::new(ControlKind::Finish)))
        );
    }

    #[test]
    fn test_unidirectional_stop_ends_without_finish() {
        let mut session = FrameSession::socket();
        session.on_frame(Frame::Control(ControlFrame::dnstap_start())).unwrap();
        assert_eq!(
            session.on_frame(control(ControlKind::Stop)).unwrap(),
            SessionAction::Finish(None)
        );
    }

    #[test]
    fn test_file_continues_past_stop() {
        let mut session = FrameSession::file();
        session.on_frame(Frame::Control(ControlFrame::dnstap_start())).unwrap();
        assert_eq!(
            session.on_frame(control(ControlKind::Stop)).unwrap(),
            SessionAction::Continue
        );
        session.on_frame(Frame::Control(ControlFrame::dnstap_start())).unwrap();
        assert!(session.is_started());
    }

    #[test]
    fn test_wrong_content_type_is_rejected() {
        let mut session = FrameSession::socket();
        let start = Frame::Control(
            ControlFrame::new(ControlKind::Start).with_content_type(Bytes::from_static(b"text/plain")),
        );
        assert_eq!(
            session.on_frame(start).unwrap_err(),
            ProtocolViolation::UnsupportedContentType("text/plain".into())
        );
    }

    #[test]
    fn test_reader_side_frames_are_rejected() {
        let mut session = FrameSession::socket();
        for kind in [ControlKind::Accept, ControlKind::Finish] {
            assert_eq!(
                session.on_frame(control(kind)).unwrap_err(),
                ProtocolViolation::UnexpectedControl(kind)
            );
        }

        let mut file = FrameSession::file();
        assert!(file.on_frame(control(ControlKind::Ready)).is_err());
    }
}
