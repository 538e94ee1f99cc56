use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

/// Close code sent by the console when the operator disconnects.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer closed without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the connection dropped without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`;
/// the lifecycle manager and the tests only ever see this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from(reason.into()),
        }))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, WsFrame::Binary(_))
    }
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

/// Render frame payload for the journal: text as-is, binary as base64.
pub fn display_payload(frame: &WsFrame) -> String {
    match frame {
        WsFrame::Binary(bytes) => STANDARD.encode(bytes),
        WsFrame::Close(Some(close)) => close.reason_lossy(),
        WsFrame::Close(None) => String::new(),
        other => frame_bytes(other)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payloads_render_as_base64() {
        let frame = WsFrame::Binary(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(display_payload(&frame), "3q2+7w==");
        assert!(frame.is_binary());
    }

    #[test]
    fn text_and_control_payloads_render_as_text() {
        assert_eq!(display_payload(&WsFrame::text("hello")), "hello");
        assert_eq!(
            display_payload(&WsFrame::Ping(Bytes::from_static(b"probe"))),
            "probe"
        );
        assert_eq!(display_payload(&WsFrame::close(1000, "bye")), "bye");
        assert_eq!(display_payload(&WsFrame::Close(None)), "");
    }
}
