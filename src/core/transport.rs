//! Outbound transport capability and close classification
//!
//! The hub never touches the WebSocket wire format itself. Everything it
//! needs from the transport on the write side is captured by [`FrameSink`],
//! and everything it needs to know about a failed read is reduced to a
//! [`CloseKind`] tag by the classification functions here.

use super::error::{CloseKind, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::SinkExt;
use futures::stream::SplitSink;
use std::io::ErrorKind;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;

/// Write half of a connection
///
/// Implementations are never called concurrently: every call is made while
/// holding the owning entry's write lock.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the underlying socket
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

/// Classify a close frame sent by the peer
///
/// Normal closure, going away and "no status" are routine; any other code
/// is logged as unexpected.
pub fn classify_close_frame(frame: Option<&CloseFrame>) -> CloseKind {
    match frame {
        None => CloseKind::Expected,
        Some(frame) => match frame.code {
            close_code::NORMAL | close_code::AWAY | close_code::STATUS => CloseKind::Expected,
            _ => CloseKind::Unexpected,
        },
    }
}

/// Classify a read error
///
/// An abrupt network close anywhere in the source chain counts as
/// expected: an io reset/abort/broken pipe/truncated stream, or the
/// WebSocket layer reporting the peer vanished without a close handshake.
pub fn classify_read_error(err: &(dyn std::error::Error + 'static)) -> CloseKind {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            )
        {
            return CloseKind::Expected;
        }
        if let Some(ws) = e.downcast_ref::<WsError>()
            && matches!(
                ws,
                WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            )
        {
            return CloseKind::Expected;
        }
        current = e.source();
    }
    CloseKind::Unexpected
}
