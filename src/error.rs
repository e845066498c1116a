use crate::protocol::{ClientMessageType, ExecutionMode};
use httparse::Error as HttpParseError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebuggerError {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("Debugger client disconnected")]
    ConnectionClosed,

    // Handshake Errors
    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Handshake request is not an upgrade GET for the debugger endpoint")]
    InvalidHandshakeRequest,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Handshake request exceeds the request buffer limit")]
    HandshakeBufferOverflow,

    #[error("Timed out waiting for the handshake request")]
    HandshakeTimeout,

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Fragmented frames are not supported")]
    FragmentedFrame,

    #[error("Unmasked frame received from the client")]
    UnmaskedFrame,

    #[error("Unsupported Websocket opcode: {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("Frame payload of {0} bytes exceeds the receive buffer")]
    PayloadTooLarge(usize),

    // Protocol Errors
    #[error("Received frame carries no message type byte")]
    MissingMessageType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Message type {message_type:?} is not accepted in {mode:?} mode")]
    UnexpectedMessage {
        message_type: ClientMessageType,
        mode: ExecutionMode,
    },

    #[error("Malformed {0:?} message body")]
    MalformedMessage(ClientMessageType),

    // Transfer Errors
    #[error("Incoming transfer started while another one is in progress")]
    TransferInProgress,

    #[error("No matching transfer in progress for a continuation message")]
    NoTransferInProgress,

    #[error("Incoming transfer of {0} bytes exceeds the configured limit")]
    TransferTooLarge(u32),

    #[error("Incoming transfer received more bytes than announced")]
    TransferOverflow,

    // Dispatcher Errors
    #[error("No breakpoint record for the requested byte code location")]
    UnknownBreakpointLocation,

    #[error("Byte code release acknowledged out of order")]
    FreeOrderMismatch,
}
