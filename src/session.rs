use crate::config::DebuggerConfig;
use crate::engine::{BacktraceFrame, CompressedPointer, MemoryStats};
use crate::error::DebuggerError;
use crate::frame::{
    apply_mask, decode_frame_header, encode_frame_header, OpCode, MASK_SIZE,
    MAX_SINGLE_BYTE_LENGTH, WEBSOCKET_HEADER_SIZE,
};
use crate::protocol::{ExecutionMode, ServerMessageType};
use crate::transport::Transport;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;

/// Physical size of the fixed session buffers. The live size is configured
/// per session and never exceeds this.
pub(crate) const MAX_BUFFER_SIZE: usize = 256;

/// Depth constraint a pending stop is scoped to. `Any` stops at the next
/// safepoint; the other two implement step-over and step-out against the
/// frame depth recorded when the step command arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepScope {
    Any,
    SameOrShallower(usize),
    Shallower(usize),
}

/// Which long inbound transfer is being assembled. A continuation message of
/// one kind during a transfer of another is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferKind {
    ClientSource,
    Eval,
    Throw,
}

pub(crate) struct IncomingTransfer {
    pub kind: TransferKind,
    pub total_size: usize,
    pub data: BytesMut,
}

/// How the client-source wait loop ended.
pub(crate) enum SourceExit {
    Received { name: Vec<u8>, source: Vec<u8> },
    End,
    Reset,
}

/// All per-connection state. One instance lives for one accepted client.
pub(crate) struct Session {
    pub mode: ExecutionMode,
    pub connected: bool,
    /// The next safepoint satisfying `stop_scope` must pause.
    pub vm_stop: bool,
    pub stop_scope: StepScope,
    /// Suppress all pauses; set while draining after a disconnect.
    pub vm_ignore: bool,
    /// Exceptions do not pause when set.
    pub vm_ignore_exception: bool,
    /// Pause after each parse completion until the client releases it.
    pub parser_wait: bool,
    /// Call depth recorded on the last pause, scopes next/finish stepping.
    pub stop_context: usize,
    /// Client-requested exception value, picked up by the engine on resume.
    pub pending_throw: Option<Vec<u8>>,
    pub source_exit: Option<SourceExit>,
    /// Countdown of byte code dispatches until the next socket poll.
    pub message_delay: u32,
    pub transfer: Option<IncomingTransfer>,
    /// Byte code units awaiting the client's free acknowledgement, in
    /// emission order.
    pub byte_code_free: VecDeque<CompressedPointer>,
    /// Wire width of a compressed pointer. Always 2 or 4; everything that
    /// writes, reads or sizes pointer fields consults this value.
    pub cpointer_size: u8,

    send_buf: [u8; MAX_BUFFER_SIZE],
    recv_buf: [u8; MAX_BUFFER_SIZE],
    pub recv_offset: usize,
    max_send_payload: usize,
    max_receive_payload: usize,
}

impl Session {
    pub fn new(config: &DebuggerConfig) -> Self {
        let buffer_size = config.clamped_buffer_size();
        Session {
            mode: ExecutionMode::Run,
            connected: false,
            vm_stop: false,
            stop_scope: StepScope::Any,
            vm_ignore: false,
            vm_ignore_exception: false,
            parser_wait: false,
            stop_context: 0,
            pending_throw: None,
            source_exit: None,
            message_delay: 0,
            transfer: None,
            byte_code_free: VecDeque::new(),
            cpointer_size: config.clamped_cpointer_size(),
            send_buf: [0; MAX_BUFFER_SIZE],
            recv_buf: [0; MAX_BUFFER_SIZE],
            recv_offset: 0,
            max_send_payload: (buffer_size - WEBSOCKET_HEADER_SIZE).min(MAX_SINGLE_BYTE_LENGTH),
            max_receive_payload: (buffer_size - WEBSOCKET_HEADER_SIZE - MASK_SIZE)
                .min(MAX_SINGLE_BYTE_LENGTH),
        }
    }

    /// Overrides the framing overheads and payload caps, for transports
    /// whose headers differ from the stock websocket ones.
    ///
    /// Header sizes beyond the physical buffer clamp the caps instead of
    /// underflowing. The send cap never drops below the type byte plus one
    /// data byte, so fragmented streams always make progress; the receive
    /// cap never drops below the type byte.
    pub fn set_transmit_sizes(
        &mut self,
        send_header_size: usize,
        max_send_size: usize,
        receive_header_size: usize,
        max_receive_size: usize,
    ) {
        self.max_send_payload = max_send_size
            .min(MAX_SINGLE_BYTE_LENGTH)
            .min(MAX_BUFFER_SIZE.saturating_sub(send_header_size))
            .max(2);
        self.max_receive_payload = max_receive_size
            .min(MAX_SINGLE_BYTE_LENGTH)
            .min(MAX_BUFFER_SIZE.saturating_sub(receive_header_size))
            .max(1);
    }

    pub fn reset_for_connection(&mut self) {
        self.connected = true;
        self.mode = ExecutionMode::Run;
        self.vm_stop = false;
        self.stop_scope = StepScope::Any;
        self.vm_ignore = false;
        self.vm_ignore_exception = false;
        self.parser_wait = false;
        self.stop_context = 0;
        self.pending_throw = None;
        self.source_exit = None;
        self.message_delay = 0;
        self.transfer = None;
        self.recv_offset = 0;
    }

    /// Clears every mode flag and switches the engine to blind execution.
    /// The deferred free queue is left alone; the dispatcher flushes it
    /// through the engine.
    pub fn reset_after_disconnect(&mut self) {
        self.connected = false;
        self.mode = ExecutionMode::Run;
        self.vm_stop = false;
        self.stop_scope = StepScope::Any;
        self.vm_ignore = true;
        self.parser_wait = false;
        self.transfer = None;
        self.source_exit = None;
        self.recv_offset = 0;
    }

    // -- egress ------------------------------------------------------------

    fn send_frame(
        &mut self,
        transport: &mut dyn Transport,
        payload_len: usize,
    ) -> Result<(), DebuggerError> {
        encode_frame_header(&mut self.send_buf, payload_len);
        transport.send(&self.send_buf[..WEBSOCKET_HEADER_SIZE + payload_len])
    }

    /// Zero-body control message.
    pub fn send_type(
        &mut self,
        transport: &mut dyn Transport,
        message_type: ServerMessageType,
    ) -> Result<(), DebuggerError> {
        self.send_data(transport, message_type, &[])
    }

    /// One message that fits a single frame.
    pub fn send_data(
        &mut self,
        transport: &mut dyn Transport,
        message_type: ServerMessageType,
        body: &[u8],
    ) -> Result<(), DebuggerError> {
        debug_assert!(1 + body.len() <= self.max_send_payload);
        self.send_buf[WEBSOCKET_HEADER_SIZE] = message_type.as_u8();
        self.send_buf[WEBSOCKET_HEADER_SIZE + 1..WEBSOCKET_HEADER_SIZE + 1 + body.len()]
            .copy_from_slice(body);
        self.send_frame(transport, 1 + body.len())
    }

    /// Streams an arbitrarily long byte sequence: every chunk but the last
    /// goes out under `continuation_type`, the final (possibly empty) chunk
    /// under `end_type`.
    pub fn send_string(
        &mut self,
        transport: &mut dyn Transport,
        continuation_type: ServerMessageType,
        end_type: ServerMessageType,
        bytes: &[u8],
    ) -> Result<(), DebuggerError> {
        let chunk_size = self.max_send_payload - 1;

        let mut remaining = bytes;
        while remaining.len() > chunk_size {
            let (head, tail) = remaining.split_at(chunk_size);
            self.send_data(transport, continuation_type, head)?;
            remaining = tail;
        }
        self.send_data(transport, end_type, remaining)
    }

    /// Message whose whole body is one compressed pointer.
    pub fn send_function_cp(
        &mut self,
        transport: &mut dyn Transport,
        message_type: ServerMessageType,
        byte_code_cp: CompressedPointer,
    ) -> Result<(), DebuggerError> {
        let mut body = BytesMut::with_capacity(4);
        self.put_cp(&mut body, byte_code_cp);
        self.send_data(transport, message_type, &body)
    }

    /// Position of a parsed function: two native-order 32-bit integers.
    pub fn send_parse_function(
        &mut self,
        transport: &mut dyn Transport,
        line: u32,
        column: u32,
    ) -> Result<(), DebuggerError> {
        let mut body = BytesMut::with_capacity(8);
        body.put_u32_ne(line);
        body.put_u32_ne(column);
        self.send_data(transport, ServerMessageType::ParseFunction, &body)
    }

    /// Breakpoint hit and exception hit share the `(pointer, offset)` body.
    pub fn send_hit_location(
        &mut self,
        transport: &mut dyn Transport,
        message_type: ServerMessageType,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) -> Result<(), DebuggerError> {
        let mut body = BytesMut::with_capacity(8);
        self.put_cp(&mut body, byte_code_cp);
        body.put_u32_ne(offset);
        self.send_data(transport, message_type, &body)
    }

    /// Streams a list of 32-bit words, whole words per frame, no end marker.
    pub fn send_u32_list(
        &mut self,
        transport: &mut dyn Transport,
        message_type: ServerMessageType,
        values: &[u32],
    ) -> Result<(), DebuggerError> {
        let per_frame = (self.max_send_payload - 1) / 4;
        for chunk in values.chunks(per_frame) {
            let mut body = BytesMut::with_capacity(chunk.len() * 4);
            for value in chunk {
                body.put_u32_ne(*value);
            }
            self.send_data(transport, message_type, &body)?;
        }
        Ok(())
    }

    /// Streams backtrace entries, whole entries per frame, the final
    /// (possibly empty) batch under BACKTRACE_END.
    pub fn send_backtrace(
        &mut self,
        transport: &mut dyn Transport,
        frames: &[BacktraceFrame],
    ) -> Result<(), DebuggerError> {
        if frames.is_empty() {
            return self.send_type(transport, ServerMessageType::BacktraceEnd);
        }

        let entry_size = self.cp_size() + 4;
        let per_frame = ((self.max_send_payload - 1) / entry_size).max(1);

        let mut batches = frames.chunks(per_frame).peekable();
        while let Some(batch) = batches.next() {
            let mut body = BytesMut::with_capacity(batch.len() * entry_size);
            for entry in batch {
                self.put_cp(&mut body, entry.byte_code_cp);
                body.put_u32_ne(entry.offset);
            }
            let message_type = if batches.peek().is_some() {
                ServerMessageType::Backtrace
            } else {
                ServerMessageType::BacktraceEnd
            };
            self.send_data(transport, message_type, &body)?;
        }
        Ok(())
    }

    /// Five native-order counters in reply to MEMSTATS.
    pub fn send_memstats(
        &mut self,
        transport: &mut dyn Transport,
        stats: &MemoryStats,
    ) -> Result<(), DebuggerError> {
        let mut body = BytesMut::with_capacity(20);
        body.put_u32_ne(stats.allocated_bytes);
        body.put_u32_ne(stats.byte_code_bytes);
        body.put_u32_ne(stats.string_bytes);
        body.put_u32_ne(stats.object_bytes);
        body.put_u32_ne(stats.property_bytes);
        self.send_data(transport, ServerMessageType::MemstatsReceive, &body)
    }

    /// Bytes one compressed pointer occupies on the wire, matching what
    /// `put_cp` writes.
    pub fn cp_size(&self) -> usize {
        if self.cpointer_size == 2 {
            2
        } else {
            4
        }
    }

    fn put_cp(&self, body: &mut BytesMut, byte_code_cp: CompressedPointer) {
        if self.cp_size() == 2 {
            body.put_u16_ne(byte_code_cp as u16);
        } else {
            body.put_u32_ne(byte_code_cp);
        }
    }

    // -- ingress -----------------------------------------------------------

    /// Free space of the receive buffer, for the next transport read.
    pub fn receive_slice(&mut self) -> &mut [u8] {
        &mut self.recv_buf[self.recv_offset..]
    }

    pub fn advance_receive(&mut self, read: usize) {
        self.recv_offset += read;
        debug_assert!(self.recv_offset <= MAX_BUFFER_SIZE);
    }

    /// Returns the next complete, unmasked frame payload and its total wire
    /// size, or `None` while the frame is still partial. Header validation
    /// happens as soon as the two header bytes are in, so malformed frames
    /// fail before their payload arrives.
    pub fn completed_frame(&mut self) -> Result<Option<(usize, Vec<u8>)>, DebuggerError> {
        if self.recv_offset < WEBSOCKET_HEADER_SIZE {
            return Ok(None);
        }

        let header =
            decode_frame_header(self.recv_buf[0], self.recv_buf[1], self.max_receive_payload)?;

        let total = WEBSOCKET_HEADER_SIZE + MASK_SIZE + header.payload_len;
        if self.recv_offset < total {
            return Ok(None);
        }

        match header.opcode {
            OpCode::Binary => {}
            OpCode::Close => return Err(DebuggerError::ConnectionClosed),
            // Recognized but not part of this dialect.
            OpCode::Ping | OpCode::Pong => {
                return Err(DebuggerError::UnsupportedOpcode(header.opcode.as_u8()))
            }
        }

        let mask = [
            self.recv_buf[2],
            self.recv_buf[3],
            self.recv_buf[4],
            self.recv_buf[5],
        ];
        let mut payload = self.recv_buf[WEBSOCKET_HEADER_SIZE + MASK_SIZE..total].to_vec();
        apply_mask(mask, &mut payload);

        Ok(Some((total, payload)))
    }

    /// Drops a handled frame and compacts the remainder to the buffer start.
    pub fn consume(&mut self, total: usize) {
        self.recv_buf.copy_within(total..self.recv_offset, 0);
        self.recv_offset -= total;
    }

    // -- inbound transfers -------------------------------------------------

    /// Starts assembling a long inbound message. Returns true when the first
    /// slice already completes it.
    pub fn begin_transfer(
        &mut self,
        kind: TransferKind,
        total_size: u32,
        first: &[u8],
        limit: u32,
    ) -> Result<bool, DebuggerError> {
        if self.transfer.is_some() {
            return Err(DebuggerError::TransferInProgress);
        }
        if total_size > limit {
            return Err(DebuggerError::TransferTooLarge(total_size));
        }
        if first.len() > total_size as usize {
            return Err(DebuggerError::TransferOverflow);
        }

        let mut data = BytesMut::with_capacity(total_size as usize);
        data.extend_from_slice(first);
        let complete = data.len() == total_size as usize;
        self.transfer = Some(IncomingTransfer {
            kind,
            total_size: total_size as usize,
            data,
        });
        Ok(complete)
    }

    /// Appends a continuation slice. Returns true once the transfer is
    /// complete.
    pub fn continue_transfer(
        &mut self,
        kind: TransferKind,
        part: &[u8],
    ) -> Result<bool, DebuggerError> {
        let transfer = self
            .transfer
            .as_mut()
            .ok_or(DebuggerError::NoTransferInProgress)?;
        if transfer.kind != kind {
            return Err(DebuggerError::NoTransferInProgress);
        }
        if transfer.data.len() + part.len() > transfer.total_size {
            return Err(DebuggerError::TransferOverflow);
        }

        transfer.data.extend_from_slice(part);
        Ok(transfer.data.len() == transfer.total_size)
    }

    pub fn take_transfer(&mut self) -> Option<IncomingTransfer> {
        self.transfer.take()
    }
}
