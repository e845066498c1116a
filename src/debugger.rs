use crate::config::DebuggerConfig;
use crate::engine::{
    ClientSourceStatus, CompressedPointer, EvalIntent, ParsedFunction, ScriptEngine,
};
use crate::error::DebuggerError;
use crate::handshake::perform_handshake;
use crate::protocol::{
    ClientMessageType, ExecutionMode, OutputSubtype, ServerMessageType, EVAL_RESULT_ERROR,
    EVAL_RESULT_OK, EVAL_SUBTYPE_EVALUATE, EVAL_SUBTYPE_THROW, PROTOCOL_VERSION,
};
use crate::session::{Session, SourceExit, StepScope, TransferKind};
use crate::transport::{TcpTransport, Transport};
use log::{debug, error, info};
use std::thread;
use std::time::Duration;

const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The debugger endpoint of a script engine.
///
/// The engine owns one of these next to itself and drives it: `safepoint`
/// from the byte code dispatch loop, `parse_finished` from the parser,
/// `exception_thrown` from its throw path, `defer_byte_code_free` from its
/// GC. Everything client-facing happens inside those calls; there is no
/// thread of its own.
pub struct Debugger<T: Transport> {
    transport: T,
    session: Session,
    config: DebuggerConfig,
}

impl Debugger<TcpTransport> {
    /// Binds the TCP endpoint on the configured port.
    pub fn init(config: DebuggerConfig) -> Result<Self, DebuggerError> {
        let transport = TcpTransport::bind(config.port)?;
        Ok(Debugger::with_transport(transport, config))
    }
}

impl<T: Transport> Debugger<T> {
    pub fn with_transport(transport: T, config: DebuggerConfig) -> Self {
        let session = Session::new(&config);
        Debugger {
            transport,
            session,
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Blocks until a client attaches and completes the websocket upgrade.
    ///
    /// On success the CONFIGURATION message is already on the wire and a
    /// stop is pending, so the engine pauses at its first safepoint and the
    /// client gets a chance to plant breakpoints. Returns false when the
    /// handshake fails; the engine then runs undebugged.
    pub fn accept_client(&mut self) -> bool {
        match self.try_accept() {
            Ok(()) => true,
            Err(error) => {
                error!("Debugger handshake failed: {}", error);
                self.transport.close();
                false
            }
        }
    }

    fn try_accept(&mut self) -> Result<(), DebuggerError> {
        self.transport.accept()?;
        perform_handshake(
            &mut self.transport,
            self.config.handshake_timeout,
            HANDSHAKE_POLL_INTERVAL,
        )?;
        self.session.reset_for_connection();
        self.send_configuration()?;
        self.session.vm_stop = true;
        self.session.stop_scope = StepScope::Any;
        info!("Debugger session established");
        Ok(())
    }

    fn send_configuration(&mut self) -> Result<(), DebuggerError> {
        let body = [
            self.config.clamped_buffer_size() as u8,
            self.config.clamped_cpointer_size(),
            cfg!(target_endian = "little") as u8,
            PROTOCOL_VERSION,
        ];
        self.session
            .send_data(&mut self.transport, ServerMessageType::Configuration, &body)
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Requests a pause at the next safepoint, like the STOP message.
    pub fn stop(&mut self) {
        self.session.vm_stop = true;
        self.session.stop_scope = StepScope::Any;
    }

    /// Withdraws a pending stop request.
    pub fn resume(&mut self) {
        self.session.vm_stop = false;
        self.session.stop_scope = StepScope::Any;
    }

    /// Disabling makes every safepoint pass through, breakpoints included.
    /// Used by the engine while tearing down.
    pub fn stop_at_breakpoint(&mut self, enable: bool) {
        self.session.vm_ignore = !enable;
    }

    /// The exception value a completed THROW transfer left behind. The
    /// engine raises it in the frame that was paused.
    pub fn take_pending_throw(&mut self) -> Option<Vec<u8>> {
        self.session.pending_throw.take()
    }

    /// Reconfigures framing overheads and payload caps for transports with
    /// different header layouts.
    pub fn set_transmit_sizes(
        &mut self,
        send_header_size: usize,
        max_send_size: usize,
        receive_header_size: usize,
        max_receive_size: usize,
    ) {
        self.session.set_transmit_sizes(
            send_header_size,
            max_send_size,
            receive_header_size,
            max_receive_size,
        );
    }

    // -- engine driven entry points ----------------------------------------

    /// Called from the byte code dispatch loop. Polls the socket every
    /// `message_frequency` calls and pauses execution when a stop is due or
    /// an active breakpoint sits at the given location.
    pub fn safepoint(
        &mut self,
        engine: &mut dyn ScriptEngine,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) {
        if !self.session.connected {
            // Units queued for release when the connection went down still
            // have to reach the engine.
            self.flush_deferred_free(engine);
            return;
        }
        if let Err(error) = self.try_safepoint(engine, byte_code_cp, offset) {
            self.abort(engine, error);
        }
    }

    fn try_safepoint(
        &mut self,
        engine: &mut dyn ScriptEngine,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) -> Result<(), DebuggerError> {
        if self.session.message_delay > 0 {
            self.session.message_delay -= 1;
        }
        if self.session.message_delay == 0 {
            self.session.message_delay = self.config.message_frequency;
            self.poll(engine)?;
        }

        if !self.session.connected || self.session.vm_ignore {
            return Ok(());
        }

        let stop_requested = self.session.vm_stop
            && match self.session.stop_scope {
                StepScope::Any => true,
                StepScope::SameOrShallower(depth) => engine.call_depth() <= depth,
                StepScope::Shallower(depth) => engine.call_depth() < depth,
            };

        if stop_requested || engine.has_active_breakpoint(byte_code_cp, offset) {
            self.enter_breakpoint(engine, ServerMessageType::BreakpointHit, byte_code_cp, offset)?;
        }
        Ok(())
    }

    /// Called when the engine is about to propagate a thrown value. Streams
    /// the exception text and pauses exactly like a breakpoint hit, unless
    /// exception stops are configured off.
    pub fn exception_thrown(
        &mut self,
        engine: &mut dyn ScriptEngine,
        byte_code_cp: CompressedPointer,
        offset: u32,
        message: &[u8],
    ) {
        if !self.session.connected || self.session.vm_ignore || self.session.vm_ignore_exception {
            return;
        }
        if let Err(error) = self.try_exception(engine, byte_code_cp, offset, message) {
            self.abort(engine, error);
        }
    }

    fn try_exception(
        &mut self,
        engine: &mut dyn ScriptEngine,
        byte_code_cp: CompressedPointer,
        offset: u32,
        message: &[u8],
    ) -> Result<(), DebuggerError> {
        self.session.send_string(
            &mut self.transport,
            ServerMessageType::ExceptionStr,
            ServerMessageType::ExceptionStrEnd,
            message,
        )?;
        self.enter_breakpoint(engine, ServerMessageType::ExceptionHit, byte_code_cp, offset)
    }

    /// Called when the parser finished a function. Streams the source, the
    /// names, the position and the breakpoint tables, then the unit pointer.
    /// With wait-after-parse configured, blocks until the client resumes.
    pub fn parse_finished(&mut self, engine: &mut dyn ScriptEngine, function: &ParsedFunction<'_>) {
        if !self.session.connected {
            return;
        }
        if let Err(error) = self.try_parse_finished(engine, function) {
            self.abort(engine, error);
        }
    }

    fn try_parse_finished(
        &mut self,
        engine: &mut dyn ScriptEngine,
        function: &ParsedFunction<'_>,
    ) -> Result<(), DebuggerError> {
        self.session.send_string(
            &mut self.transport,
            ServerMessageType::SourceCode,
            ServerMessageType::SourceCodeEnd,
            function.source,
        )?;
        self.session.send_string(
            &mut self.transport,
            ServerMessageType::SourceCodeName,
            ServerMessageType::SourceCodeNameEnd,
            function.source_name,
        )?;
        self.session.send_string(
            &mut self.transport,
            ServerMessageType::FunctionName,
            ServerMessageType::FunctionNameEnd,
            function.function_name,
        )?;
        self.session
            .send_parse_function(&mut self.transport, function.line, function.column)?;
        self.session.send_u32_list(
            &mut self.transport,
            ServerMessageType::BreakpointList,
            function.breakpoint_lines,
        )?;
        self.session.send_u32_list(
            &mut self.transport,
            ServerMessageType::BreakpointOffsetList,
            function.breakpoint_offsets,
        )?;
        self.session.send_function_cp(
            &mut self.transport,
            ServerMessageType::ByteCodeCp,
            function.byte_code_cp,
        )?;

        if self.session.parser_wait {
            self.session
                .send_type(&mut self.transport, ServerMessageType::WaitingAfterParse)?;
            self.session.mode = ExecutionMode::WaitAfterParse;
            self.poll_while(engine, ExecutionMode::WaitAfterParse)?;
        }
        Ok(())
    }

    /// Hands a byte code unit over for deferred release. The client may
    /// still hold its pointer, so the unit is parked until the matching
    /// FREE_BYTE_CODE_CP acknowledgement arrives. Returns false when no
    /// client is attached and the caller should release the unit itself.
    pub fn defer_byte_code_free(
        &mut self,
        engine: &mut dyn ScriptEngine,
        byte_code_cp: CompressedPointer,
    ) -> bool {
        if !self.session.connected {
            return false;
        }

        self.session.byte_code_free.push_back(byte_code_cp);
        if let Err(error) = self.session.send_function_cp(
            &mut self.transport,
            ServerMessageType::ReleaseByteCodeCp,
            byte_code_cp,
        ) {
            // abort flushes the queue through the engine, the unit included.
            self.abort(engine, error);
        }
        true
    }

    /// Asks the client for a script source to run and blocks until one
    /// arrives, the client declines, or a context reset is requested. A
    /// received source is handed to `on_source` as `(name, source)`.
    pub fn wait_for_client_source<F>(
        &mut self,
        engine: &mut dyn ScriptEngine,
        mut on_source: F,
    ) -> ClientSourceStatus
    where
        F: FnMut(&[u8], &[u8]),
    {
        if !self.session.connected {
            return ClientSourceStatus::Failed;
        }
        if let Err(error) = self.try_wait_for_client_source(engine) {
            self.abort(engine, error);
            return ClientSourceStatus::Failed;
        }

        match self.session.source_exit.take() {
            Some(SourceExit::Received { name, source }) => {
                on_source(&name, &source);
                ClientSourceStatus::Received
            }
            Some(SourceExit::End) => ClientSourceStatus::End,
            Some(SourceExit::Reset) => ClientSourceStatus::Reset,
            None => ClientSourceStatus::Failed,
        }
    }

    fn try_wait_for_client_source(
        &mut self,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), DebuggerError> {
        self.session.source_exit = None;
        self.session.mode = ExecutionMode::ClientSource;
        self.session
            .send_type(&mut self.transport, ServerMessageType::WaitForSource)?;
        self.poll_while(engine, ExecutionMode::ClientSource)
    }

    /// Forwards program output to the client, tagged with its severity.
    pub fn send_output(&mut self, bytes: &[u8], subtype: OutputSubtype) {
        if !self.session.connected {
            return;
        }

        let mut stream = Vec::with_capacity(bytes.len() + 1);
        stream.push(subtype as u8);
        stream.extend_from_slice(bytes);
        if let Err(error) = self.session.send_string(
            &mut self.transport,
            ServerMessageType::OutputResult,
            ServerMessageType::OutputResultEnd,
            &stream,
        ) {
            // No engine reference here; the deferred free queue drains at
            // the next safepoint.
            self.abort_detached(error);
        }
    }

    // -- polling -----------------------------------------------------------

    /// One nonblocking poll: read whatever the socket has, then decode and
    /// dispatch every complete frame. A message is fully handled, replies
    /// included, before the next frame is looked at.
    fn poll(&mut self, engine: &mut dyn ScriptEngine) -> Result<(), DebuggerError> {
        loop {
            let read = {
                let free = self.session.receive_slice();
                if free.is_empty() {
                    0
                } else {
                    self.transport.receive(free)?
                }
            };
            self.session.advance_receive(read);

            while let Some((total, payload)) = self.session.completed_frame()? {
                self.session.consume(total);
                self.dispatch_message(engine, &payload)?;
            }

            if read == 0 {
                return Ok(());
            }
        }
    }

    /// Blocking poll used while paused: keeps polling with the configured
    /// sleep between attempts until a handled command leaves `mode`.
    fn poll_while(
        &mut self,
        engine: &mut dyn ScriptEngine,
        mode: ExecutionMode,
    ) -> Result<(), DebuggerError> {
        loop {
            if !self.session.connected || self.session.mode != mode {
                return Ok(());
            }
            self.poll(engine)?;
            if !self.session.connected || self.session.mode != mode {
                return Ok(());
            }
            thread::sleep(self.config.sleep_interval);
        }
    }

    fn enter_breakpoint(
        &mut self,
        engine: &mut dyn ScriptEngine,
        hit_type: ServerMessageType,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) -> Result<(), DebuggerError> {
        self.session.vm_stop = false;
        self.session.stop_scope = StepScope::Any;
        self.session.mode = ExecutionMode::Breakpoint;
        self.session.stop_context = engine.call_depth();

        self.session
            .send_hit_location(&mut self.transport, hit_type, byte_code_cp, offset)?;
        debug!(
            "Execution paused at byte code {} offset {}",
            byte_code_cp, offset
        );
        self.poll_while(engine, ExecutionMode::Breakpoint)
    }

    // -- dispatch ----------------------------------------------------------

    fn dispatch_message(
        &mut self,
        engine: &mut dyn ScriptEngine,
        payload: &[u8],
    ) -> Result<(), DebuggerError> {
        let (&type_byte, body) = payload
            .split_first()
            .ok_or(DebuggerError::MissingMessageType)?;
        let message_type = ClientMessageType::from(type_byte)?;

        if !message_type.accepted_in(self.session.mode) {
            return Err(DebuggerError::UnexpectedMessage {
                message_type,
                mode: self.session.mode,
            });
        }

        let malformed = || DebuggerError::MalformedMessage(message_type);

        match message_type {
            ClientMessageType::FreeByteCodeCp => {
                let (byte_code_cp, cp_size) = self.read_cp(body).ok_or_else(malformed)?;
                if body.len() != cp_size {
                    return Err(malformed());
                }
                // Releases must come back in the order they were announced.
                match self.session.byte_code_free.front() {
                    Some(&head) if head == byte_code_cp => {
                        self.session.byte_code_free.pop_front();
                        engine.free_byte_code(byte_code_cp);
                        Ok(())
                    }
                    _ => Err(DebuggerError::FreeOrderMismatch),
                }
            }
            ClientMessageType::UpdateBreakpoint => {
                let (&enable, rest) = body.split_first().ok_or_else(malformed)?;
                let (byte_code_cp, cp_size) = self.read_cp(rest).ok_or_else(malformed)?;
                let offset = read_u32(&rest[cp_size..]).ok_or_else(malformed)?;
                if rest.len() != cp_size + 4 {
                    return Err(malformed());
                }
                if !engine.update_breakpoint(enable != 0, byte_code_cp, offset) {
                    return Err(DebuggerError::UnknownBreakpointLocation);
                }
                Ok(())
            }
            ClientMessageType::ExceptionConfig => {
                let &enable = body.first().ok_or_else(malformed)?;
                self.session.vm_ignore_exception = enable == 0;
                Ok(())
            }
            ClientMessageType::ParserConfig => {
                let &enable = body.first().ok_or_else(malformed)?;
                self.session.parser_wait = enable != 0;
                Ok(())
            }
            ClientMessageType::Memstats => {
                let stats = engine.memory_stats();
                self.session.send_memstats(&mut self.transport, &stats)
            }
            ClientMessageType::Stop => {
                self.session.vm_stop = true;
                self.session.stop_scope = StepScope::Any;
                Ok(())
            }
            ClientMessageType::ParserResume => {
                self.session.mode = ExecutionMode::Run;
                Ok(())
            }
            ClientMessageType::ClientSource => {
                let total_size = read_u32(body).ok_or_else(malformed)?;
                let complete = self.session.begin_transfer(
                    TransferKind::ClientSource,
                    total_size,
                    &body[4..],
                    self.config.max_transfer_size,
                )?;
                if complete {
                    self.finish_client_source()?;
                }
                Ok(())
            }
            ClientMessageType::ClientSourcePart => {
                if self
                    .session
                    .continue_transfer(TransferKind::ClientSource, body)?
                {
                    self.finish_client_source()?;
                }
                Ok(())
            }
            ClientMessageType::NoMoreSources => {
                self.session.source_exit = Some(SourceExit::End);
                self.session.mode = ExecutionMode::Run;
                Ok(())
            }
            ClientMessageType::ContextReset => {
                self.session.source_exit = Some(SourceExit::Reset);
                self.session.mode = ExecutionMode::Run;
                Ok(())
            }
            ClientMessageType::Continue => {
                self.session.mode = ExecutionMode::Run;
                self.session.vm_stop = false;
                self.session.stop_scope = StepScope::Any;
                Ok(())
            }
            ClientMessageType::Step => {
                self.session.mode = ExecutionMode::Run;
                self.session.vm_stop = true;
                self.session.stop_scope = StepScope::Any;
                Ok(())
            }
            ClientMessageType::Next => {
                self.session.mode = ExecutionMode::Run;
                self.session.vm_stop = true;
                self.session.stop_scope = StepScope::SameOrShallower(self.session.stop_context);
                Ok(())
            }
            ClientMessageType::Finish => {
                self.session.mode = ExecutionMode::Run;
                self.session.vm_stop = true;
                self.session.stop_scope = StepScope::Shallower(self.session.stop_context);
                Ok(())
            }
            ClientMessageType::GetBacktrace => {
                let max_depth = read_u32(body).ok_or_else(malformed)?;
                let frames = engine.backtrace(max_depth);
                self.session.send_backtrace(&mut self.transport, &frames)
            }
            ClientMessageType::Eval => {
                let total_size = read_u32(body).ok_or_else(malformed)?;
                let complete = self.session.begin_transfer(
                    TransferKind::Eval,
                    total_size,
                    &body[4..],
                    self.config.max_transfer_size,
                )?;
                if complete {
                    self.finish_eval(engine)?;
                }
                Ok(())
            }
            ClientMessageType::EvalPart => {
                if self.session.continue_transfer(TransferKind::Eval, body)? {
                    self.finish_eval(engine)?;
                }
                Ok(())
            }
            ClientMessageType::Throw => {
                let total_size = read_u32(body).ok_or_else(malformed)?;
                let complete = self.session.begin_transfer(
                    TransferKind::Throw,
                    total_size,
                    &body[4..],
                    self.config.max_transfer_size,
                )?;
                if complete {
                    self.finish_throw();
                }
                Ok(())
            }
            ClientMessageType::ThrowPart => {
                if self.session.continue_transfer(TransferKind::Throw, body)? {
                    self.finish_throw();
                }
                Ok(())
            }
        }
    }

    fn finish_client_source(&mut self) -> Result<(), DebuggerError> {
        let transfer = self
            .session
            .take_transfer()
            .ok_or(DebuggerError::NoTransferInProgress)?;

        let bytes: &[u8] = &transfer.data;
        let (&name_len, rest) = bytes
            .split_first()
            .ok_or(DebuggerError::MalformedMessage(
                ClientMessageType::ClientSource,
            ))?;
        if rest.len() < name_len as usize {
            return Err(DebuggerError::MalformedMessage(
                ClientMessageType::ClientSource,
            ));
        }
        let (name, source) = rest.split_at(name_len as usize);

        self.session.source_exit = Some(SourceExit::Received {
            name: name.to_vec(),
            source: source.to_vec(),
        });
        self.session.mode = ExecutionMode::Run;
        Ok(())
    }

    fn finish_eval(&mut self, engine: &mut dyn ScriptEngine) -> Result<(), DebuggerError> {
        let transfer = self
            .session
            .take_transfer()
            .ok_or(DebuggerError::NoTransferInProgress)?;

        let bytes: &[u8] = &transfer.data;
        let (&subtype, expression) = bytes
            .split_first()
            .ok_or(DebuggerError::MalformedMessage(ClientMessageType::Eval))?;
        let intent = match subtype {
            EVAL_SUBTYPE_EVALUATE => EvalIntent::Evaluate,
            EVAL_SUBTYPE_THROW => EvalIntent::Throw,
            _ => return Err(DebuggerError::MalformedMessage(ClientMessageType::Eval)),
        };

        let (result_tag, text) = match engine.eval(expression, intent) {
            Ok(value) => (EVAL_RESULT_OK, value),
            Err(message) => (EVAL_RESULT_ERROR, message),
        };

        let mut stream = Vec::with_capacity(text.len() + 1);
        stream.push(result_tag);
        stream.extend_from_slice(&text);
        self.session.send_string(
            &mut self.transport,
            ServerMessageType::EvalResult,
            ServerMessageType::EvalResultEnd,
            &stream,
        )
    }

    fn finish_throw(&mut self) {
        if let Some(transfer) = self.session.take_transfer() {
            self.session.pending_throw = Some(transfer.data.to_vec());
            // Resume; the engine raises the injected value in the frame
            // that was paused.
            self.session.mode = ExecutionMode::Run;
            self.session.vm_stop = false;
            self.session.stop_scope = StepScope::Any;
        }
    }

    // -- teardown ----------------------------------------------------------

    fn abort(&mut self, engine: &mut dyn ScriptEngine, error: DebuggerError) {
        self.abort_detached(error);
        self.flush_deferred_free(engine);
    }

    fn abort_detached(&mut self, error: DebuggerError) {
        match error {
            DebuggerError::ConnectionClosed => info!("Debugger client disconnected"),
            error => error!("Debugger connection aborted: {}", error),
        }
        self.transport.close();
        self.session.reset_after_disconnect();
    }

    fn flush_deferred_free(&mut self, engine: &mut dyn ScriptEngine) {
        while let Some(byte_code_cp) = self.session.byte_code_free.pop_front() {
            engine.free_byte_code(byte_code_cp);
        }
    }

    fn read_cp(&self, bytes: &[u8]) -> Option<(CompressedPointer, usize)> {
        if self.session.cp_size() == 2 {
            bytes
                .get(..2)
                .map(|b| (u16::from_ne_bytes([b[0], b[1]]) as u32, 2))
        } else {
            bytes
                .get(..4)
                .map(|b| (u32::from_ne_bytes([b[0], b[1], b[2], b[3]]), 4))
        }
    }
}

fn read_u32(bytes: &[u8]) -> Option<u32> {
    bytes
        .get(..4)
        .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}
