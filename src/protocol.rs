use crate::error::DebuggerError;

/// Version byte advertised in the CONFIGURATION message.
pub const PROTOCOL_VERSION: u8 = 2;

/// Subtype byte of an incoming eval transfer: evaluate the expression.
pub const EVAL_SUBTYPE_EVALUATE: u8 = 0;
/// Subtype byte of an incoming eval transfer: throw the evaluated value.
pub const EVAL_SUBTYPE_THROW: u8 = 1;

/// First byte of a streamed eval result: evaluation succeeded.
pub const EVAL_RESULT_OK: u8 = 1;
/// First byte of a streamed eval result: evaluation raised an error.
pub const EVAL_RESULT_ERROR: u8 = 2;

/// Messages the server sends. The first payload byte of every outgoing frame
/// is one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    Configuration = 1,
    ByteCodeCp = 2,
    ParseFunction = 3,
    BreakpointList = 4,
    BreakpointOffsetList = 5,
    SourceCode = 6,
    SourceCodeEnd = 7,
    SourceCodeName = 8,
    SourceCodeNameEnd = 9,
    FunctionName = 10,
    FunctionNameEnd = 11,
    WaitingAfterParse = 12,
    ReleaseByteCodeCp = 13,
    MemstatsReceive = 14,
    BreakpointHit = 15,
    ExceptionHit = 16,
    ExceptionStr = 17,
    ExceptionStrEnd = 18,
    Backtrace = 19,
    BacktraceEnd = 20,
    EvalResult = 21,
    EvalResultEnd = 22,
    WaitForSource = 23,
    OutputResult = 24,
    OutputResultEnd = 25,
}

impl ServerMessageType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Messages the client sends. Independent namespace from the server codes,
/// also starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    FreeByteCodeCp = 1,
    UpdateBreakpoint = 2,
    ExceptionConfig = 3,
    ParserConfig = 4,
    Memstats = 5,
    Stop = 6,
    ParserResume = 7,
    ClientSource = 8,
    ClientSourcePart = 9,
    NoMoreSources = 10,
    ContextReset = 11,
    Continue = 12,
    Step = 13,
    Next = 14,
    Finish = 15,
    GetBacktrace = 16,
    Eval = 17,
    EvalPart = 18,
    Throw = 19,
    ThrowPart = 20,
}

impl ClientMessageType {
    pub fn from(byte: u8) -> Result<Self, DebuggerError> {
        match byte {
            1 => Ok(ClientMessageType::FreeByteCodeCp),
            2 => Ok(ClientMessageType::UpdateBreakpoint),
            3 => Ok(ClientMessageType::ExceptionConfig),
            4 => Ok(ClientMessageType::ParserConfig),
            5 => Ok(ClientMessageType::Memstats),
            6 => Ok(ClientMessageType::Stop),
            7 => Ok(ClientMessageType::ParserResume),
            8 => Ok(ClientMessageType::ClientSource),
            9 => Ok(ClientMessageType::ClientSourcePart),
            10 => Ok(ClientMessageType::NoMoreSources),
            11 => Ok(ClientMessageType::ContextReset),
            12 => Ok(ClientMessageType::Continue),
            13 => Ok(ClientMessageType::Step),
            14 => Ok(ClientMessageType::Next),
            15 => Ok(ClientMessageType::Finish),
            16 => Ok(ClientMessageType::GetBacktrace),
            17 => Ok(ClientMessageType::Eval),
            18 => Ok(ClientMessageType::EvalPart),
            19 => Ok(ClientMessageType::Throw),
            20 => Ok(ClientMessageType::ThrowPart),
            _ => Err(DebuggerError::UnknownMessageType(byte)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// The acceptance matrix. A message arriving in a mode where this
    /// returns false is a protocol error and closes the connection.
    pub fn accepted_in(&self, mode: ExecutionMode) -> bool {
        use ClientMessageType::*;

        match self {
            // Configuration and bookkeeping messages are honored in every
            // mode, including while the engine is paused.
            FreeByteCodeCp | UpdateBreakpoint | ExceptionConfig | ParserConfig | Memstats
            | Stop => true,
            ParserResume => mode == ExecutionMode::WaitAfterParse,
            ClientSource | ClientSourcePart | NoMoreSources | ContextReset => {
                mode == ExecutionMode::ClientSource
            }
            Continue | Step | Next | Finish | GetBacktrace | Eval | EvalPart | Throw
            | ThrowPart => mode == ExecutionMode::Breakpoint,
        }
    }
}

/// Primary operating mode of a session. Auxiliary conditions (pending stop,
/// ignored breakpoints, parser wait) are independent booleans next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The engine is executing byte code; the debugger is polled at
    /// safepoints only.
    Run,
    /// Paused at a breakpoint or exception; the inspection command set is
    /// accepted.
    Breakpoint,
    /// Paused after a parse completion until the client releases it.
    WaitAfterParse,
    /// Waiting for the client to inject script source.
    ClientSource,
}

/// Severity tag prefixed to forwarded program output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputSubtype {
    Ok = 1,
    Error = 2,
    Warning = 3,
    Debug = 4,
    Trace = 5,
}
