/// Stable identifier of a compiled byte code unit. The engine hands these
/// out and dereferences them; the debugger only transports and compares
/// them. On the wire they occupy two or four bytes, as advertised in the
/// CONFIGURATION message.
pub type CompressedPointer = u32;

/// One entry of a collected backtrace, innermost frame first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktraceFrame {
    pub byte_code_cp: CompressedPointer,
    pub offset: u32,
}

/// Memory counters reported in response to a MEMSTATS request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub allocated_bytes: u32,
    pub byte_code_bytes: u32,
    pub string_bytes: u32,
    pub object_bytes: u32,
    pub property_bytes: u32,
}

/// What the client asked to happen with a completed eval transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalIntent {
    /// Evaluate the expression and report its result.
    Evaluate,
    /// Evaluate the expression and throw the resulting value.
    Throw,
}

/// Outcome of [`crate::Debugger::wait_for_client_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSourceStatus {
    /// A source was received and handed to the callback.
    Received,
    /// The client has no more sources to run.
    End,
    /// The client requested a full engine context reset.
    Reset,
    /// The connection was lost while waiting.
    Failed,
}

/// Everything the debugger reports about one freshly parsed function.
#[derive(Debug, Clone, Copy)]
pub struct ParsedFunction<'a> {
    pub source: &'a [u8],
    pub source_name: &'a [u8],
    pub function_name: &'a [u8],
    pub line: u32,
    pub column: u32,
    /// Line numbers that carry a possible breakpoint.
    pub breakpoint_lines: &'a [u32],
    /// Byte code offsets matching `breakpoint_lines`, index for index.
    pub breakpoint_offsets: &'a [u32],
    pub byte_code_cp: CompressedPointer,
}

/// The script engine as the debugger sees it.
///
/// The engine drives the debugger (safepoints, parse notifications,
/// exceptions); this trait is the narrow channel back. Implementations never
/// call into the debugger from these methods, they only answer, which keeps
/// the whole arrangement free of reentrancy.
pub trait ScriptEngine {
    /// Toggles the active bit of the breakpoint at `offset` inside the unit
    /// `byte_code_cp`. Returns false when no breakpoint metadata exists for
    /// that location, which the dispatcher treats as a protocol error.
    fn update_breakpoint(
        &mut self,
        enable: bool,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) -> bool;

    /// Whether an active breakpoint is set at the given location.
    fn has_active_breakpoint(&self, byte_code_cp: CompressedPointer, offset: u32) -> bool;

    /// Depth of the current call frame chain, outermost frame = 1.
    fn call_depth(&self) -> usize;

    /// Collects up to `max_depth` frames from the top of the call chain,
    /// all of them for 0.
    fn backtrace(&self, max_depth: u32) -> Vec<BacktraceFrame>;

    /// Evaluates `source` in the paused context. `Ok` carries the result
    /// rendered as a string, `Err` the error's string form.
    fn eval(&mut self, source: &[u8], intent: EvalIntent) -> Result<Vec<u8>, Vec<u8>>;

    /// Releases a byte code unit whose free the client has acknowledged.
    fn free_byte_code(&mut self, byte_code_cp: CompressedPointer);

    /// Current allocator counters for a MEMSTATS reply.
    fn memory_stats(&self) -> MemoryStats;
}
