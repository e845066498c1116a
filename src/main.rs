use jerry_debugger::{
    BacktraceFrame, CompressedPointer, Debugger, DebuggerConfig, EvalIntent, MemoryStats,
    OutputSubtype, ParsedFunction, ScriptEngine,
};
use log::info;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

const SCRIPT_CP: CompressedPointer = 1;
const HELPER_CP: CompressedPointer = 2;

const SCRIPT_OFFSETS: u32 = 6;
const HELPER_OFFSETS: u32 = 3;

/// Toy engine that "executes" two byte code units in a loop, the second one
/// as a nested call. Enough surface to point a real debugger client at.
struct DemoEngine {
    active_breakpoints: HashSet<(CompressedPointer, u32)>,
    stack: Vec<BacktraceFrame>,
}

impl DemoEngine {
    fn new() -> Self {
        DemoEngine {
            active_breakpoints: HashSet::new(),
            stack: Vec::new(),
        }
    }

    fn known_location(byte_code_cp: CompressedPointer, offset: u32) -> bool {
        match byte_code_cp {
            SCRIPT_CP => offset < SCRIPT_OFFSETS,
            HELPER_CP => offset < HELPER_OFFSETS,
            _ => false,
        }
    }
}

impl ScriptEngine for DemoEngine {
    fn update_breakpoint(
        &mut self,
        enable: bool,
        byte_code_cp: CompressedPointer,
        offset: u32,
    ) -> bool {
        if !Self::known_location(byte_code_cp, offset) {
            return false;
        }
        if enable {
            self.active_breakpoints.insert((byte_code_cp, offset));
        } else {
            self.active_breakpoints.remove(&(byte_code_cp, offset));
        }
        true
    }

    fn has_active_breakpoint(&self, byte_code_cp: CompressedPointer, offset: u32) -> bool {
        self.active_breakpoints.contains(&(byte_code_cp, offset))
    }

    fn call_depth(&self) -> usize {
        self.stack.len()
    }

    fn backtrace(&self, max_depth: u32) -> Vec<BacktraceFrame> {
        let depth = if max_depth == 0 {
            self.stack.len()
        } else {
            (max_depth as usize).min(self.stack.len())
        };
        self.stack.iter().rev().take(depth).copied().collect()
    }

    fn eval(&mut self, source: &[u8], _intent: EvalIntent) -> Result<Vec<u8>, Vec<u8>> {
        // No real evaluator here, echo the expression back.
        let mut result = b"demo:".to_vec();
        result.extend_from_slice(source);
        Ok(result)
    }

    fn free_byte_code(&mut self, byte_code_cp: CompressedPointer) {
        info!("Byte code unit {} released", byte_code_cp);
    }

    fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            allocated_bytes: 65536,
            byte_code_bytes: 1024,
            string_bytes: 512,
            object_bytes: 2048,
            property_bytes: 256,
        }
    }
}

fn announce_functions(debugger: &mut Debugger<jerry_debugger::TcpTransport>, engine: &mut DemoEngine) {
    let script_lines: Vec<u32> = (1..=SCRIPT_OFFSETS).collect();
    let script_offsets: Vec<u32> = (0..SCRIPT_OFFSETS).collect();
    debugger.parse_finished(
        engine,
        &ParsedFunction {
            source: b"for (;;) { helper(); print('tick'); }",
            source_name: b"demo.js",
            function_name: b"",
            line: 1,
            column: 1,
            breakpoint_lines: &script_lines,
            breakpoint_offsets: &script_offsets,
            byte_code_cp: SCRIPT_CP,
        },
    );

    let helper_lines: Vec<u32> = (1..=HELPER_OFFSETS).collect();
    let helper_offsets: Vec<u32> = (0..HELPER_OFFSETS).collect();
    debugger.parse_finished(
        engine,
        &ParsedFunction {
            source: b"function helper() { return 42; }",
            source_name: b"demo.js",
            function_name: b"helper",
            line: 1,
            column: 10,
            breakpoint_lines: &helper_lines,
            breakpoint_offsets: &helper_offsets,
            byte_code_cp: HELPER_CP,
        },
    );
}

fn main() {
    env_logger::init();

    let config = DebuggerConfig::default();
    let port = config.port;
    let mut debugger = Debugger::init(config).expect("can't bind the debugger port");
    info!("Debugger endpoint listening on port {}", port);

    let mut engine = DemoEngine::new();
    if !debugger.accept_client() {
        return;
    }

    announce_functions(&mut debugger, &mut engine);

    while debugger.is_connected() {
        engine.stack.push(BacktraceFrame {
            byte_code_cp: SCRIPT_CP,
            offset: 0,
        });

        for offset in 0..SCRIPT_OFFSETS {
            if let Some(frame) = engine.stack.last_mut() {
                frame.offset = offset;
            }
            debugger.safepoint(&mut engine, SCRIPT_CP, offset);

            if let Some(thrown) = debugger.take_pending_throw() {
                debugger.exception_thrown(&mut engine, SCRIPT_CP, offset, &thrown);
            }

            // Offset 2 models the nested helper() call.
            if offset == 2 {
                engine.stack.push(BacktraceFrame {
                    byte_code_cp: HELPER_CP,
                    offset: 0,
                });
                for helper_offset in 0..HELPER_OFFSETS {
                    if let Some(frame) = engine.stack.last_mut() {
                        frame.offset = helper_offset;
                    }
                    debugger.safepoint(&mut engine, HELPER_CP, helper_offset);
                }
                engine.stack.pop();
            }
        }

        engine.stack.pop();
        debugger.send_output(b"tick\n", OutputSubtype::Ok);
        thread::sleep(Duration::from_millis(250));
    }

    info!("Client gone, shutting down");
}
