use jerry_debugger::{
    BacktraceFrame, ClientMessageType, ClientSourceStatus, Debugger, DebuggerConfig, EvalIntent,
    MemoryStats, ScriptEngine, ServerMessageType, TcpTransport, PROTOCOL_VERSION,
};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

fn test_config() -> DebuggerConfig {
    DebuggerConfig {
        port: 0,
        message_frequency: 1,
        sleep_interval: Duration::from_millis(10),
        ..DebuggerConfig::default()
    }
}

/// Binds on an ephemeral port and returns the endpoint plus the port a
/// client should dial.
fn bound_debugger() -> (Debugger<TcpTransport>, u16) {
    let transport = TcpTransport::bind(0).expect("can't bind test listener");
    let port = transport.local_addr().unwrap().port();
    (Debugger::with_transport(transport, test_config()), port)
}

struct ScriptedEngine {
    known: HashSet<(u32, u32)>,
    active: HashSet<(u32, u32)>,
    depth: usize,
    freed: Vec<u32>,
}

impl ScriptedEngine {
    fn new() -> Self {
        let mut known = HashSet::new();
        for unit in [1u32, 2, 7] {
            for offset in 0..16 {
                known.insert((unit, offset));
            }
        }
        ScriptedEngine {
            known,
            active: HashSet::new(),
            depth: 1,
            freed: Vec::new(),
        }
    }
}

impl ScriptEngine for ScriptedEngine {
    fn update_breakpoint(&mut self, enable: bool, byte_code_cp: u32, offset: u32) -> bool {
        if !self.known.contains(&(byte_code_cp, offset)) {
            return false;
        }
        if enable {
            self.active.insert((byte_code_cp, offset));
        } else {
            self.active.remove(&(byte_code_cp, offset));
        }
        true
    }

    fn has_active_breakpoint(&self, byte_code_cp: u32, offset: u32) -> bool {
        self.active.contains(&(byte_code_cp, offset))
    }

    fn call_depth(&self) -> usize {
        self.depth
    }

    fn backtrace(&self, _max_depth: u32) -> Vec<BacktraceFrame> {
        vec![BacktraceFrame {
            byte_code_cp: 1,
            offset: 0,
        }]
    }

    fn eval(&mut self, source: &[u8], _intent: EvalIntent) -> Result<Vec<u8>, Vec<u8>> {
        if source == b"1+2+3" {
            Ok(b"6".to_vec())
        } else {
            Err(b"SyntaxError".to_vec())
        }
    }

    fn free_byte_code(&mut self, byte_code_cp: u32) {
        self.freed.push(byte_code_cp);
    }

    fn memory_stats(&self) -> MemoryStats {
        MemoryStats::default()
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("can't reach the endpoint");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        TestClient { stream }
    }

    /// Performs the upgrade with the RFC sample key and returns the raw
    /// HTTP response.
    fn handshake(&mut self) -> String {
        let request = format!(
            "GET /jerry-debugger HTTP/1.1\r\n\
             Host: 127.0.0.1\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            SAMPLE_KEY
        );
        self.stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            self.stream.read_exact(&mut byte).unwrap();
            response.push(byte[0]);
        }
        String::from_utf8(response).unwrap()
    }

    /// Sends one masked binary frame around `payload`.
    fn send_payload(&mut self, payload: &[u8]) {
        assert!(payload.len() <= 125);
        let mask: [u8; 4] = rand::random();
        let mut frame = vec![0x82, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(
            payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4]),
        );
        self.stream.write_all(&frame).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Reads one server frame, checking the egress invariants: FIN | BINARY
    /// first byte, single byte length, no mask.
    fn read_message(&mut self) -> Vec<u8> {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).unwrap();
        assert_eq!(header[0], 0x82);
        assert!(header[1] <= 125);

        let mut payload = vec![0u8; header[1] as usize];
        self.stream.read_exact(&mut payload).unwrap();
        payload
    }

    fn expect_hit(&mut self, byte_code_cp: u16, offset: u32) {
        let mut expected = vec![ServerMessageType::BreakpointHit as u8];
        expected.extend_from_slice(&byte_code_cp.to_ne_bytes());
        expected.extend_from_slice(&offset.to_ne_bytes());
        assert_eq!(self.read_message(), expected);
    }

    fn send_type(&mut self, message_type: ClientMessageType) {
        self.send_payload(&[message_type as u8]);
    }

    fn send_update_breakpoint(&mut self, enable: u8, byte_code_cp: u16, offset: u32) {
        let mut payload = vec![ClientMessageType::UpdateBreakpoint as u8, enable];
        payload.extend_from_slice(&byte_code_cp.to_ne_bytes());
        payload.extend_from_slice(&offset.to_ne_bytes());
        self.send_payload(&payload);
    }
}

#[test]
fn handshake_then_configuration() {
    let (mut debugger, port) = bound_debugger();

    let server = thread::spawn(move || {
        let attached = debugger.accept_client();
        (attached, debugger.is_connected())
    });

    let mut client = TestClient::connect(port);
    let response = client.handshake();
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains(&format!("Sec-WebSocket-Accept: {}\r\n", SAMPLE_ACCEPT)));

    let configuration = client.read_message();
    assert_eq!(
        configuration,
        vec![
            ServerMessageType::Configuration as u8,
            128,
            2,
            cfg!(target_endian = "little") as u8,
            PROTOCOL_VERSION,
        ]
    );

    let (attached, connected) = server.join().unwrap();
    assert!(attached);
    assert!(connected);
}

#[test]
fn set_and_hit_breakpoint() {
    let (mut debugger, port) = bound_debugger();
    let stop = Arc::new(AtomicBool::new(false));
    let engine_stop = stop.clone();

    let server = thread::spawn(move || {
        assert!(debugger.accept_client());
        let mut engine = ScriptedEngine::new();
        while debugger.is_connected() && !engine_stop.load(Ordering::SeqCst) {
            for offset in 0..6 {
                debugger.safepoint(&mut engine, 7, offset);
            }
            thread::sleep(Duration::from_millis(1));
        }
        debugger.is_connected()
    });

    let mut client = TestClient::connect(port);
    client.handshake();
    client.read_message(); // configuration

    // The engine pauses at its very first safepoint after the handshake.
    client.expect_hit(7, 0);

    client.send_update_breakpoint(1, 7, 2);
    client.send_type(ClientMessageType::Continue);
    client.expect_hit(7, 2);

    // Clear it again so the resumed engine runs freely.
    client.send_update_breakpoint(0, 7, 2);
    client.send_type(ClientMessageType::Continue);

    stop.store(true, Ordering::SeqCst);
    assert!(server.join().unwrap());
}

#[test]
fn next_steps_over_nested_call() {
    let (mut debugger, port) = bound_debugger();

    let server = thread::spawn(move || {
        assert!(debugger.accept_client());
        let mut engine = ScriptedEngine::new();

        // One scripted pass: the initial pause lands on (1, 0), then a
        // nested call runs three safepoints one frame deeper, then the
        // caller continues.
        engine.depth = 1;
        debugger.safepoint(&mut engine, 1, 0);

        engine.depth = 2;
        for offset in 0..3 {
            debugger.safepoint(&mut engine, 2, offset);
        }

        engine.depth = 1;
        debugger.safepoint(&mut engine, 1, 1);
        debugger.is_connected()
    });

    let mut client = TestClient::connect(port);
    client.handshake();
    client.read_message(); // configuration
    client.expect_hit(1, 0);

    client.send_type(ClientMessageType::Next);
    // The very next frame must be the pause back in the caller; the
    // deeper safepoints emit nothing.
    client.expect_hit(1, 1);
    client.send_type(ClientMessageType::Continue);

    assert!(server.join().unwrap());
}

#[test]
fn eval_round_trip() {
    let (mut debugger, port) = bound_debugger();

    let server = thread::spawn(move || {
        assert!(debugger.accept_client());
        let mut engine = ScriptedEngine::new();
        debugger.safepoint(&mut engine, 1, 0);
        debugger.is_connected()
    });

    let mut client = TestClient::connect(port);
    client.handshake();
    client.read_message(); // configuration
    client.expect_hit(1, 0);

    let mut eval = vec![ClientMessageType::Eval as u8];
    eval.extend_from_slice(&6u32.to_ne_bytes());
    eval.extend_from_slice(&[0]); // evaluate subtype
    eval.extend_from_slice(b"1+");
    client.send_payload(&eval);

    let mut eval_part = vec![ClientMessageType::EvalPart as u8];
    eval_part.extend_from_slice(b"2+3");
    client.send_payload(&eval_part);

    let result = client.read_message();
    assert_eq!(
        result,
        vec![ServerMessageType::EvalResultEnd as u8, 1, b'6']
    );

    client.send_type(ClientMessageType::Continue);
    assert!(server.join().unwrap());
}

#[test]
fn client_source_injection() {
    let (mut debugger, port) = bound_debugger();
    let (result_tx, result_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        assert!(debugger.accept_client());
        let mut engine = ScriptedEngine::new();
        let status = debugger.wait_for_client_source(&mut engine, |name, source| {
            result_tx.send((name.to_vec(), source.to_vec())).unwrap();
        });
        status
    });

    let mut client = TestClient::connect(port);
    client.handshake();
    client.read_message(); // configuration

    assert_eq!(
        client.read_message(),
        vec![ServerMessageType::WaitForSource as u8]
    );

    let name = b"startup.js";
    let source = b"print('injected and running');";
    let mut content = vec![name.len() as u8];
    content.extend_from_slice(name);
    content.extend_from_slice(source);

    let (head, tail) = content.split_at(8);
    let mut first = vec![ClientMessageType::ClientSource as u8];
    first.extend_from_slice(&(content.len() as u32).to_ne_bytes());
    first.extend_from_slice(head);
    client.send_payload(&first);

    let mut part = vec![ClientMessageType::ClientSourcePart as u8];
    part.extend_from_slice(tail);
    client.send_payload(&part);

    assert_eq!(server.join().unwrap(), ClientSourceStatus::Received);
    let (received_name, received_source) = result_rx.recv().unwrap();
    assert_eq!(received_name, name);
    assert_eq!(received_source, source);
}

#[test]
fn malformed_frame_closes_session() {
    let (mut debugger, port) = bound_debugger();

    let server = thread::spawn(move || {
        assert!(debugger.accept_client());
        let mut engine = ScriptedEngine::new();
        let mut rounds = 0;
        while debugger.is_connected() && rounds < 100_000 {
            for offset in 0..4 {
                debugger.safepoint(&mut engine, 7, offset);
            }
            rounds += 1;
        }
        debugger.is_connected()
    });

    let mut client = TestClient::connect(port);
    client.handshake();
    client.read_message(); // configuration
    client.expect_hit(7, 0);

    // A text frame is not part of the dialect.
    let mask: [u8; 4] = rand::random();
    let mut frame = vec![0x81, 0x80 | 2];
    frame.extend_from_slice(&mask);
    frame.extend_from_slice(&[b'h' ^ mask[0], b'i' ^ mask[1]]);
    client.send_raw(&frame);

    assert!(!server.join().unwrap());

    // The server side closed the socket; reads drain to EOF.
    let mut rest = Vec::new();
    assert_eq!(client.stream.read_to_end(&mut rest).unwrap(), 0);
}
