use crate::error::DebuggerError;
use log::info;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Byte stream the debugger endpoint runs on.
///
/// The core only ever talks to one client and assumes nonblocking semantics
/// on the receive side: `receive` returns `Ok(0)` when no data is available
/// and an error once the peer is gone. The send side must push the whole
/// buffer before returning, retrying on would-block, because the layers above
/// rely on frame atomicity on the wire.
pub trait Transport {
    /// Blocks until one debugger client is attached.
    fn accept(&mut self) -> Result<(), DebuggerError>;

    /// Pushes the entire buffer to the client.
    fn send(&mut self, bytes: &[u8]) -> Result<(), DebuggerError>;

    /// Reads whatever is available into `buf`. `Ok(0)` means would-block.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, DebuggerError>;

    /// Tears the client connection down. Idempotent.
    fn close(&mut self);
}

/// Plain TCP transport with a backlog of one.
pub struct TcpTransport {
    listener: TcpListener,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn bind(port: u16) -> Result<Self, DebuggerError> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port))?;
        Ok(TcpTransport {
            listener,
            stream: None,
        })
    }

    /// The address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, DebuggerError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Transport for TcpTransport {
    fn accept(&mut self) -> Result<(), DebuggerError> {
        let (stream, peer) = self.listener.accept()?;
        // Nonblocking from the start; the handshake layer polls for the
        // upgrade request the same way the frame layer polls for frames.
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        info!("Debugger client attached from {}", peer);
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), DebuggerError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(DebuggerError::ConnectionClosed)?;

        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(DebuggerError::ConnectionClosed),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, DebuggerError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(DebuggerError::ConnectionClosed)?;

        match stream.read(buf) {
            // A zero byte read on TCP means the peer closed its end.
            Ok(0) => Err(DebuggerError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
