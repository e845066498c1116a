use std::time::Duration;

/// Tunables for a debugger endpoint.
///
/// The defaults match the sizes the reference clients expect: a 128 byte
/// message buffer, 16-bit compressed pointers and a poll of the socket every
/// fifth dispatched byte code.
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// TCP port the endpoint listens on.
    pub port: u16,
    /// Size of the fixed send/receive buffers, in bytes. Clamped to [64, 255]
    /// since the CONFIGURATION message advertises it as a single byte.
    pub buffer_size: usize,
    /// Width of a compressed byte code pointer on the wire, 2 or 4 bytes.
    /// Any other value is treated as 2.
    pub cpointer_size: u8,
    /// Number of byte code dispatches between two socket polls.
    pub message_frequency: u32,
    /// Sleep between poll attempts while execution is paused.
    pub sleep_interval: Duration,
    /// How long the endpoint waits for the HTTP upgrade request.
    pub handshake_timeout: Duration,
    /// Upper bound for a client-announced incoming transfer (eval source,
    /// injected script). Transfers above this limit close the connection.
    pub max_transfer_size: u32,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        DebuggerConfig {
            port: 5001,
            buffer_size: 128,
            cpointer_size: 2,
            message_frequency: 5,
            sleep_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(5),
            max_transfer_size: 1 << 20,
        }
    }
}

impl DebuggerConfig {
    pub(crate) fn clamped_buffer_size(&self) -> usize {
        self.buffer_size.clamp(64, 255)
    }

    /// The pointer width actually used on the wire. The CONFIGURATION
    /// message advertises this value, so it must match what the codec
    /// writes and reads.
    pub(crate) fn clamped_cpointer_size(&self) -> u8 {
        if self.cpointer_size == 4 {
            4
        } else {
            2
        }
    }
}
