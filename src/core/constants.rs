//! Protocol constants for the PPTP control channel (RFC 2637).
//!
//! Wire values are fixed by the protocol and MUST NOT be changed. Timing
//! values are defaults; most of them can be overridden through
//! [`EngineConfig`](crate::engine::EngineConfig).

use std::time::Duration;

// =============================================================================
// HEADER
// =============================================================================

/// Well-known TCP port for PPTP control connections.
pub const PPTP_PORT: u16 = 1723;

/// Protocol version (1.0).
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Magic cookie carried in every control message header.
pub const MAGIC_COOKIE: u32 = 0x1a2b_3c4d;

/// PPTP message type for control messages (the only type we speak).
pub const CONTROL_MESSAGE: u16 = 1;

/// Size of the fixed message header.
pub const HEADER_SIZE: usize = 12;

/// Largest control message (Incoming-Call-Request).
pub const MAX_MESSAGE_SIZE: usize = HEADER_SIZE + 208;

/// Firmware revision advertised in Start-Control-Connection messages.
pub const FIRMWARE_REVISION: u16 = 0x0101;

// =============================================================================
// FIXED-SIZE CHARACTER BLOCKS
// =============================================================================

/// Host name block length.
pub const HOSTNAME_LEN: usize = 64;

/// Vendor string block length.
pub const VENDOR_LEN: usize = 64;

/// Phone number block length.
pub const PHONE_LEN: usize = 64;

/// Sub-address block length.
pub const SUBADDR_LEN: usize = 64;

/// Call statistics block length (Call-Disconnect-Notify).
pub const STATS_LEN: usize = 128;

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Asynchronous framing.
pub const FRAMECAP_ASYNC: u32 = 0x01;

/// Synchronous framing.
pub const FRAMECAP_SYNC: u32 = 0x02;

/// Either framing.
pub const FRAMECAP_ANY: u32 = 0x03;

/// Analog bearer.
pub const BEARCAP_ANALOG: u32 = 0x01;

/// Digital bearer.
pub const BEARCAP_DIGITAL: u32 = 0x02;

/// Either bearer.
pub const BEARCAP_ANY: u32 = 0x03;

// =============================================================================
// GENERAL ERROR CODES
// =============================================================================

/// No general error.
pub const ERROR_NONE: u8 = 0;

/// No control connection exists for this peer.
pub const ERROR_NOT_CONNECTED: u8 = 1;

/// Length or magic cookie wrong.
pub const ERROR_BAD_FORMAT: u8 = 2;

/// A field value was out of range.
pub const ERROR_BAD_VALUE: u8 = 3;

/// Insufficient resources to handle the command.
pub const ERROR_NO_RESOURCE: u8 = 4;

/// Unknown call id.
pub const ERROR_BAD_CALL_ID: u8 = 5;

/// Generic PAC-side failure.
pub const ERROR_PAC_ERROR: u8 = 6;

// =============================================================================
// RESULT CODES
// =============================================================================

/// Start-Control-Connection-Reply result codes.
pub mod sccrp {
    /// Channel successfully established.
    pub const OK: u8 = 1;
    /// General error, see error code.
    pub const GENERAL_ERROR: u8 = 2;
    /// Command channel already exists.
    pub const EXISTS: u8 = 3;
    /// Requester not authorized.
    pub const NOT_AUTHORIZED: u8 = 4;
    /// Incompatible protocol version.
    pub const BAD_VERSION: u8 = 5;
}

/// Stop-Control-Connection-Request reason codes.
pub mod stop_reason {
    /// General request to clear the connection.
    pub const NONE: u8 = 1;
    /// Cannot support the peer's protocol version.
    pub const BAD_VERSION: u8 = 2;
    /// Local shutdown.
    pub const LOCAL_SHUTDOWN: u8 = 3;
}

/// Echo-Reply result codes.
pub mod echo {
    /// Reply is valid.
    pub const OK: u8 = 1;
    /// General error, see error code.
    pub const GENERAL_ERROR: u8 = 2;
}

/// Outgoing-Call-Reply result codes.
pub mod ocrp {
    /// Call established.
    pub const OK: u8 = 1;
    /// General error, see error code.
    pub const GENERAL_ERROR: u8 = 2;
    /// No carrier.
    pub const NO_CARRIER: u8 = 3;
    /// Busy.
    pub const BUSY: u8 = 4;
    /// No dial tone.
    pub const NO_DIAL_TONE: u8 = 5;
    /// Timed out.
    pub const TIMEOUT: u8 = 6;
    /// Administratively prohibited.
    pub const ADMIN_PROHIBITED: u8 = 7;
}

/// Incoming-Call-Reply result codes.
pub mod icrp {
    /// Call accepted.
    pub const OK: u8 = 1;
    /// General error, see error code.
    pub const GENERAL_ERROR: u8 = 2;
    /// Do not accept.
    pub const NOT_ACCEPTED: u8 = 3;
}

/// Call-Disconnect-Notify result codes.
pub mod cdn {
    /// Lost carrier.
    pub const LOST_CARRIER: u8 = 1;
    /// General error, see error code.
    pub const GENERAL_ERROR: u8 = 2;
    /// Administrative shutdown.
    pub const ADMIN: u8 = 3;
    /// Received a Call-Clear-Request.
    pub const REQUEST: u8 = 4;
}

// =============================================================================
// CODE NAMES
// =============================================================================

fn lookup(table: &'static [&'static str], code: u8) -> &'static str {
    table.get(code as usize).copied().unwrap_or("[out of range]")
}

/// Human-readable name of a general error code.
pub fn error_name(code: u8) -> &'static str {
    lookup(
        &[
            "none",
            "not connected",
            "bad format",
            "bad value",
            "no resource",
            "bad call ID",
            "pac error",
        ],
        code,
    )
}

/// Human-readable name of a Start-Control-Connection-Reply result.
pub fn sccrp_result_name(code: u8) -> &'static str {
    lookup(
        &[
            "zero?",
            "OK",
            "general error",
            "channel exists",
            "not authorized",
            "bad protocol version",
        ],
        code,
    )
}

/// Human-readable name of a Stop-Control-Connection-Request reason.
pub fn stop_reason_name(code: u8) -> &'static str {
    lookup(
        &["zero?", "none", "bad protocol version", "local shutdown"],
        code,
    )
}

/// Human-readable name of an Echo-Reply result.
pub fn echo_result_name(code: u8) -> &'static str {
    lookup(&["zero?", "OK", "general error"], code)
}

/// Human-readable name of an Outgoing-Call-Reply result.
pub fn ocrp_result_name(code: u8) -> &'static str {
    lookup(
        &[
            "zero?",
            "OK",
            "general error",
            "no carrier",
            "busy",
            "no dialtone",
            "timed out",
            "admin prohib",
        ],
        code,
    )
}

/// Human-readable name of an Incoming-Call-Reply result.
pub fn icrp_result_name(code: u8) -> &'static str {
    lookup(&["zero?", "OK", "general error", "not accepted"], code)
}

/// Human-readable name of a Call-Disconnect-Notify result.
pub fn cdn_result_name(code: u8) -> &'static str {
    lookup(
        &[
            "zero?",
            "lost carrier",
            "general error",
            "admin action",
            "disconnect request",
        ],
        code,
    )
}

// =============================================================================
// TIMING
// =============================================================================

/// Silence from the peer after which an Echo-Request is sent.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = IDLE_TIMEOUT;

/// Time to wait for an Outgoing-Call-Reply.
pub const OUT_CALL_REPLY_TIMEOUT: Duration = Duration::from_secs(90);

/// Time to wait for an Incoming-Call-Connected after our Incoming-Call-Reply.
pub const IN_CALL_CONNECTED_TIMEOUT: Duration = Duration::from_secs(90);

/// Time to wait for a Stop-Control-Connection-Reply.
pub const STOP_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Grace period before closing a control connection with no calls.
pub const UNUSED_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// LIMITS AND DEFAULTS
// =============================================================================

/// Maximum calls carried by one control connection before a new one is opened.
pub const MAX_CALLS_PER_CONNECTION: usize = 100;

/// Advertised packet receive window.
pub const RECV_WINDOW: u16 = 16;

/// Advertised packet processing delay.
pub const PROCESSING_DELAY: u16 = 1;

/// Calling number reported for locally originated outgoing calls.
pub const INTERNAL_CALLING_NUMBER: &str = "Internally originated VPN call";

/// Size of the global call-id space.
pub const CALL_ID_SPACE: usize = 1 << 16;

/// First delay before retrying a transiently failed listener bind.
pub const LISTEN_RETRY_INITIAL: Duration = Duration::from_secs(1);

/// Cap on the listener bind retry delay.
pub const LISTEN_RETRY_MAX: Duration = Duration::from_secs(10);

/// Listener bind retry backoff multiplier.
pub const LISTEN_RETRY_BACKOFF: u32 = 2;

/// Listener bind attempts after the first failure.
pub const LISTEN_MAX_RETRIES: u32 = 5;
