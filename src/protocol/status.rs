//! Close status codes and close-reason validation.
//!
//! Codes follow RFC 6455 section 7.4:
//! ```text
//! 0    - 999   never used
//! 1000 - 2999  reserved for the protocol (only some are assigned)
//! 3000 - 3999  registered with IANA (libraries, frameworks)
//! 4000 - 4999  private use
//! ```

/// Normal closure; the purpose of the connection has been fulfilled.
pub const NORMAL_CLOSURE: u16 = 1000;
/// The endpoint is going away (server shutdown, page navigation).
pub const GOING_AWAY: u16 = 1001;
/// The endpoint is terminating the connection due to a protocol error.
pub const PROTOCOL_ERROR: u16 = 1002;
/// Received a type of data the endpoint cannot accept.
pub const CANNOT_ACCEPT: u16 = 1003;
/// Reserved, no meaning defined.
pub const RESERVED: u16 = 1004;
/// No status code was present in the close frame. Never sent on the wire.
pub const NO_STATUS_CODE: u16 = 1005;
/// The connection was closed without a close frame. Never sent on the wire.
pub const CLOSED_ABNORMALLY: u16 = 1006;
/// Message data was not consistent with its type (e.g. non-UTF-8 text).
pub const NOT_CONSISTENT: u16 = 1007;
/// Received a message that violates the endpoint's policy.
pub const POLICY_VIOLATION: u16 = 1008;
/// Received a message too big to process.
pub const TOO_BIG: u16 = 1009;
/// The client expected the server to negotiate an extension.
pub const NO_EXTENSION: u16 = 1010;
/// The server encountered an unexpected condition.
pub const SERVICE_ERROR: u16 = 1011;
/// The service is restarting.
pub const SERVICE_RESTART: u16 = 1012;
/// Temporary server condition, try again later.
pub const TRY_AGAIN_LATER: u16 = 1013;
/// The server acting as a gateway got an invalid response.
pub const BAD_GATEWAY: u16 = 1014;
/// TLS handshake failure. Never sent on the wire.
pub const TLS_HANDSHAKE_FAILURE: u16 = 1015;

/// Maximum close reason length in bytes (125 byte control payload minus the code).
pub const MAX_REASON_LEN: usize = 123;

/// Check whether a code may appear in a close frame on the wire.
pub fn is_legal(code: u16) -> bool {
    match code {
        0..=999 => false,
        RESERVED | NO_STATUS_CODE | CLOSED_ABNORMALLY | TLS_HANDSHAKE_FAILURE => false,
        1016..=2999 => false,
        5000..=u16::MAX => false,
        _ => true,
    }
}

/// Check whether the application may send this code through the client API.
///
/// Codes that describe conditions only the implementation can detect
/// (protocol errors, inconsistent data, oversized messages) or that only a
/// server may use are rejected.
pub fn is_legal_to_send_from_client(code: u16) -> bool {
    if !is_legal(code) {
        return false;
    }
    matches!(
        code,
        NORMAL_CLOSURE | GOING_AWAY | POLICY_VIOLATION | SERVICE_ERROR | 3000..=4999
    )
}

/// Check that a close reason fits in a close frame.
#[inline]
pub fn is_legal_reason(reason: &str) -> bool {
    reason.len() <= MAX_REASON_LEN
}

/// Code used when replying to a received close frame.
///
/// Codes that must never be sent (no status, abnormal closure) are replaced
/// with a normal closure.
#[inline]
pub fn normalize_echo_code(code: u16) -> u16 {
    match code {
        NO_STATUS_CODE | CLOSED_ABNORMALLY => NORMAL_CLOSURE,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_codes() {
        assert!(is_legal(NORMAL_CLOSURE));
        assert!(is_legal(PROTOCOL_ERROR));
        assert!(is_legal(BAD_GATEWAY));
        assert!(is_legal(3000));
        assert!(is_legal(4999));
    }

    #[test]
    fn test_codes_never_on_the_wire() {
        assert!(!is_legal(999));
        assert!(!is_legal(RESERVED));
        assert!(!is_legal(NO_STATUS_CODE));
        assert!(!is_legal(CLOSED_ABNORMALLY));
        assert!(!is_legal(TLS_HANDSHAKE_FAILURE));
        assert!(!is_legal(2000));
        assert!(!is_legal(5000));
    }

    #[test]
    fn test_client_may_send() {
        assert!(is_legal_to_send_from_client(NORMAL_CLOSURE));
        assert!(is_legal_to_send_from_client(GOING_AWAY));
        assert!(is_legal_to_send_from_client(POLICY_VIOLATION));
        assert!(is_legal_to_send_from_client(SERVICE_ERROR));
        assert!(is_legal_to_send_from_client(3500));
        assert!(is_legal_to_send_from_client(4000));
    }

    #[test]
    fn test_client_may_not_send() {
        assert!(!is_legal_to_send_from_client(PROTOCOL_ERROR));
        assert!(!is_legal_to_send_from_client(CANNOT_ACCEPT));
        assert!(!is_legal_to_send_from_client(NO_STATUS_CODE));
        assert!(!is_legal_to_send_from_client(NOT_CONSISTENT));
        assert!(!is_legal_to_send_from_client(TOO_BIG));
        assert!(!is_legal_to_send_from_client(NO_EXTENSION));
        assert!(!is_legal_to_send_from_client(SERVICE_RESTART));
        assert!(!is_legal_to_send_from_client(TRY_AGAIN_LATER));
        assert!(!is_legal_to_send_from_client(0));
        assert!(!is_legal_to_send_from_client(65535));
    }

    #[test]
    fn test_reason_length_is_counted_in_bytes() {
        assert!(is_legal_reason(""));
        assert!(is_legal_reason(&"a".repeat(123)));
        assert!(!is_legal_reason(&"a".repeat(124)));

        // 62 two-byte characters = 124 bytes
        assert!(!is_legal_reason(&"é".repeat(62)));
        assert!(is_legal_reason(&"é".repeat(61)));
    }

    #[test]
    fn test_normalize_echo_code() {
        assert_eq!(normalize_echo_code(NO_STATUS_CODE), NORMAL_CLOSURE);
        assert_eq!(normalize_echo_code(CLOSED_ABNORMALLY), NORMAL_CLOSURE);
        assert_eq!(normalize_echo_code(GOING_AWAY), GOING_AWAY);
        assert_eq!(normalize_echo_code(4001), 4001);
    }
}
