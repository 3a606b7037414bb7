//! Response status codes.
//!
//! Zero means success. Positive codes are application-level failures reported
//! by an action; negative codes mean the request itself could not be served.

/// The action completed and the payload holds its response.
pub const SUCCESS: i32 = 0;

/// Generic action failure (including a panic inside the action).
pub const FAILURE: i32 = 1;

/// A parameter was outside the accepted range.
pub const OUT_OF_RANGE: i32 = 2;

/// The parameters were well-formed but not valid for the current state.
pub const INVALID_PARAMS: i32 = 3;

/// The request frame could not be decoded.
pub const TRANSPORT_FAILURE: i32 = -1;

/// No action with the requested identifier is registered.
pub const UNKNOWN_ACTION: i32 = -2;

/// Returns a human-readable name for a status code.
pub fn status_name(code: i32) -> &'static str {
    match code {
        SUCCESS => "SUCCESS",
        FAILURE => "FAILURE",
        OUT_OF_RANGE => "OUT_OF_RANGE",
        INVALID_PARAMS => "INVALID_PARAMS",
        TRANSPORT_FAILURE => "TRANSPORT_FAILURE",
        UNKNOWN_ACTION => "UNKNOWN_ACTION",
        c if c > 0 => "APPLICATION",
        _ => "PROTOCOL",
    }
}

/// Returns true if the status means the request was served successfully.
pub fn is_success(code: i32) -> bool {
    code == SUCCESS
}

/// Returns true if the status was produced by the protocol layer rather than an action.
pub fn is_protocol_failure(code: i32) -> bool {
    code < SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_for_builtin_codes() {
        assert_eq!(status_name(SUCCESS), "SUCCESS");
        assert_eq!(status_name(OUT_OF_RANGE), "OUT_OF_RANGE");
        assert_eq!(status_name(UNKNOWN_ACTION), "UNKNOWN_ACTION");
        assert_eq!(status_name(42), "APPLICATION");
        assert_eq!(status_name(-9), "PROTOCOL");
    }

    #[test]
    fn classification() {
        assert!(is_success(SUCCESS));
        assert!(!is_success(FAILURE));
        assert!(is_protocol_failure(TRANSPORT_FAILURE));
        assert!(!is_protocol_failure(INVALID_PARAMS));
    }
}
