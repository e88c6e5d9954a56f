//! Well-known command codes.
//!
//! The command byte is only meaningful together with the control flag:
//! control commands manage the transport itself, application commands are
//! routed to the request layer above the codec.

/// CONTROL: mark total bytes sent (flow-control checkpoint).
pub const MARK_TOTAL_BYTES_SENT: u8 = 0;

/// CONTROL: acknowledge total bytes received.
pub const ACK_TOTAL_BYTES_RECEIVED: u8 = 1;

/// CONTROL: announce the byte order of subsequent payloads.
pub const SET_BYTE_ORDER: u8 = 2;

/// CONTROL: echo request (liveness probe).
pub const ECHO_REQUEST: u8 = 3;

/// CONTROL: echo response.
pub const ECHO_RESPONSE: u8 = 4;

/// APPLICATION: server beacon.
pub const BEACON: u8 = 0;

/// APPLICATION: connection validation.
pub const CONNECTION_VALIDATION: u8 = 1;

/// APPLICATION: echo.
pub const ECHO: u8 = 2;

/// APPLICATION: channel search.
pub const SEARCH: u8 = 3;

/// APPLICATION: channel search response.
pub const SEARCH_RESPONSE: u8 = 4;

/// First command code without a built-in name.
pub const USER_COMMAND_START: u8 = 0x20;

/// Returns a human-readable name for a command, for logs and diagnostics.
pub fn command_name(control: bool, command: u8) -> &'static str {
    if control {
        return match command {
            MARK_TOTAL_BYTES_SENT => "MARK_TOTAL_BYTES_SENT",
            ACK_TOTAL_BYTES_RECEIVED => "ACK_TOTAL_BYTES_RECEIVED",
            SET_BYTE_ORDER => "SET_BYTE_ORDER",
            ECHO_REQUEST => "ECHO_REQUEST",
            ECHO_RESPONSE => "ECHO_RESPONSE",
            _ => "CONTROL_RESERVED",
        };
    }

    match command {
        BEACON => "BEACON",
        CONNECTION_VALIDATION => "CONNECTION_VALIDATION",
        ECHO => "ECHO",
        SEARCH => "SEARCH",
        SEARCH_RESPONSE => "SEARCH_RESPONSE",
        5..=0x1F => "APPLICATION",
        _ => "USER",
    }
}

/// Returns true if the command is a built-in control command.
pub fn is_builtin_control(command: u8) -> bool {
    command <= ECHO_RESPONSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_depend_on_control_flag() {
        assert_eq!(command_name(true, 0), "MARK_TOTAL_BYTES_SENT");
        assert_eq!(command_name(false, 0), "BEACON");
        assert_eq!(command_name(true, ECHO_REQUEST), "ECHO_REQUEST");
        assert_eq!(command_name(false, SEARCH), "SEARCH");
    }

    #[test]
    fn unknown_commands_fall_into_ranges() {
        assert_eq!(command_name(true, 0x7F), "CONTROL_RESERVED");
        assert_eq!(command_name(false, 0x10), "APPLICATION");
        assert_eq!(command_name(false, USER_COMMAND_START), "USER");
        assert!(is_builtin_control(ECHO_RESPONSE));
        assert!(!is_builtin_control(5));
    }
}
