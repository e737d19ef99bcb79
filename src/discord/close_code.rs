//! Gateway close codes and the recovery path each one implies.

/// Highest close code after which the session may still be resumed.
pub const LAST_RESUMABLE_CLOSE_CODE: u16 = 4010;

/// How the client re-establishes a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Reattach to the stored session via the resume url.
    Resume,
    /// Drop the session and run the full handshake against the bootstrap url.
    Identify,
}

impl Recovery {
    /// A connection that vanished without a close frame is treated as resumable.
    pub const fn for_close_code(code: Option<u16>) -> Self {
        match code {
            Some(code) if code > LAST_RESUMABLE_CLOSE_CODE => Self::Identify,
            _ => Self::Resume,
        }
    }
}

pub const fn describe(code: u16) -> &'static str {
    match code {
        1000 => "normal closure",
        1001 => "going away",
        1006 => "abnormal closure",
        4000 => "unknown error",
        4001 => "unknown opcode",
        4002 => "decode error",
        4003 => "not authenticated",
        4004 => "authentication failed",
        4005 => "already authenticated",
        4007 => "invalid sequence",
        4008 => "rate limited",
        4009 => "session timed out",
        4010 => "invalid shard",
        4011 => "sharding required",
        4012 => "invalid api version",
        4013 => "invalid intents",
        4014 => "disallowed intents",
        _ => "unrecognised close code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_above_threshold_need_fresh_identify() {
        for code in [4011, 4012, 4013, 4014, 4999] {
            assert_eq!(Recovery::for_close_code(Some(code)), Recovery::Identify, "{code}");
        }
    }

    #[test]
    fn codes_up_to_threshold_attempt_resume() {
        for code in [1000, 1001, 1006, 4000, 4004, 4009, 4010] {
            assert_eq!(Recovery::for_close_code(Some(code)), Recovery::Resume, "{code}");
        }
    }

    #[test]
    fn boundary_is_resumable() {
        assert_eq!(
            Recovery::for_close_code(Some(LAST_RESUMABLE_CLOSE_CODE)),
            Recovery::Resume
        );
        assert_eq!(
            Recovery::for_close_code(Some(LAST_RESUMABLE_CLOSE_CODE + 1)),
            Recovery::Identify
        );
    }

    #[test]
    fn missing_code_attempts_resume() {
        assert_eq!(Recovery::for_close_code(None), Recovery::Resume);
    }

    #[test]
    fn describes_known_codes() {
        assert_eq!(describe(4014), "disallowed intents");
        assert_eq!(describe(4006), "unrecognised close code");
    }
}
