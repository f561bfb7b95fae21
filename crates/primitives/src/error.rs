use std::fmt;

/// Outcome codes threaded through completion handlers and subscriptions.
/// `Success` is a code rather than a separate channel so a single handler
/// receives every terminal outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    Success,
    SendFailed,
    ChannelStopped,
    ChannelTimeout,
    InvalidPreviousBlock,
    OperationFailed,
    ServiceStopped,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::SendFailed => "send failed",
            ErrorCode::ChannelStopped => "channel stopped",
            ErrorCode::ChannelTimeout => "channel timed out",
            ErrorCode::InvalidPreviousBlock => "invalid previous block",
            ErrorCode::OperationFailed => "operation failed",
            ErrorCode::ServiceStopped => "service stopped",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::error::Error for ErrorCode {}
