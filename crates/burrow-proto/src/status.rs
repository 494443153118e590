//! Reply status codes carried in reply envelopes and `ServiceStatus`

use std::fmt;

/// Closed set of outcomes a reply can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    Success,
    InstanceNotFound,
    /// The effect happened but the transaction completes with the reply round trip
    InProgress,
    StartFailed,
    UnknownServiceType,
    UnknownCommand,
    MalformedPayload,
}

impl ReplyStatus {
    pub fn code(self) -> i32 {
        match self {
            ReplyStatus::Success => 0,
            ReplyStatus::InstanceNotFound => 1,
            ReplyStatus::InProgress => 2,
            ReplyStatus::StartFailed => 3,
            ReplyStatus::UnknownServiceType => 4,
            ReplyStatus::UnknownCommand => 5,
            ReplyStatus::MalformedPayload => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ReplyStatus::Success),
            1 => Some(ReplyStatus::InstanceNotFound),
            2 => Some(ReplyStatus::InProgress),
            3 => Some(ReplyStatus::StartFailed),
            4 => Some(ReplyStatus::UnknownServiceType),
            5 => Some(ReplyStatus::UnknownCommand),
            6 => Some(ReplyStatus::MalformedPayload),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Success => "success",
            ReplyStatus::InstanceNotFound => "instance not found",
            ReplyStatus::InProgress => "in progress",
            ReplyStatus::StartFailed => "start failed",
            ReplyStatus::UnknownServiceType => "unknown service type",
            ReplyStatus::UnknownCommand => "unknown command",
            ReplyStatus::MalformedPayload => "malformed payload",
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReplyStatus; 7] = [
        ReplyStatus::Success,
        ReplyStatus::InstanceNotFound,
        ReplyStatus::InProgress,
        ReplyStatus::StartFailed,
        ReplyStatus::UnknownServiceType,
        ReplyStatus::UnknownCommand,
        ReplyStatus::MalformedPayload,
    ];

    #[test]
    fn test_codes_are_distinct_and_stable() {
        for status in ALL {
            assert_eq!(ReplyStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ReplyStatus::Success.code(), 0);
        assert_ne!(
            ReplyStatus::InstanceNotFound.code(),
            ReplyStatus::InProgress.code()
        );
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(ReplyStatus::from_code(-1), None);
        assert_eq!(ReplyStatus::from_code(4242), None);
    }
}
