//! Errors shared by every publisher and subscriber component.
//!
//! [WireError] is [Clone] so that the first fatal error of a service can be
//! handed to every caller waiting on it.

use prost::{bytes::Bytes, Message};
use thiserror::Error;
use tonic::{Code, Status};

use crate::{
    constants::{ERROR_DOMAIN, ERROR_INFO_TYPE, MAX_PUBLISH_REQUEST_BYTES, RESET_SIGNAL_REASON},
    proto::tributary::{Any, ErrorInfo, RpcStatus},
};

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("service must be started")]
    ServiceUninitialized,
    #[error("service is starting up")]
    ServiceStarting,
    #[error("service has stopped or is stopping")]
    ServiceStopped,
    #[error("cannot add a child service that has already been started")]
    ChildServiceStarted,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("client-side publish buffer overflow, publish rate is too high")]
    Overflow,
    #[error("message of {size} bytes exceeds the maximum of {} bytes", MAX_PUBLISH_REQUEST_BYTES)]
    OversizedMessage { size: usize },
    #[error("invalid message metadata {0:?}")]
    InvalidMetadata(String),
    #[error("invalid resource path {0:?}")]
    InvalidResourcePath(String),

    #[error("{code:?}: {message}")]
    Transport { code: Code, message: String },
    #[error("server reset the stream, {code:?}: {message}")]
    StreamReset { code: Code, message: String },
    #[error("stream closed by the server")]
    StreamClosed,
    #[error("service is unavailable, last error: {0}")]
    BackendUnavailable(Box<WireError>),

    #[error("server delivered messages out of order")]
    OutOfOrderMessages,
    #[error("server delivered messages with start offset {offset}, expected >= {expected}")]
    StartOffsetTooLow { offset: i64, expected: i64 },
    #[error("server delivered more bytes than the client had allowed")]
    TokenCounterBytesNegative,
    #[error("server delivered more messages than the client had allowed")]
    TokenCounterMessagesNegative,
    #[error("flow control tokens must not be negative")]
    NegativeFlowControlTokens,
    #[error("server delivered a response with no messages")]
    ServerNoMessages,
    #[error("invalid initial response on {0} stream")]
    InvalidInitialResponse(&'static str),
    #[error("invalid response on {0} stream")]
    InvalidResponse(&'static str),
    #[error("server sent a publish response, but no messages were in flight")]
    PublishQueueEmpty,
    #[error("server returned publish response with start offset {offset}, expected >= {expected}")]
    PublishOffsetRegression { offset: i64, expected: i64 },
    #[error("server acknowledged an invalid commit count: {0}")]
    InvalidCommitCount(i64),
    #[error("server acknowledged {confirmed} cursor commits, but only {pending} were sent")]
    ExcessCommitConfirmations { confirmed: i64, pending: usize },
    #[error("topic has invalid number of partitions {0}")]
    InvalidPartitionCount(i64),

    #[error("reassignment handler failed: {0}")]
    Reassignment(String),
}

impl WireError {
    pub fn transport(code: Code, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    /// The status code used to classify this error for retries.
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Transport { code, .. } | Self::StreamReset { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A status asking the client to reset its stream state, as the server
/// sends it.
pub fn stream_reset_status(code: Code, message: impl Into<String>) -> Status {
    let info = ErrorInfo {
        reason: RESET_SIGNAL_REASON.to_string(),
        domain: ERROR_DOMAIN.to_string(),
    };
    let details = RpcStatus {
        code: code as i32,
        message: String::new(),
        details: vec![Any {
            type_url: format!("type.googleapis.com/{ERROR_INFO_TYPE}"),
            value: info.encode_to_vec(),
        }],
    };
    Status::with_details(code, message, Bytes::from(details.encode_to_vec()))
}

fn has_reset_signal(status: &Status) -> bool {
    let Ok(details) = RpcStatus::decode(status.details()) else {
        return false;
    };
    details
        .details
        .iter()
        .filter(|any| any.type_url.ends_with(ERROR_INFO_TYPE))
        .filter_map(|any| ErrorInfo::decode(any.value.as_slice()).ok())
        .any(|info| info.reason == RESET_SIGNAL_REASON && info.domain == ERROR_DOMAIN)
}

impl From<Status> for WireError {
    fn from(status: Status) -> Self {
        if has_reset_signal(&status) {
            return Self::StreamReset {
                code: status.code(),
                message: status.message().to_string(),
            };
        }
        Self::transport(status.code(), status.message())
    }
}

impl From<WireError> for Status {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Transport { code, message } => Status::new(code, message),
            WireError::StreamReset { code, message } => stream_reset_status(code, message),
            WireError::InvalidSettings(_)
            | WireError::InvalidMetadata(_)
            | WireError::InvalidResourcePath(_)
            | WireError::OversizedMessage { .. } => Status::invalid_argument(e.to_string()),
            WireError::Overflow => Status::resource_exhausted(e.to_string()),
            WireError::BackendUnavailable(_) => Status::unavailable(e.to_string()),
            WireError::ServiceUninitialized
            | WireError::ServiceStarting
            | WireError::ServiceStopped
            | WireError::ChildServiceStarted => Status::failed_precondition(e.to_string()),
            _ => Status::internal(e.to_string()),
        }
    }
}
