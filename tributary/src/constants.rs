use std::time::Duration;

/// The maximum number of messages the server accepts in a single publish
/// request.
pub const MAX_PUBLISH_REQUEST_COUNT: usize = 1000;
/// The maximum encoded size of a single publish request.
pub const MAX_PUBLISH_REQUEST_BYTES: usize = 3_500_000;

/// How often a committer sends the latest acknowledged offset.
pub const COMMIT_CURSOR_PERIOD: Duration = Duration::from_millis(50);
/// How often a subscribe stream releases batched flow control tokens.
pub const BATCH_FLOW_CONTROL_PERIOD: Duration = Duration::from_millis(100);
/// Pending flow control tokens are sent early once they reach this fraction
/// of the tokens granted to the server.
pub const EXPEDITE_BATCH_REQUEST_RATIO: f64 = 0.5;

/// Upper bound on a single stream connection attempt, and on how long a
/// publish or subscribe stream may go without a response.
pub const MAX_STREAM_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Header carrying the resource a stream is routed to.
pub const ROUTING_METADATA_HEADER: &str = "x-tributary-request-params";
/// Header identifying this client library.
pub const CLIENT_INFO_HEADER: &str = "x-tributary-client";

/// Error reason with which the server asks a subscribe stream to discard
/// its state and seek to the committed cursor.
pub const RESET_SIGNAL_REASON: &str = "RESET";
/// The domain of the service's structured error details.
pub const ERROR_DOMAIN: &str = "tributary";
/// Type URL suffix of the error details that carry the reset signal.
pub const ERROR_INFO_TYPE: &str = "google.rpc.ErrorInfo";
