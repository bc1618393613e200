//! Error types for path diagnostics

use thiserror::Error;

/// Errors raised when the ICMP probe mechanism itself cannot be used
///
/// Timeouts and unreachable replies are ordinary probe outcomes, not errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket creation failed due to insufficient permissions
    ///
    /// This error provides structured information about what permissions
    /// are needed and how to obtain them.
    #[error("Insufficient permissions: {required}")]
    InsufficientPermissions {
        /// Description of required permissions (e.g., "root or CAP_NET_RAW")
        required: String,
        /// Suggested remedy (e.g., "Run with sudo")
        suggestion: String,
    },

    /// Socket creation failed for other reasons
    #[error("Failed to create socket: {0}")]
    Socket(String),

    /// Failed to send probe packet
    #[error("Failed to send probe: {0}")]
    Send(String),

    /// Receiving a reply failed with something other than a timeout
    #[error("Failed to receive reply: {0}")]
    Receive(String),

    /// The payload cannot be carried in a single echo request
    #[error("Payload of {size} bytes exceeds the {max}-byte echo limit")]
    PayloadTooLarge {
        /// Requested payload size in bytes
        size: usize,
        /// Largest payload an echo request can carry
        max: usize,
    },
}

/// Errors from forward name resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every resolver was tried and none produced an address
    #[error("could not resolve host: {0}")]
    CouldNotResolve(String),

    /// A single resolver failed
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// The resolver answered but returned no address
    #[error("no usable address in response")]
    NoUsableAddress,
}

/// Errors from geolocation/ASN providers
#[derive(Debug, Error)]
pub enum GeoLookupError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Response body was not valid JSON for the provider
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Response parsed but lacked the fields we need
    #[error("Unusable response: {0}")]
    Unusable(String),

    /// Every provider in the chain failed
    #[error("All providers failed")]
    AllProvidersFailed,
}

/// Errors that abort route discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The probe transport could not be used
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced to the operator by a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Target name could not be turned into an address
    #[error("could not resolve host: {0}")]
    CouldNotResolve(String),

    /// Discovery completed without finding any hop
    #[error("failed to discover route")]
    RouteDiscoveryFailed,

    /// Discovery aborted on a transport failure
    #[error("route discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Another session is still running or stopping
    #[error("a session is already running")]
    AlreadyRunning,

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A background task panicked or was aborted
    #[error("background task failed: {0}")]
    TaskFailed(String),
}
