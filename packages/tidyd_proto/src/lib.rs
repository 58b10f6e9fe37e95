pub mod error;
pub mod messages;

pub use error::MarshaledError;
pub use messages::{CallbackFrame, DaemonRequest, DaemonResponse};

/// Label the daemon is registered under with the host service supervisor.
/// Doubles as the primary endpoint name: both sides derive the socket path
/// from this string.
pub const SERVICE_LABEL: &str = "io.tidyd.daemon";

/// Domain for errors raised by the generation engine.
pub const ENGINE_ERROR_DOMAIN: &str = "tidyd.engine";

/// Domain for errors raised by the transport layer itself.
pub const INTERNAL_ERROR_DOMAIN: &str = "tidyd.internal";
