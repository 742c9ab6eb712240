//! Error types for gu-payment.
//!
//! All errors implement the standard [`std::error::Error`] trait via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Remote Errors** ([`PaymentError::Gateway`], [`PaymentError::Http`]): the gateway
//!   rejected a call or could not be reached
//! - **Persistence Errors** ([`PaymentError::Store`]): the local record store failed
//! - **Configuration Errors** ([`PaymentError::Config`]): invalid schema or gateway settings
//! - **Input Errors** ([`PaymentError::InvalidInput`], [`PaymentError::Serialization`]):
//!   malformed input or payloads
//!
//! # Examples
//!
//! ```
//! use gu_payment::error::{PaymentError, Result};
//!
//! fn require_table(name: &str) -> Result<&str> {
//!     if name.is_empty() {
//!         return Err(PaymentError::Config("table name cannot be empty".to_owned()));
//!     }
//!     Ok(name)
//! }
//!
//! assert!(require_table("").is_err());
//! ```

use thiserror::Error;

/// Result type alias for gu-payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors raised by subscription, invoice and gateway operations.
///
/// # Error Recovery
///
/// - **Transient errors** ([`Http`](Self::Http)): the remote call may be retried by the caller;
///   local state was not modified
/// - **Gateway errors** ([`Gateway`](Self::Gateway)): the gateway refused the operation; local
///   state was not modified
/// - **Store errors** ([`Store`](Self::Store)): the remote side already changed, the local record
///   must be saved again
/// - **Configuration errors** ([`Config`](Self::Config)): fix the configuration and restart
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The gateway answered with an error payload.
    ///
    /// Raised for lifecycle operations (`swap`, `cancel`, `cancel_now`, `resume`) so that the
    /// local record is never updated after a refused remote mutation.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// HTTP request to the gateway failed.
    ///
    /// Covers timeouts, refused connections, DNS and TLS errors.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The local record store failed to persist a subscription.
    ///
    /// When this follows a successful remote call, the two representations disagree until the
    /// record is saved again.
    #[error("record store error: {0}")]
    Store(String),

    /// Invalid configuration value.
    ///
    /// # Examples
    ///
    /// ```
    /// use gu_payment::error::PaymentError;
    ///
    /// let err = PaymentError::Config("column name cannot be empty".to_string());
    /// assert!(err.to_string().contains("invalid configuration"));
    /// ```
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed input, such as an unreadable TOML document.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A gateway payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
