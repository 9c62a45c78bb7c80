//! Query execution boundary.
//!
//! The wire protocol belongs to the database driver. Everything in this
//! crate talks to a member through these traits only.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use halin_advisor::Record;

/// Named query parameters.
pub type Params = serde_json::Map<String, Value>;

const FORBIDDEN_CODE: &str = "Neo.ClientError.Security.Forbidden";
const UNAUTHORIZED_CODE: &str = "Neo.ClientError.Security.AuthorizationExpired";

/// Failures reported by a driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The connected user may not run this query.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The server rejected or failed the query.
    #[error("query failed [{code}]: {message}")]
    Query {
        /// Server status code.
        code: String,
        /// Server message.
        message: String,
    },

    /// The member could not be reached.
    #[error("connection error: {0}")]
    Connection(String),
}

impl DriverError {
    /// Classifies a server failure by its status code.
    pub fn from_status(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == FORBIDDEN_CODE || code == UNAUTHORIZED_CODE {
            DriverError::PermissionDenied(message)
        } else {
            DriverError::Query {
                code: code.to_string(),
                message,
            }
        }
    }

    /// Whether the failure was a permission check.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DriverError::PermissionDenied(_))
    }

    /// Whether the member itself was unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, DriverError::Connection(_))
    }
}

/// A borrowed connection from a member's pool.
#[async_trait]
pub trait Session: Send {
    /// Runs one query and collects every row.
    async fn run(&mut self, query: &str, params: &Params) -> Result<Vec<Record>, DriverError>;

    /// Returns the connection to its pool.
    async fn close(&mut self);
}

/// Connection pool for one member.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Borrows a session against `database`.
    async fn session(&self, database: &str) -> Result<Box<dyn Session>, DriverError>;

    /// Releases every pooled connection.
    async fn close(&self);
}

/// Opens a pool per member address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `address`.
    async fn connect(&self, address: &str) -> Result<Arc<dyn Driver>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_status_is_permission_denied() {
        let err = DriverError::from_status(FORBIDDEN_CODE, "no");
        assert!(err.is_permission_denied());
        assert!(!err.is_connection());
    }

    #[test]
    fn test_other_status_is_query_error() {
        let err = DriverError::from_status("Neo.ClientError.Procedure.ProcedureNotFound", "nope");
        assert_eq!(
            err,
            DriverError::Query {
                code: "Neo.ClientError.Procedure.ProcedureNotFound".to_string(),
                message: "nope".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "query failed [Neo.ClientError.Procedure.ProcedureNotFound]: nope"
        );
    }
}
