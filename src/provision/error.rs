//! Errors surfaced by instance provisioning.

use thiserror::Error;

use crate::address::AllocationError;
use crate::error::ValidationError;
use crate::random::RandomError;
use crate::user_data::UserDataError;

/// Errors surfaced while describing an instance to a deployment engine.
#[derive(Debug, Error)]
pub enum ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Raised when the request is malformed or contradictory. Never retried.
    #[error("invalid instance request: {0}")]
    Validation(#[from] ValidationError),
    /// Raised when a stable random value cannot be drawn or replayed.
    #[error("failed to draw a stable value: {0}")]
    Random(#[source] RandomError),
    /// Raised when the bootstrap document cannot be rendered.
    #[error("failed to compose user data: {0}")]
    UserData(#[source] UserDataError),
    /// Raised when the authoritative subnet's ranges are not known while
    /// the graph is built.
    #[error("subnet {subnet} output `{key}` is not resolved; address derivation needs its value")]
    UnresolvedSubnet {
        /// Subnet identifier.
        subnet: String,
        /// Output that was not resolved.
        key: String,
    },
    /// Raised by the deployment engine; propagated unchanged.
    #[error("deployment engine error: {0}")]
    Engine(#[source] EngineError),
}

impl<EngineError> From<AllocationError> for ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::Validation(err) => Self::Validation(err),
            AllocationError::Random(err) => Self::Random(err),
        }
    }
}

impl<EngineError> From<RandomError> for ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    fn from(value: RandomError) -> Self {
        Self::Random(value)
    }
}

impl<EngineError> From<UserDataError> for ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    fn from(value: UserDataError) -> Self {
        Self::UserData(value)
    }
}
