//! Errors raised by the resource managers.

use thiserror::Error;

use crate::compute::InstanceId;
use crate::poll::PollError;

/// Failures surfaced by the driver and its managers.
///
/// Remote failures are carried unchanged in [`DriverError::Api`]; the other
/// variants describe preconditions the remote service did not satisfy.
#[derive(Debug, Error)]
pub enum DriverError<E>
where
    E: std::error::Error + 'static,
{
    /// The compute API rejected or failed a call.
    #[error(transparent)]
    Api(E),
    /// The base image name matched nothing in the compartment.
    #[error("no image named '{name}' found in compartment {compartment_id}")]
    ImageNotFound {
        /// Display name that was searched for.
        name: String,
        /// Compartment that was searched.
        compartment_id: String,
    },
    /// The instance has no network interface attached.
    #[error("instance {instance_id} has no VNIC attachments")]
    NoNetworkInterfaces {
        /// Instance that was inspected.
        instance_id: InstanceId,
    },
    /// The instance has no boot volume attachment to clone from.
    #[error("instance {instance_id} has no boot volume attachment")]
    NoBootVolumeAttachment {
        /// Instance that was inspected.
        instance_id: InstanceId,
    },
    /// A public address was requested but the interface has none.
    #[error("instance {instance_id} has no public IP address")]
    MissingPublicIp {
        /// Instance that was inspected.
        instance_id: InstanceId,
    },
    /// Waiting for a lifecycle state failed.
    #[error(transparent)]
    Wait(PollError<E>),
    /// The caller cancelled an in-flight remote call.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Remote operation that was abandoned.
        operation: &'static str,
    },
}

impl<E> DriverError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns `true` when the failure stems from cancellation, either of a
    /// remote call or of a wait.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. } | Self::Wait(PollError::Cancelled { .. })
        )
    }
}

impl<E> From<PollError<E>> for DriverError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: PollError<E>) -> Self {
        Self::Wait(value)
    }
}
