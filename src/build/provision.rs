//! Seam through which the surrounding pipeline configures the build instance.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::compute::{AttachmentId, InstanceCredentials, InstanceId};

/// Future returned by [`Provisioner::provision`].
pub type ProvisionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + 'a>>;

/// Everything a provisioner needs to reach the running build instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionTarget {
    /// Build instance.
    pub instance_id: InstanceId,
    /// Address to connect to (private or public per configuration).
    pub address: String,
    /// Provider-generated login, when requested.
    pub credentials: Option<InstanceCredentials>,
    /// Attachment of the boot volume clone, when one was attached.
    pub boot_clone_attachment: Option<AttachmentId>,
}

/// Errors reported by a [`Provisioner`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The provisioning steps failed.
    #[error("{message}")]
    Failed {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Provisioning stopped because the build was cancelled.
    #[error("provisioning was cancelled")]
    Cancelled,
}

impl ProvisionError {
    /// Convenience constructor for [`ProvisionError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Configures the build instance between launch and capture.
pub trait Provisioner: Send + Sync {
    /// Runs the provisioning steps against `target`.
    fn provision<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        target: &'a ProvisionTarget,
    ) -> ProvisionFuture<'a>;
}

/// Provisioner that does nothing; the base image is captured as booted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProvisioner;

impl Provisioner for NoopProvisioner {
    fn provision<'a>(
        &'a self,
        _ctx: &'a CancellationToken,
        _target: &'a ProvisionTarget,
    ) -> ProvisionFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}
