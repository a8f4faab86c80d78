//! Boot volume cloning, attachment and deletion.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{DriverError, cancellable};
use crate::compute::{
    AttachVolumeDetails, AttachmentId, AttachmentState, BootVolumeAttachmentFilter, BootVolumeId,
    BootVolumeState, ComputeApi, CreateBootVolumeDetails, InstanceId,
};
use crate::poll::{self, StateExpectation, WaitPolicy};

/// Settings for boot volume clones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloneConfig {
    /// Availability domain of the build instance and its clone.
    pub availability_domain: String,
    /// Compartment owning the clone.
    pub compartment_id: String,
    /// Size of the clone in gigabytes.
    pub size_gb: u64,
}

/// Manages boot volume clones and their attachments.
pub struct BootVolumeManager<C> {
    api: Arc<C>,
    config: CloneConfig,
    policy: WaitPolicy,
}

impl<C> BootVolumeManager<C>
where
    C: ComputeApi,
{
    /// Creates a manager bound to `api`.
    #[must_use]
    pub const fn new(api: Arc<C>, config: CloneConfig, policy: WaitPolicy) -> Self {
        Self {
            api,
            config,
            policy,
        }
    }

    /// Clones the boot volume currently backing `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoBootVolumeAttachment`] when the instance has no
    /// boot volume attachment, and [`DriverError::Api`] on remote failures.
    pub async fn clone_from_instance(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<BootVolumeId, DriverError<C::Error>> {
        let filter = BootVolumeAttachmentFilter {
            availability_domain: self.config.availability_domain.clone(),
            compartment_id: self.config.compartment_id.clone(),
            instance_id: instance_id.clone(),
        };
        let attachments = cancellable(
            ctx,
            "list boot volume attachments",
            self.api.list_boot_volume_attachments(&filter),
        )
        .await?;
        let source = attachments.into_iter().next().ok_or_else(|| {
            DriverError::NoBootVolumeAttachment {
                instance_id: instance_id.clone(),
            }
        })?;

        let details = CreateBootVolumeDetails {
            availability_domain: self.config.availability_domain.clone(),
            compartment_id: self.config.compartment_id.clone(),
            source_boot_volume_id: source.boot_volume_id,
            size_gb: self.config.size_gb,
        };
        let volume = cancellable(
            ctx,
            "create boot volume",
            self.api.create_boot_volume(&details),
        )
        .await?;
        info!(
            volume_id = %volume.id,
            source_volume_id = %details.source_boot_volume_id,
            "cloning boot volume"
        );
        Ok(volume.id)
    }

    /// Attaches `volume_id` to `instance_id` and returns the attachment id.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn attach(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        volume_id: &BootVolumeId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        let details = AttachVolumeDetails {
            instance_id: instance_id.clone(),
            volume_id: volume_id.clone(),
        };
        let attachment =
            cancellable(ctx, "attach volume", self.api.attach_volume(&details)).await?;
        info!(
            attachment_id = %attachment.id,
            %instance_id,
            %volume_id,
            "attaching boot volume clone"
        );
        Ok(attachment.id)
    }

    /// Requests removal of an attachment and returns the same id for polling.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn detach(
        &self,
        ctx: &CancellationToken,
        attachment_id: &AttachmentId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        cancellable(ctx, "detach volume", self.api.detach_volume(attachment_id)).await?;
        info!(%attachment_id, "detaching boot volume clone");
        Ok(attachment_id.clone())
    }

    /// Deletes a boot volume.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn delete(
        &self,
        ctx: &CancellationToken,
        volume_id: &BootVolumeId,
    ) -> Result<(), DriverError<C::Error>> {
        cancellable(
            ctx,
            "delete boot volume",
            self.api.delete_boot_volume(volume_id),
        )
        .await?;
        info!(%volume_id, "deleted boot volume");
        Ok(())
    }

    /// Waits until the boot volume reports `terminal`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Wait`] when polling fails.
    pub async fn wait_for_state(
        &self,
        ctx: &CancellationToken,
        volume_id: &BootVolumeId,
        waiting: &[BootVolumeState],
        terminal: BootVolumeState,
    ) -> Result<(), DriverError<C::Error>> {
        let expectation = StateExpectation::new(waiting.iter().copied(), terminal);
        let api = self.api.as_ref();
        let resource = format!("boot volume {volume_id}");
        poll::wait_for_state(ctx, &resource, self.policy, &expectation, move || async move {
            api.get_boot_volume(volume_id)
                .await
                .map(|volume| volume.state)
        })
        .await?;
        Ok(())
    }

    /// Waits until the attachment reports `terminal`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Wait`] when polling fails.
    pub async fn wait_for_attachment_state(
        &self,
        ctx: &CancellationToken,
        attachment_id: &AttachmentId,
        waiting: &[AttachmentState],
        terminal: AttachmentState,
    ) -> Result<(), DriverError<C::Error>> {
        self.wait_for_attachment_state_within(ctx, attachment_id, waiting, terminal, self.policy)
            .await
    }

    /// Like [`Self::wait_for_attachment_state`], but polls under `policy`
    /// instead of the manager's own.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Wait`] when polling fails or `policy` runs out.
    pub async fn wait_for_attachment_state_within(
        &self,
        ctx: &CancellationToken,
        attachment_id: &AttachmentId,
        waiting: &[AttachmentState],
        terminal: AttachmentState,
        policy: WaitPolicy,
    ) -> Result<(), DriverError<C::Error>> {
        let expectation = StateExpectation::new(waiting.iter().copied(), terminal);
        let api = self.api.as_ref();
        let resource = format!("volume attachment {attachment_id}");
        poll::wait_for_state(ctx, &resource, policy, &expectation, move || async move {
            api.get_volume_attachment(attachment_id)
                .await
                .map(|attachment| attachment.state)
        })
        .await?;
        Ok(())
    }
}
