//! Best-effort rollback of resources created by a failed build.

use std::fmt::Display;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::DETACHING;
use crate::compute::{AttachmentId, AttachmentState, BootVolumeId, ComputeApi, ImageId, InstanceId};
use crate::driver::{ComputeDriver, DriverError};

/// Resources a build has created and not yet disposed of.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct CreatedResources {
    pub(super) instance: Option<InstanceId>,
    pub(super) clone_instance: Option<InstanceId>,
    pub(super) boot_clone: Option<BootVolumeId>,
    pub(super) attachment: Option<AttachmentId>,
    pub(super) image: Option<ImageId>,
}

impl CreatedResources {
    const fn is_empty(&self) -> bool {
        self.instance.is_none()
            && self.clone_instance.is_none()
            && self.boot_clone.is_none()
            && self.attachment.is_none()
            && self.image.is_none()
    }
}

/// Disposes of `resources` in reverse creation order.
///
/// Runs under its own token so a cancelled build still cleans up; waits use
/// the driver's bounded cleanup policy so the rollback always finishes.
/// Failures are logged and the affected resources are left behind.
pub(super) async fn rollback<C>(driver: &ComputeDriver<C>, resources: &CreatedResources)
where
    C: ComputeApi,
{
    if resources.is_empty() {
        return;
    }
    let ctx = CancellationToken::new();

    if let Some(image_id) = &resources.image {
        report("image", image_id, driver.delete_image(&ctx, image_id).await);
    }

    if let Some(instance_id) = &resources.clone_instance {
        report(
            "clone instance",
            instance_id,
            driver.terminate_instance(&ctx, instance_id).await,
        );
    }

    let clone_detached = match &resources.attachment {
        Some(attachment_id) => {
            let detached = detach(driver, &ctx, attachment_id).await;
            let released = detached.is_ok();
            report("volume attachment", attachment_id, detached);
            released
        }
        None => true,
    };

    if let Some(volume_id) = &resources.boot_clone {
        if clone_detached {
            report(
                "boot volume",
                volume_id,
                driver.delete_boot_volume(&ctx, volume_id).await,
            );
        } else {
            warn!(%volume_id, "leaving boot volume behind: it is still attached");
        }
    }

    if let Some(instance_id) = &resources.instance {
        report(
            "instance",
            instance_id,
            driver.terminate_instance(&ctx, instance_id).await,
        );
    }
}

async fn detach<C>(
    driver: &ComputeDriver<C>,
    ctx: &CancellationToken,
    attachment_id: &AttachmentId,
) -> Result<(), DriverError<C::Error>>
where
    C: ComputeApi,
{
    let detaching = driver.detach_boot_clone(ctx, attachment_id).await?;
    driver
        .volumes()
        .wait_for_attachment_state_within(
            ctx,
            &detaching,
            &DETACHING,
            AttachmentState::Detached,
            driver.cleanup_wait_policy(),
        )
        .await
}

fn report<E: Display>(kind: &str, id: &impl Display, outcome: Result<(), E>) {
    match outcome {
        Ok(()) => info!(kind, %id, "cleaned up"),
        Err(err) => warn!(kind, %id, error = %err, "cleanup failed; resource may be leaked"),
    }
}
