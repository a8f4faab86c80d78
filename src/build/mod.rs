//! End-to-end image build.
//!
//! [`BuildOrchestrator::execute`] launches a build instance, hands it to a
//! [`Provisioner`], captures an image and tears the instance down.
//!
//! With clone-and-swap enabled the build instance acts as a surrogate: its
//! boot volume is cloned and the clone attached to it, so the provisioner
//! works on the clone as a data volume. The clone is then detached, a second
//! instance boots from it, and the image is captured from that instance.
//!
//! When any stage fails, everything the run still owns is rolled back on a
//! best-effort basis and the original error is returned.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::compute::{
    AttachmentId, AttachmentState, BootVolumeId, BootVolumeState, ComputeApi, Image, InstanceId,
    InstanceState,
};
use crate::driver::ComputeDriver;

mod cleanup;
mod error;
mod provision;

use cleanup::{CreatedResources, rollback};
use error::StageContext as _;
pub use error::BuildError;
pub use provision::{
    NoopProvisioner, ProvisionError, ProvisionFuture, ProvisionTarget, Provisioner,
};

const INSTANCE_STARTING: [InstanceState; 2] =
    [InstanceState::Provisioning, InstanceState::Starting];
const INSTANCE_STOPPING: [InstanceState; 4] = [
    InstanceState::Running,
    InstanceState::Stopping,
    InstanceState::Stopped,
    InstanceState::Terminating,
];
const VOLUME_SETTLING: [BootVolumeState; 2] =
    [BootVolumeState::Provisioning, BootVolumeState::Restoring];
const ATTACHING: [AttachmentState; 1] = [AttachmentState::Attaching];
const DETACHING: [AttachmentState; 2] = [AttachmentState::Attached, AttachmentState::Detaching];

/// Steps of a build, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BuildStage {
    /// Launching the build instance.
    LaunchInstance,
    /// Waiting for the instance to run.
    AwaitInstanceRunning,
    /// Cloning the instance's boot volume.
    CloneBootVolume,
    /// Waiting for the clone to become available.
    AwaitBootClone,
    /// Attaching the clone to the instance.
    AttachBootClone,
    /// Waiting for the attachment to settle.
    AwaitAttachment,
    /// Resolving the address and running the provisioner.
    Provision,
    /// Detaching the clone from the build instance.
    DetachBootClone,
    /// Waiting for the clone to detach.
    AwaitDetachment,
    /// Launching an instance that boots from the clone.
    LaunchFromClone,
    /// Waiting for the clone-booted instance to run.
    AwaitCloneInstanceRunning,
    /// Requesting the image capture.
    CaptureImage,
    /// Waiting for the image to become available.
    AwaitImage,
    /// Requesting instance termination.
    TerminateInstance,
    /// Waiting for the instance to terminate.
    AwaitTermination,
}

impl BuildStage {
    /// Short human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LaunchInstance => "launch instance",
            Self::AwaitInstanceRunning => "await instance running",
            Self::CloneBootVolume => "clone boot volume",
            Self::AwaitBootClone => "await boot clone",
            Self::AttachBootClone => "attach boot clone",
            Self::AwaitAttachment => "await attachment",
            Self::Provision => "provision",
            Self::DetachBootClone => "detach boot clone",
            Self::AwaitDetachment => "await detachment",
            Self::LaunchFromClone => "launch from clone",
            Self::AwaitCloneInstanceRunning => "await clone instance running",
            Self::CaptureImage => "capture image",
            Self::AwaitImage => "await image",
            Self::TerminateInstance => "terminate instance",
            Self::AwaitTermination => "await termination",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Per-build inputs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildRequest {
    /// Public key installed as the instance's authorised SSH key.
    pub public_key: String,
    /// Provision a boot volume clone through the build instance and capture
    /// the image from an instance booted off that clone.
    pub clone_boot_volume: bool,
    /// Fetch provider-generated credentials for the provisioner.
    pub fetch_initial_credentials: bool,
}

impl BuildRequest {
    /// Request with only an SSH key.
    #[must_use]
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            ..Self::default()
        }
    }

    /// Enables the clone-and-swap path.
    #[must_use]
    pub const fn with_boot_clone(mut self, enabled: bool) -> Self {
        self.clone_boot_volume = enabled;
        self
    }

    /// Enables fetching initial credentials.
    #[must_use]
    pub const fn with_initial_credentials(mut self, enabled: bool) -> Self {
        self.fetch_initial_credentials = enabled;
        self
    }
}

/// Result of a successful build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildOutcome {
    /// Captured image, available.
    pub image: Image,
    /// Build instance, terminated.
    pub instance_id: InstanceId,
    /// Instance booted from the clone that the image was captured from;
    /// terminated, together with its boot volume.
    pub clone_instance_id: Option<InstanceId>,
    /// Boot volume clone provisioned during the build.
    pub boot_clone: Option<BootVolumeId>,
}

/// Runs image builds against a [`ComputeDriver`].
pub struct BuildOrchestrator<C, P> {
    driver: ComputeDriver<C>,
    provisioner: P,
}

struct CloneSwap {
    volume_id: BootVolumeId,
    attachment_id: AttachmentId,
}

impl<C, P> BuildOrchestrator<C, P>
where
    C: ComputeApi,
    P: Provisioner,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(driver: ComputeDriver<C>, provisioner: P) -> Self {
        Self {
            driver,
            provisioner,
        }
    }

    /// Driver used for every remote call.
    #[must_use]
    pub const fn driver(&self) -> &ComputeDriver<C> {
        &self.driver
    }

    /// Runs the build to completion.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] naming the stage that failed. Cleanup has run by
    /// then; its own failures are only logged.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, BuildError<C::Error>> {
        let mut created = CreatedResources::default();
        match self.run(ctx, request, &mut created).await {
            Ok(outcome) => {
                info!(image_id = %outcome.image.id, "image build complete");
                Ok(outcome)
            }
            Err(err) => {
                warn!(stage = %err.stage(), error = %err, "image build failed; cleaning up");
                rollback(&self.driver, &created).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        request: &BuildRequest,
        created: &mut CreatedResources,
    ) -> Result<BuildOutcome, BuildError<C::Error>> {
        let instance_id = self.launch(ctx, request, created).await?;

        let swap = if request.clone_boot_volume {
            Some(self.attach_clone(ctx, &instance_id, created).await?)
        } else {
            None
        };

        self.provision(ctx, request, &instance_id, swap.as_ref())
            .await?;

        let clone_instance_id = match &swap {
            Some(active) => Some(self.boot_from_clone(ctx, request, active, created).await?),
            None => None,
        };
        let source = clone_instance_id.as_ref().unwrap_or(&instance_id);
        let image = self.capture(ctx, source, created).await?;

        if let Some(clone_instance) = &clone_instance_id {
            self.terminate(ctx, clone_instance, &mut created.clone_instance)
                .await?;
        }
        self.terminate(ctx, &instance_id, &mut created.instance)
            .await?;

        created.image = None;
        Ok(BuildOutcome {
            image,
            instance_id,
            clone_instance_id,
            boot_clone: swap.map(|released| released.volume_id),
        })
    }

    async fn launch(
        &self,
        ctx: &CancellationToken,
        request: &BuildRequest,
        created: &mut CreatedResources,
    ) -> Result<InstanceId, BuildError<C::Error>> {
        enter(BuildStage::LaunchInstance);
        let instance_id = self
            .driver
            .create_instance(ctx, &request.public_key, None)
            .await
            .at(BuildStage::LaunchInstance)?;
        created.instance = Some(instance_id.clone());

        enter(BuildStage::AwaitInstanceRunning);
        self.driver
            .wait_for_instance_state(ctx, &instance_id, &INSTANCE_STARTING, InstanceState::Running)
            .await
            .at(BuildStage::AwaitInstanceRunning)?;
        Ok(instance_id)
    }

    async fn attach_clone(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        created: &mut CreatedResources,
    ) -> Result<CloneSwap, BuildError<C::Error>> {
        let driver = &self.driver;

        enter(BuildStage::CloneBootVolume);
        let volume_id = driver
            .create_boot_clone(ctx, instance_id)
            .await
            .at(BuildStage::CloneBootVolume)?;
        created.boot_clone = Some(volume_id.clone());

        enter(BuildStage::AwaitBootClone);
        driver
            .wait_for_boot_volume_state(
                ctx,
                &volume_id,
                &VOLUME_SETTLING,
                BootVolumeState::Available,
            )
            .await
            .at(BuildStage::AwaitBootClone)?;

        enter(BuildStage::AttachBootClone);
        let attachment_id = driver
            .attach_boot_clone(ctx, instance_id, &volume_id)
            .await
            .at(BuildStage::AttachBootClone)?;
        created.attachment = Some(attachment_id.clone());

        enter(BuildStage::AwaitAttachment);
        driver
            .wait_for_volume_attachment_state(
                ctx,
                &attachment_id,
                &ATTACHING,
                AttachmentState::Attached,
            )
            .await
            .at(BuildStage::AwaitAttachment)?;

        Ok(CloneSwap {
            volume_id,
            attachment_id,
        })
    }

    async fn provision(
        &self,
        ctx: &CancellationToken,
        request: &BuildRequest,
        instance_id: &InstanceId,
        swap: Option<&CloneSwap>,
    ) -> Result<(), BuildError<C::Error>> {
        enter(BuildStage::Provision);
        let address = self
            .driver
            .get_instance_ip(ctx, instance_id)
            .await
            .at(BuildStage::Provision)?;
        let credentials = if request.fetch_initial_credentials {
            Some(
                self.driver
                    .get_instance_initial_credentials(ctx, instance_id)
                    .await
                    .at(BuildStage::Provision)?,
            )
        } else {
            None
        };

        let target = ProvisionTarget {
            instance_id: instance_id.clone(),
            address,
            credentials,
            boot_clone_attachment: swap.map(|attached| attached.attachment_id.clone()),
        };
        info!(%instance_id, address = %target.address, "provisioning build instance");

        let outcome = tokio::select! {
            biased;
            () = ctx.cancelled() => Err(ProvisionError::Cancelled),
            outcome = self.provisioner.provision(ctx, &target) => outcome,
        };
        outcome.map_err(|source| BuildError::Provision { source })
    }

    /// Detaches the provisioned clone and boots a fresh instance from it.
    async fn boot_from_clone(
        &self,
        ctx: &CancellationToken,
        request: &BuildRequest,
        swap: &CloneSwap,
        created: &mut CreatedResources,
    ) -> Result<InstanceId, BuildError<C::Error>> {
        let driver = &self.driver;

        enter(BuildStage::DetachBootClone);
        let attachment_id = driver
            .detach_boot_clone(ctx, &swap.attachment_id)
            .await
            .at(BuildStage::DetachBootClone)?;

        enter(BuildStage::AwaitDetachment);
        driver
            .wait_for_volume_attachment_state(
                ctx,
                &attachment_id,
                &DETACHING,
                AttachmentState::Detached,
            )
            .await
            .at(BuildStage::AwaitDetachment)?;
        created.attachment = None;

        enter(BuildStage::LaunchFromClone);
        let instance_id = driver
            .create_instance(ctx, &request.public_key, Some(&swap.volume_id))
            .await
            .at(BuildStage::LaunchFromClone)?;
        // The clone is now the instance's boot volume and goes with it.
        created.boot_clone = None;
        created.clone_instance = Some(instance_id.clone());

        enter(BuildStage::AwaitCloneInstanceRunning);
        driver
            .wait_for_instance_state(ctx, &instance_id, &INSTANCE_STARTING, InstanceState::Running)
            .await
            .at(BuildStage::AwaitCloneInstanceRunning)?;
        Ok(instance_id)
    }

    async fn capture(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        created: &mut CreatedResources,
    ) -> Result<Image, BuildError<C::Error>> {
        enter(BuildStage::CaptureImage);
        let image = self
            .driver
            .create_image(ctx, instance_id)
            .await
            .at(BuildStage::CaptureImage)?;
        created.image = Some(image.id.clone());

        enter(BuildStage::AwaitImage);
        self.driver
            .wait_for_image_creation(ctx, &image.id)
            .await
            .at(BuildStage::AwaitImage)?;
        Ok(image)
    }

    /// Terminates `instance_id`, clearing `owned` once the request is accepted.
    async fn terminate(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        owned: &mut Option<InstanceId>,
    ) -> Result<(), BuildError<C::Error>> {
        enter(BuildStage::TerminateInstance);
        self.driver
            .terminate_instance(ctx, instance_id)
            .await
            .at(BuildStage::TerminateInstance)?;
        *owned = None;

        enter(BuildStage::AwaitTermination);
        self.driver
            .wait_for_instance_state(
                ctx,
                instance_id,
                &INSTANCE_STOPPING,
                InstanceState::Terminated,
            )
            .await
            .at(BuildStage::AwaitTermination)
    }
}

fn enter(stage: BuildStage) {
    info!(%stage, "build stage");
}
