//! Instance lifecycle: launch, addressing, credentials and termination.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DriverError, cancellable};
use crate::compute::{
    BootVolumeId, ComputeApi, ImageFilter, ImageId, InstanceCredentials, InstanceId,
    InstanceSource, InstanceState, LaunchInstanceDetails, VnicAttachmentFilter,
};
use crate::poll::{self, StateExpectation, WaitPolicy};

/// Metadata key carrying the authorised SSH public key.
pub const SSH_AUTHORIZED_KEYS_KEY: &str = "ssh_authorized_keys";
/// Metadata key carrying base64 encoded user data.
pub const USER_DATA_KEY: &str = "user_data";

/// How the base image of a fresh launch is selected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BaseImage {
    /// Use this image directly.
    Id(ImageId),
    /// Look the image up by exact display name and use the first match.
    Name(String),
}

/// Settings used when launching build instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchConfig {
    /// Availability domain for the instance.
    pub availability_domain: String,
    /// Compartment owning the instance; also scopes image and VNIC lookups.
    pub compartment_id: String,
    /// Shape to launch.
    pub shape: String,
    /// Subnet for the primary network interface.
    pub subnet_id: String,
    /// Base image selector used when no boot volume source is given.
    pub base_image: BaseImage,
    /// Boot volume size for image-sourced launches.
    pub boot_volume_size_gb: u64,
    /// Optional instance display name.
    pub display_name: Option<String>,
    /// Additional instance metadata. Entries override the SSH key entry.
    pub metadata: BTreeMap<String, String>,
    /// Base64 encoded user data, stored under [`USER_DATA_KEY`].
    pub user_data: Option<String>,
}

/// Manages build instances through the compute API.
pub struct InstanceManager<C> {
    api: Arc<C>,
    config: LaunchConfig,
    policy: WaitPolicy,
}

impl<C> InstanceManager<C>
where
    C: ComputeApi,
{
    /// Creates a manager bound to `api`.
    #[must_use]
    pub const fn new(api: Arc<C>, config: LaunchConfig, policy: WaitPolicy) -> Self {
        Self {
            api,
            config,
            policy,
        }
    }

    /// Launch settings in use.
    #[must_use]
    pub const fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Builds the metadata sent with a launch.
    ///
    /// The SSH key entry comes first, configured metadata overrides it, and
    /// configured user data overrides any `user_data` metadata entry.
    #[must_use]
    pub fn launch_metadata(&self, public_key: &str) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([(
            SSH_AUTHORIZED_KEYS_KEY.to_owned(),
            public_key.to_owned(),
        )]);
        metadata.extend(
            self.config
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        if let Some(user_data) = &self.config.user_data {
            metadata.insert(USER_DATA_KEY.to_owned(), user_data.clone());
        }
        metadata
    }

    /// Launches an instance and returns its id without waiting for it to run.
    ///
    /// With `source_volume` the instance boots from that volume and no image
    /// lookup takes place.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ImageNotFound`] when a base image name matches
    /// nothing, [`DriverError::Api`] when a remote call fails, and
    /// [`DriverError::Cancelled`] when `ctx` is cancelled.
    pub async fn create(
        &self,
        ctx: &CancellationToken,
        public_key: &str,
        source_volume: Option<&BootVolumeId>,
    ) -> Result<InstanceId, DriverError<C::Error>> {
        let source = match source_volume {
            Some(volume_id) => InstanceSource::FromBootVolume {
                boot_volume_id: volume_id.clone(),
            },
            None => InstanceSource::FromImage {
                image_id: self.resolve_base_image(ctx).await?,
                boot_volume_size_gb: self.config.boot_volume_size_gb,
            },
        };

        let details = LaunchInstanceDetails {
            availability_domain: self.config.availability_domain.clone(),
            compartment_id: self.config.compartment_id.clone(),
            shape: self.config.shape.clone(),
            subnet_id: self.config.subnet_id.clone(),
            display_name: self.config.display_name.clone(),
            metadata: self.launch_metadata(public_key),
            source,
        };

        let instance = cancellable(
            ctx,
            "launch instance",
            self.api.launch_instance(&details),
        )
        .await?;
        info!(instance_id = %instance.id, shape = %details.shape, "launched instance");
        Ok(instance.id)
    }

    async fn resolve_base_image(
        &self,
        ctx: &CancellationToken,
    ) -> Result<ImageId, DriverError<C::Error>> {
        let name = match &self.config.base_image {
            BaseImage::Id(id) => return Ok(id.clone()),
            BaseImage::Name(name) => name,
        };

        let filter = ImageFilter {
            compartment_id: self.config.compartment_id.clone(),
            display_name: name.clone(),
        };
        let images = cancellable(ctx, "list images", self.api.list_images(&filter)).await?;
        let image = images
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::ImageNotFound {
                name: name.clone(),
                compartment_id: filter.compartment_id.clone(),
            })?;
        debug!(image_id = %image.id, name, "resolved base image by name");
        Ok(image.id)
    }

    /// Returns the address of the instance's first network interface.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoNetworkInterfaces`] when nothing is attached,
    /// [`DriverError::MissingPublicIp`] when a public address was wanted but
    /// none is assigned, and [`DriverError::Api`] on remote failures.
    pub async fn ip_address(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        prefer_private: bool,
    ) -> Result<String, DriverError<C::Error>> {
        let filter = VnicAttachmentFilter {
            compartment_id: self.config.compartment_id.clone(),
            instance_id: instance_id.clone(),
        };
        let attachments = cancellable(
            ctx,
            "list VNIC attachments",
            self.api.list_vnic_attachments(&filter),
        )
        .await?;
        let attachment =
            attachments
                .into_iter()
                .next()
                .ok_or_else(|| DriverError::NoNetworkInterfaces {
                    instance_id: instance_id.clone(),
                })?;

        let vnic = cancellable(ctx, "get VNIC", self.api.get_vnic(&attachment.vnic_id)).await?;
        if prefer_private {
            return Ok(vnic.private_ip);
        }
        vnic.public_ip
            .filter(|address| !address.is_empty())
            .ok_or_else(|| DriverError::MissingPublicIp {
                instance_id: instance_id.clone(),
            })
    }

    /// Fetches the provider-generated login for password-based images.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn initial_credentials(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, DriverError<C::Error>> {
        cancellable(
            ctx,
            "get initial credentials",
            self.api.get_initial_credentials(instance_id),
        )
        .await
    }

    /// Requests termination. Use [`Self::wait_for_state`] to await it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn terminate(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<(), DriverError<C::Error>> {
        cancellable(
            ctx,
            "terminate instance",
            self.api.terminate_instance(instance_id),
        )
        .await?;
        info!(%instance_id, "requested instance termination");
        Ok(())
    }

    /// Waits until the instance reports `terminal`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Wait`] when polling fails.
    pub async fn wait_for_state(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        waiting: &[InstanceState],
        terminal: InstanceState,
    ) -> Result<(), DriverError<C::Error>> {
        let expectation = StateExpectation::new(waiting.iter().copied(), terminal);
        let api = self.api.as_ref();
        let resource = format!("instance {instance_id}");
        poll::wait_for_state(ctx, &resource, self.policy, &expectation, move || async move {
            api.get_instance(instance_id)
                .await
                .map(|instance| instance.state)
        })
        .await?;
        Ok(())
    }
}
