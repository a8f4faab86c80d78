//! Resource managers and the driver facade over them.
//!
//! [`ComputeDriver`] bundles an [`InstanceManager`], a [`BootVolumeManager`]
//! and an [`ImageManager`] that share one [`ComputeApi`] client. Every call
//! takes a [`CancellationToken`]; remote calls and poll sleeps are raced
//! against it, and a cancelled token drops the in-flight request.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::compute::{
    AttachmentId, AttachmentState, BootVolumeId, BootVolumeState, ComputeApi, DefinedTags, Image,
    ImageId, InstanceCredentials, InstanceId, InstanceState,
};
use crate::poll::WaitPolicy;

/// Polls allowed for each wait made while rolling back a failed build.
pub const DEFAULT_CLEANUP_POLL_RETRIES: u32 = 60;

mod error;
mod image;
mod instance;
mod volume;

pub use error::DriverError;
pub use image::{CaptureConfig, ImageManager};
pub use instance::{
    BaseImage, InstanceManager, LaunchConfig, SSH_AUTHORIZED_KEYS_KEY, USER_DATA_KEY,
};
pub use volume::{BootVolumeManager, CloneConfig};

/// Explicit settings for every manager owned by a [`ComputeDriver`].
#[derive(Clone, Debug, PartialEq)]
pub struct DriverConfig {
    /// Launch settings.
    pub launch: LaunchConfig,
    /// Boot volume clone settings.
    pub clone: CloneConfig,
    /// Image capture settings.
    pub capture: CaptureConfig,
    /// Whether [`ComputeDriver::get_instance_ip`] returns the private address.
    pub use_private_ip: bool,
    /// Polling policy shared by every wait.
    pub wait: WaitPolicy,
    /// Polling policy for waits made during rollback. Keep it bounded: a
    /// rollback runs after the caller's token may already be cancelled.
    pub cleanup_wait: WaitPolicy,
}

impl DriverConfig {
    /// Adds instance metadata entries, replacing existing keys.
    #[must_use]
    pub fn with_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.launch.metadata.extend(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        self
    }

    /// Adds free-form tags to captured images, replacing existing keys.
    #[must_use]
    pub fn with_freeform_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.capture.freeform_tags.extend(
            tags.into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        self
    }

    /// Adds namespaced tags to captured images, merging per namespace.
    #[must_use]
    pub fn with_defined_tags(mut self, tags: DefinedTags) -> Self {
        for (namespace, entries) in tags {
            self.capture
                .defined_tags
                .entry(namespace)
                .or_default()
                .extend(entries);
        }
        self
    }

    /// Replaces the polling policy.
    #[must_use]
    pub const fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait = policy;
        self
    }

    /// Replaces the rollback polling policy.
    #[must_use]
    pub const fn with_cleanup_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.cleanup_wait = policy;
        self
    }
}

/// Facade exposing every resource operation an image build needs.
pub struct ComputeDriver<C> {
    instances: InstanceManager<C>,
    volumes: BootVolumeManager<C>,
    images: ImageManager<C>,
    capture: CaptureConfig,
    use_private_ip: bool,
    cleanup_wait: WaitPolicy,
}

impl<C> ComputeDriver<C>
where
    C: ComputeApi,
{
    /// Builds the managers around a shared client.
    #[must_use]
    pub fn new(api: Arc<C>, config: DriverConfig) -> Self {
        let DriverConfig {
            launch,
            clone,
            capture,
            use_private_ip,
            wait,
            cleanup_wait,
        } = config;
        Self {
            instances: InstanceManager::new(Arc::clone(&api), launch, wait),
            volumes: BootVolumeManager::new(Arc::clone(&api), clone, wait),
            images: ImageManager::new(api, capture.compartment_id.clone(), wait),
            capture,
            use_private_ip,
            cleanup_wait,
        }
    }

    /// Polling policy for waits made during rollback.
    #[must_use]
    pub const fn cleanup_wait_policy(&self) -> WaitPolicy {
        self.cleanup_wait
    }

    /// Instance manager.
    #[must_use]
    pub const fn instances(&self) -> &InstanceManager<C> {
        &self.instances
    }

    /// Boot volume manager.
    #[must_use]
    pub const fn volumes(&self) -> &BootVolumeManager<C> {
        &self.volumes
    }

    /// Image manager.
    #[must_use]
    pub const fn images(&self) -> &ImageManager<C> {
        &self.images
    }

    /// See [`InstanceManager::create`].
    ///
    /// # Errors
    ///
    /// Propagates [`InstanceManager::create`] failures.
    pub async fn create_instance(
        &self,
        ctx: &CancellationToken,
        public_key: &str,
        source_volume: Option<&BootVolumeId>,
    ) -> Result<InstanceId, DriverError<C::Error>> {
        self.instances.create(ctx, public_key, source_volume).await
    }

    /// See [`BootVolumeManager::clone_from_instance`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::clone_from_instance`] failures.
    pub async fn create_boot_clone(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<BootVolumeId, DriverError<C::Error>> {
        self.volumes.clone_from_instance(ctx, instance_id).await
    }

    /// See [`BootVolumeManager::attach`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::attach`] failures.
    pub async fn attach_boot_clone(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        volume_id: &BootVolumeId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        self.volumes.attach(ctx, instance_id, volume_id).await
    }

    /// See [`BootVolumeManager::detach`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::detach`] failures.
    pub async fn detach_boot_clone(
        &self,
        ctx: &CancellationToken,
        attachment_id: &AttachmentId,
    ) -> Result<AttachmentId, DriverError<C::Error>> {
        self.volumes.detach(ctx, attachment_id).await
    }

    /// Captures an image of `instance_id` with the configured name and tags.
    ///
    /// # Errors
    ///
    /// Propagates [`ImageManager::capture`] failures.
    pub async fn create_image(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<Image, DriverError<C::Error>> {
        self.images
            .capture(
                ctx,
                instance_id,
                &self.capture.image_name,
                &self.capture.freeform_tags,
                &self.capture.defined_tags,
            )
            .await
    }

    /// See [`ImageManager::delete`].
    ///
    /// # Errors
    ///
    /// Propagates [`ImageManager::delete`] failures.
    pub async fn delete_image(
        &self,
        ctx: &CancellationToken,
        image_id: &ImageId,
    ) -> Result<(), DriverError<C::Error>> {
        self.images.delete(ctx, image_id).await
    }

    /// Returns the configured (private or public) address of the instance.
    ///
    /// # Errors
    ///
    /// Propagates [`InstanceManager::ip_address`] failures.
    pub async fn get_instance_ip(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<String, DriverError<C::Error>> {
        self.instances
            .ip_address(ctx, instance_id, self.use_private_ip)
            .await
    }

    /// See [`InstanceManager::initial_credentials`].
    ///
    /// # Errors
    ///
    /// Propagates [`InstanceManager::initial_credentials`] failures.
    pub async fn get_instance_initial_credentials(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, DriverError<C::Error>> {
        self.instances.initial_credentials(ctx, instance_id).await
    }

    /// See [`InstanceManager::terminate`].
    ///
    /// # Errors
    ///
    /// Propagates [`InstanceManager::terminate`] failures.
    pub async fn terminate_instance(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
    ) -> Result<(), DriverError<C::Error>> {
        self.instances.terminate(ctx, instance_id).await
    }

    /// See [`BootVolumeManager::delete`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::delete`] failures.
    pub async fn delete_boot_volume(
        &self,
        ctx: &CancellationToken,
        volume_id: &BootVolumeId,
    ) -> Result<(), DriverError<C::Error>> {
        self.volumes.delete(ctx, volume_id).await
    }

    /// See [`ImageManager::wait_until_available`].
    ///
    /// # Errors
    ///
    /// Propagates [`ImageManager::wait_until_available`] failures.
    pub async fn wait_for_image_creation(
        &self,
        ctx: &CancellationToken,
        image_id: &ImageId,
    ) -> Result<(), DriverError<C::Error>> {
        self.images.wait_until_available(ctx, image_id).await
    }

    /// See [`InstanceManager::wait_for_state`].
    ///
    /// # Errors
    ///
    /// Propagates [`InstanceManager::wait_for_state`] failures.
    pub async fn wait_for_instance_state(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        waiting: &[InstanceState],
        terminal: InstanceState,
    ) -> Result<(), DriverError<C::Error>> {
        self.instances
            .wait_for_state(ctx, instance_id, waiting, terminal)
            .await
    }

    /// See [`BootVolumeManager::wait_for_state`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::wait_for_state`] failures.
    pub async fn wait_for_boot_volume_state(
        &self,
        ctx: &CancellationToken,
        volume_id: &BootVolumeId,
        waiting: &[BootVolumeState],
        terminal: BootVolumeState,
    ) -> Result<(), DriverError<C::Error>> {
        self.volumes
            .wait_for_state(ctx, volume_id, waiting, terminal)
            .await
    }

    /// See [`BootVolumeManager::wait_for_attachment_state`].
    ///
    /// # Errors
    ///
    /// Propagates [`BootVolumeManager::wait_for_attachment_state`] failures.
    pub async fn wait_for_volume_attachment_state(
        &self,
        ctx: &CancellationToken,
        attachment_id: &AttachmentId,
        waiting: &[AttachmentState],
        terminal: AttachmentState,
    ) -> Result<(), DriverError<C::Error>> {
        self.volumes
            .wait_for_attachment_state(ctx, attachment_id, waiting, terminal)
            .await
    }
}

/// Runs a remote call unless `ctx` is cancelled first; cancellation drops it.
async fn cancellable<T, E, Fut>(
    ctx: &CancellationToken,
    operation: &'static str,
    call: Fut,
) -> Result<T, DriverError<E>>
where
    E: std::error::Error + 'static,
    Fut: Future<Output = Result<T, E>>,
{
    if ctx.is_cancelled() {
        return Err(DriverError::Cancelled { operation });
    }
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(DriverError::Cancelled { operation }),
        result = call => result.map_err(DriverError::Api),
    }
}
