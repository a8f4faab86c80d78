//! Custom image capture.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{DriverError, cancellable};
use crate::compute::{
    ComputeApi, CreateImageDetails, DefinedTags, FreeformTags, Image, ImageId, ImageState,
    InstanceId,
};
use crate::poll::{self, StateExpectation, WaitPolicy};

/// Display name and tags applied to captured images.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Compartment owning captured images.
    pub compartment_id: String,
    /// Display name of the captured image.
    pub image_name: String,
    /// Free-form tags.
    pub freeform_tags: FreeformTags,
    /// Namespaced tags.
    pub defined_tags: DefinedTags,
}

impl CaptureConfig {
    /// Untagged capture settings.
    #[must_use]
    pub fn new(compartment_id: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            compartment_id: compartment_id.into(),
            image_name: image_name.into(),
            freeform_tags: FreeformTags::new(),
            defined_tags: DefinedTags::new(),
        }
    }
}

/// Captures and deletes custom images.
pub struct ImageManager<C> {
    api: Arc<C>,
    compartment_id: String,
    policy: WaitPolicy,
}

impl<C> ImageManager<C>
where
    C: ComputeApi,
{
    /// Creates a manager scoped to `compartment_id`.
    #[must_use]
    pub const fn new(api: Arc<C>, compartment_id: String, policy: WaitPolicy) -> Self {
        Self {
            api,
            compartment_id,
            policy,
        }
    }

    /// Starts capturing an image of `instance_id` and returns its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn capture(
        &self,
        ctx: &CancellationToken,
        instance_id: &InstanceId,
        display_name: &str,
        freeform_tags: &FreeformTags,
        defined_tags: &DefinedTags,
    ) -> Result<Image, DriverError<C::Error>> {
        let details = CreateImageDetails {
            compartment_id: self.compartment_id.clone(),
            instance_id: instance_id.clone(),
            display_name: display_name.to_owned(),
            freeform_tags: freeform_tags.clone(),
            defined_tags: defined_tags.clone(),
        };
        let image = cancellable(ctx, "create image", self.api.create_image(&details)).await?;
        info!(image_id = %image.id, %instance_id, display_name, "capturing image");
        Ok(image)
    }

    /// Deletes an image.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Api`] when the call fails.
    pub async fn delete(
        &self,
        ctx: &CancellationToken,
        image_id: &ImageId,
    ) -> Result<(), DriverError<C::Error>> {
        cancellable(ctx, "delete image", self.api.delete_image(image_id)).await?;
        info!(%image_id, "deleted image");
        Ok(())
    }

    /// Waits for a capture to finish.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Wait`] when polling fails.
    pub async fn wait_until_available(
        &self,
        ctx: &CancellationToken,
        image_id: &ImageId,
    ) -> Result<(), DriverError<C::Error>> {
        let expectation = StateExpectation::new([ImageState::Provisioning], ImageState::Available);
        let api = self.api.as_ref();
        let resource = format!("image {image_id}");
        poll::wait_for_state(ctx, &resource, self.policy, &expectation, move || async move {
            api.get_image(image_id).await.map(|image| image.state)
        })
        .await?;
        Ok(())
    }
}
