//! Abstraction over the remote compute service.
//!
//! The crate never talks to a provider directly: it consumes [`ComputeApi`],
//! which a transport crate implements on top of the provider SDK or REST API.
//! Authentication, request signing, and retry on transient network errors are
//! the implementation's responsibility.

use std::future::Future;
use std::pin::Pin;

mod ids;
mod state;
mod types;

pub use ids::{AttachmentId, BootVolumeId, ImageId, InstanceId, VnicId};
pub use state::{AttachmentState, BootVolumeState, ImageState, InstanceState, UnknownState};
pub use types::{
    AttachVolumeDetails, BootVolume, BootVolumeAttachment, BootVolumeAttachmentFilter,
    CreateBootVolumeDetails, CreateImageDetails, DefinedTags, FreeformTags, Image, ImageFilter,
    Instance, InstanceCredentials, InstanceSource, LaunchInstanceDetails, Vnic, VnicAttachment,
    VnicAttachmentFilter, VolumeAttachment,
};

/// Future returned by compute API operations.
pub type ApiFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability set exposed by the cloud provider.
///
/// Every call resolves to a resource descriptor or the implementation's typed
/// error. Callers cancel an in-flight call by dropping its future.
pub trait ComputeApi: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Launches a new instance.
    fn launch_instance<'a>(
        &'a self,
        details: &'a LaunchInstanceDetails,
    ) -> ApiFuture<'a, Instance, Self::Error>;

    /// Requests termination of an instance, boot volume included; returns once
    /// the request is accepted.
    fn terminate_instance<'a>(&'a self, id: &'a InstanceId) -> ApiFuture<'a, (), Self::Error>;

    /// Fetches an instance snapshot.
    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ApiFuture<'a, Instance, Self::Error>;

    /// Lists images matching a display name within a compartment.
    fn list_images<'a>(&'a self, filter: &'a ImageFilter)
    -> ApiFuture<'a, Vec<Image>, Self::Error>;

    /// Fetches an image snapshot.
    fn get_image<'a>(&'a self, id: &'a ImageId) -> ApiFuture<'a, Image, Self::Error>;

    /// Starts capturing a custom image from an instance.
    fn create_image<'a>(
        &'a self,
        details: &'a CreateImageDetails,
    ) -> ApiFuture<'a, Image, Self::Error>;

    /// Deletes an image.
    fn delete_image<'a>(&'a self, id: &'a ImageId) -> ApiFuture<'a, (), Self::Error>;

    /// Creates a boot volume cloned from another boot volume.
    fn create_boot_volume<'a>(
        &'a self,
        details: &'a CreateBootVolumeDetails,
    ) -> ApiFuture<'a, BootVolume, Self::Error>;

    /// Fetches a boot volume snapshot.
    fn get_boot_volume<'a>(&'a self, id: &'a BootVolumeId)
    -> ApiFuture<'a, BootVolume, Self::Error>;

    /// Deletes a boot volume.
    fn delete_boot_volume<'a>(&'a self, id: &'a BootVolumeId) -> ApiFuture<'a, (), Self::Error>;

    /// Attaches a volume to an instance as a paravirtualized device.
    fn attach_volume<'a>(
        &'a self,
        details: &'a AttachVolumeDetails,
    ) -> ApiFuture<'a, VolumeAttachment, Self::Error>;

    /// Requests removal of a volume attachment.
    fn detach_volume<'a>(&'a self, id: &'a AttachmentId) -> ApiFuture<'a, (), Self::Error>;

    /// Fetches a volume attachment snapshot.
    fn get_volume_attachment<'a>(
        &'a self,
        id: &'a AttachmentId,
    ) -> ApiFuture<'a, VolumeAttachment, Self::Error>;

    /// Lists the boot volume attachments of an instance.
    fn list_boot_volume_attachments<'a>(
        &'a self,
        filter: &'a BootVolumeAttachmentFilter,
    ) -> ApiFuture<'a, Vec<BootVolumeAttachment>, Self::Error>;

    /// Lists the network interface attachments of an instance.
    fn list_vnic_attachments<'a>(
        &'a self,
        filter: &'a VnicAttachmentFilter,
    ) -> ApiFuture<'a, Vec<VnicAttachment>, Self::Error>;

    /// Fetches network interface details.
    fn get_vnic<'a>(&'a self, id: &'a VnicId) -> ApiFuture<'a, Vnic, Self::Error>;

    /// Fetches the initial login generated for password-based images.
    fn get_initial_credentials<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ApiFuture<'a, InstanceCredentials, Self::Error>;
}
