//! Resource descriptors and request payloads exchanged with the compute API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{AttachmentId, BootVolumeId, ImageId, InstanceId, VnicId};
use super::state::{AttachmentState, BootVolumeState, ImageState, InstanceState};

/// Free-form key/value tags attached to an image.
pub type FreeformTags = BTreeMap<String, String>;

/// Namespaced tags: namespace -> key -> value.
pub type DefinedTags = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Snapshot of a compute instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider identifier.
    pub id: InstanceId,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Availability domain hosting the instance.
    pub availability_domain: String,
    /// Shape (machine type) of the instance.
    pub shape: String,
    /// Display name, when one was set.
    pub display_name: Option<String>,
}

/// Where a new instance gets its boot disk from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type")]
pub enum InstanceSource {
    /// Boot from an image, provisioning a fresh boot volume of the given size.
    #[serde(rename = "image")]
    FromImage {
        /// Image to boot from.
        image_id: ImageId,
        /// Size of the boot volume created for the instance.
        boot_volume_size_gb: u64,
    },
    /// Boot from an existing boot volume.
    #[serde(rename = "bootVolume")]
    FromBootVolume {
        /// Volume to boot from.
        boot_volume_id: BootVolumeId,
    },
}

/// Launch request for a new instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LaunchInstanceDetails {
    /// Availability domain to place the instance in.
    pub availability_domain: String,
    /// Compartment owning the instance.
    pub compartment_id: String,
    /// Shape to launch.
    pub shape: String,
    /// Subnet for the primary network interface.
    pub subnet_id: String,
    /// Optional display name; the provider picks one when absent.
    pub display_name: Option<String>,
    /// Instance metadata (authorised keys, user data, custom entries).
    pub metadata: BTreeMap<String, String>,
    /// Boot source.
    pub source: InstanceSource,
}

/// Filter used to look images up by display name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageFilter {
    /// Compartment to search.
    pub compartment_id: String,
    /// Exact display name to match.
    pub display_name: String,
}

/// Snapshot of an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Provider identifier.
    pub id: ImageId,
    /// Current lifecycle state.
    pub state: ImageState,
    /// Display name.
    pub display_name: String,
    /// Free-form tags.
    #[serde(default)]
    pub freeform_tags: FreeformTags,
    /// Namespaced tags.
    #[serde(default)]
    pub defined_tags: DefinedTags,
}

/// Request to capture a custom image from an instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateImageDetails {
    /// Compartment owning the new image.
    pub compartment_id: String,
    /// Instance whose boot disk is captured.
    pub instance_id: InstanceId,
    /// Display name for the image.
    pub display_name: String,
    /// Free-form tags.
    pub freeform_tags: FreeformTags,
    /// Namespaced tags.
    pub defined_tags: DefinedTags,
}

/// Snapshot of a boot volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BootVolume {
    /// Provider identifier.
    pub id: BootVolumeId,
    /// Current lifecycle state.
    pub state: BootVolumeState,
    /// Size in gigabytes.
    pub size_gb: u64,
    /// Volume this one was cloned from, if any.
    pub source_volume_id: Option<BootVolumeId>,
}

/// Request to clone a boot volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CreateBootVolumeDetails {
    /// Availability domain for the clone (must match the source).
    pub availability_domain: String,
    /// Compartment owning the clone.
    pub compartment_id: String,
    /// Boot volume to clone.
    pub source_boot_volume_id: BootVolumeId,
    /// Size of the clone.
    pub size_gb: u64,
}

/// Filter used to find the boot volume currently backing an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootVolumeAttachmentFilter {
    /// Availability domain of the instance.
    pub availability_domain: String,
    /// Compartment of the instance.
    pub compartment_id: String,
    /// Instance whose boot volume attachment is wanted.
    pub instance_id: InstanceId,
}

/// Relation between an instance and the boot volume it booted from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BootVolumeAttachment {
    /// Instance side of the relation.
    pub instance_id: InstanceId,
    /// Boot volume side of the relation.
    pub boot_volume_id: BootVolumeId,
}

/// Paravirtualized attach request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttachVolumeDetails {
    /// Instance receiving the volume.
    pub instance_id: InstanceId,
    /// Volume to attach.
    pub volume_id: BootVolumeId,
}

/// Snapshot of a volume attachment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    /// Attachment identifier used for detach and polling.
    pub id: AttachmentId,
    /// Instance the volume is attached to.
    pub instance_id: InstanceId,
    /// Attached volume.
    pub volume_id: BootVolumeId,
    /// Current lifecycle state.
    pub state: AttachmentState,
}

/// Filter used to list network interface attachments of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VnicAttachmentFilter {
    /// Compartment of the instance.
    pub compartment_id: String,
    /// Instance whose interfaces are listed.
    pub instance_id: InstanceId,
}

/// Relation between an instance and one of its network interfaces.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VnicAttachment {
    /// Network interface identifier.
    pub vnic_id: VnicId,
    /// Owning instance.
    pub instance_id: InstanceId,
}

/// Network interface details.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vnic {
    /// Provider identifier.
    pub id: VnicId,
    /// Private address; always assigned.
    pub private_ip: String,
    /// Public address, when the subnet assigns one.
    pub public_ip: Option<String>,
}

/// Initial login generated by the provider for password-based images.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstanceCredentials {
    /// Login name.
    pub username: String,
    /// One-time password.
    pub password: String,
}

impl fmt::Debug for InstanceCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InstanceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = InstanceCredentials {
            username: String::from("opc"),
            password: String::from("hunter2"),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("opc"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn instance_source_serialises_with_tag() {
        let source = InstanceSource::FromBootVolume {
            boot_volume_id: BootVolumeId::from("bv-1"),
        };
        let json = serde_json::to_string(&source).unwrap_or_else(|err| panic!("serialise: {err}"));
        assert!(json.contains(r#""source_type":"bootVolume""#), "{json}");
        assert!(json.contains("bv-1"));
    }
}
