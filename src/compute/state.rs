//! Lifecycle state vocabularies reported by the compute API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a wire value does not name a known lifecycle state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown {kind} lifecycle state '{value}'")]
pub struct UnknownState {
    /// Resource vocabulary the value was parsed against.
    pub kind: &'static str,
    /// Raw value reported by the provider.
    pub value: String,
}

macro_rules! lifecycle_states {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Returns the provider spelling of the state.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownState;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(UnknownState {
                        kind: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

lifecycle_states!(
    /// Phase of a compute instance.
    InstanceState {
        /// Instance is being migrated between hosts.
        Moving => "MOVING",
        /// Instance is being created.
        Provisioning => "PROVISIONING",
        /// Instance is up.
        Running => "RUNNING",
        /// Instance is booting from a stopped state.
        Starting => "STARTING",
        /// Instance is shutting down.
        Stopping => "STOPPING",
        /// Instance is powered off.
        Stopped => "STOPPED",
        /// An image capture from this instance is in progress.
        CreatingImage => "CREATING_IMAGE",
        /// Instance is being destroyed.
        Terminating => "TERMINATING",
        /// Instance no longer exists.
        Terminated => "TERMINATED",
    }
);

lifecycle_states!(
    /// Phase of a boot volume.
    BootVolumeState {
        /// Volume is being created.
        Provisioning => "PROVISIONING",
        /// Volume is being restored from a backup.
        Restoring => "RESTORING",
        /// Volume can be attached.
        Available => "AVAILABLE",
        /// Volume is being deleted.
        Terminating => "TERMINATING",
        /// Volume no longer exists.
        Terminated => "TERMINATED",
        /// Volume is in an unrecoverable state.
        Faulty => "FAULTY",
    }
);

lifecycle_states!(
    /// Phase of a volume attachment.
    AttachmentState {
        /// Attachment is being established.
        Attaching => "ATTACHING",
        /// Volume is attached.
        Attached => "ATTACHED",
        /// Attachment is being removed.
        Detaching => "DETACHING",
        /// Attachment no longer binds the volume.
        Detached => "DETACHED",
    }
);

lifecycle_states!(
    /// Phase of an image.
    ImageState {
        /// Image is being captured.
        Provisioning => "PROVISIONING",
        /// Image is being imported from object storage.
        Importing => "IMPORTING",
        /// Image can launch instances.
        Available => "AVAILABLE",
        /// Image is being exported.
        Exporting => "EXPORTING",
        /// Image exists but cannot be used.
        Disabled => "DISABLED",
        /// Image was deleted.
        Deleted => "DELETED",
    }
);
