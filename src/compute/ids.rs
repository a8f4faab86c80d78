//! Newtypes for remote resource identifiers to avoid stringly-typed code.
//!
//! Every resource kind gets its own type so an attachment id can never be
//! handed to an operation expecting a boot volume id.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

resource_id!(
    /// Identifier of a compute instance.
    InstanceId
);
resource_id!(
    /// Identifier of a custom or platform image.
    ImageId
);
resource_id!(
    /// Identifier of a boot volume.
    BootVolumeId
);
resource_id!(
    /// Identifier of a volume attachment (not the volume itself).
    AttachmentId
);
resource_id!(
    /// Identifier of a virtual network interface.
    VnicId
);
