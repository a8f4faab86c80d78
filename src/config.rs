//! Configuration loading via `ortho-config`.
//!
//! [`BuildConfig`] is the layered, user-facing configuration. It is turned
//! into the explicit per-manager settings bundled in [`DriverConfig`] by
//! [`BuildConfig::driver_config`], so nothing downstream reads a shared
//! configuration object.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::compute::ImageId;
use crate::build::BuildRequest;
use crate::driver::{
    BaseImage, CaptureConfig, CloneConfig, DEFAULT_CLEANUP_POLL_RETRIES, DriverConfig,
    LaunchConfig,
};
use crate::poll::WaitPolicy;
use crate::user_data::{UserDataError, encode_user_data, resolve_user_data};

/// Boot volume size used when none is configured.
pub const DEFAULT_BOOT_VOLUME_SIZE_GB: u64 = 50;

/// Image build configuration derived from configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "IMAGEWRIGHT",
    discovery(
        app_name = "imagewright",
        env_var = "IMAGEWRIGHT_CONFIG_PATH",
        config_file_name = "imagewright.toml",
        dotfile_name = ".imagewright.toml",
        project_file_name = "imagewright.toml"
    )
)]
pub struct BuildConfig {
    /// Availability domain hosting the build instance and any boot clone.
    pub availability_domain: String,
    /// Compartment owning every resource the build creates.
    pub compartment_id: String,
    /// Shape of the build instance.
    pub shape: String,
    /// Subnet for the build instance's primary network interface.
    pub subnet_id: String,
    /// Identifier of the base image.
    pub base_image_id: Option<String>,
    /// Display name of the base image; takes precedence over the identifier.
    pub base_image_name: Option<String>,
    /// Boot volume size for the build instance and its clone.
    #[ortho_config(default = DEFAULT_BOOT_VOLUME_SIZE_GB)]
    pub boot_volume_size_gb: u64,
    /// Display name of the build instance; the provider picks one when absent.
    pub instance_name: Option<String>,
    /// Display name of the captured image. Defaults to `imagewright-<uuid>`.
    pub image_name: Option<String>,
    /// Inline user data passed to the instance.
    pub user_data: Option<String>,
    /// Path to a file holding user data. Supports `~/` expansion.
    pub user_data_file: Option<String>,
    /// Whether to reach the instance over its private address.
    #[ortho_config(default = false)]
    pub use_private_ip: bool,
    /// Whether to provision a clone of the boot volume through the build
    /// instance and capture the image from an instance booted off the clone.
    #[ortho_config(default = false)]
    pub clone_boot_volume: bool,
    /// Whether to fetch provider-generated initial credentials before
    /// provisioning (password-based images).
    #[ortho_config(default = false)]
    pub fetch_initial_credentials: bool,
    /// Seconds between lifecycle polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Maximum polls per wait; zero waits indefinitely.
    #[ortho_config(default = 0)]
    pub max_poll_retries: u32,
    /// Maximum polls per wait while rolling back a failed build. Must be
    /// positive so a cancelled build always returns.
    #[ortho_config(default = DEFAULT_CLEANUP_POLL_RETRIES)]
    pub cleanup_max_poll_retries: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BuildConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to imagewright.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("imagewright")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// [`ConfigError::MissingBaseImage`] when neither base image field is set,
    /// [`ConfigError::InvalidPollInterval`] when the poll interval is zero, and
    /// [`ConfigError::UnboundedCleanup`] when rollback waits have no budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.availability_domain,
            &FieldMetadata::new(
                "availability domain",
                "IMAGEWRIGHT_AVAILABILITY_DOMAIN",
                "availability_domain",
            ),
        )?;
        Self::require_field(
            &self.compartment_id,
            &FieldMetadata::new(
                "compartment identifier",
                "IMAGEWRIGHT_COMPARTMENT_ID",
                "compartment_id",
            ),
        )?;
        Self::require_field(
            &self.shape,
            &FieldMetadata::new("instance shape", "IMAGEWRIGHT_SHAPE", "shape"),
        )?;
        Self::require_field(
            &self.subnet_id,
            &FieldMetadata::new("subnet identifier", "IMAGEWRIGHT_SUBNET_ID", "subnet_id"),
        )?;
        self.base_image()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.cleanup_max_poll_retries == 0 {
            return Err(ConfigError::UnboundedCleanup);
        }
        Ok(())
    }

    /// Resolves the base image selector. A configured name wins over an id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBaseImage`] when neither field holds a
    /// non-blank value.
    pub fn base_image(&self) -> Result<BaseImage, ConfigError> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|trimmed| !trimmed.is_empty())
                .map(str::to_owned)
        };

        if let Some(name) = non_blank(&self.base_image_name) {
            return Ok(BaseImage::Name(name));
        }
        non_blank(&self.base_image_id)
            .map(|id| BaseImage::Id(ImageId::from(id)))
            .ok_or(ConfigError::MissingBaseImage)
    }

    /// Polling policy derived from the interval and retry settings.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::bounded(
            self.max_poll_retries,
            Duration::from_secs(self.poll_interval_secs),
        )
    }

    /// Polling policy for rollback waits; always bounded once validated.
    #[must_use]
    pub const fn cleanup_wait_policy(&self) -> WaitPolicy {
        WaitPolicy::bounded(
            self.cleanup_max_poll_retries,
            Duration::from_secs(self.poll_interval_secs),
        )
    }

    /// Per-build request carrying the configured optional stages.
    #[must_use]
    pub fn build_request(&self, public_key: impl Into<String>) -> BuildRequest {
        BuildRequest::new(public_key)
            .with_boot_clone(self.clone_boot_volume)
            .with_initial_credentials(self.fetch_initial_credentials)
    }

    /// Display name for the captured image.
    #[must_use]
    pub fn resolved_image_name(&self) -> String {
        self.image_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("imagewright-{}", Uuid::new_v4().simple()),
                str::to_owned,
            )
    }

    /// Builds the explicit per-manager settings used by the driver.
    ///
    /// Metadata and tags start empty; the surrounding pipeline adds them with
    /// the `DriverConfig::with_*` builders.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or user data cannot be
    /// resolved.
    pub fn driver_config(&self) -> Result<DriverConfig, ConfigError> {
        self.validate()?;
        let user_data =
            resolve_user_data(self.user_data.as_deref(), self.user_data_file.as_deref())?
                .map(|payload| encode_user_data(&payload));

        let launch = LaunchConfig {
            availability_domain: self.availability_domain.clone(),
            compartment_id: self.compartment_id.clone(),
            shape: self.shape.clone(),
            subnet_id: self.subnet_id.clone(),
            base_image: self.base_image()?,
            boot_volume_size_gb: self.boot_volume_size_gb,
            display_name: self.instance_name.clone(),
            metadata: BTreeMap::new(),
            user_data,
        };
        let clone = CloneConfig {
            availability_domain: self.availability_domain.clone(),
            compartment_id: self.compartment_id.clone(),
            size_gb: self.boot_volume_size_gb,
        };
        let capture = CaptureConfig::new(self.compartment_id.clone(), self.resolved_image_name());

        Ok(DriverConfig {
            launch,
            clone,
            capture,
            use_private_ip: self.use_private_ip,
            wait: self.wait_policy(),
            cleanup_wait: self.cleanup_wait_policy(),
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when neither a base image id nor name is configured.
    #[error(
        "either base_image_id or base_image_name must be specified (IMAGEWRIGHT_BASE_IMAGE_ID / IMAGEWRIGHT_BASE_IMAGE_NAME)"
    )]
    MissingBaseImage,
    /// Raised when the poll interval is zero.
    #[error("poll_interval_secs must be greater than zero")]
    InvalidPollInterval,
    /// Raised when rollback waits would poll without limit.
    #[error("cleanup_max_poll_retries must be greater than zero")]
    UnboundedCleanup,
    /// Raised when user data cannot be resolved.
    #[error("user data error: {0}")]
    UserData(#[from] UserDataError),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
