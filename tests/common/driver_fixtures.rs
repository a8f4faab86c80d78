//! Shared driver fixtures for integration tests.
//!
//! Included from individual test crates via:
//!
//! ```rust
//! #[path = "common/driver_fixtures.rs"]
//! mod driver_fixtures;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use imagewright::compute::ImageId;
use imagewright::driver::{
    BaseImage, CaptureConfig, CloneConfig, ComputeDriver, DriverConfig, LaunchConfig,
};
use imagewright::poll::WaitPolicy;
use imagewright::test_support::FakeCompute;

pub const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFakeKeyForTests builder@ci";
pub const COMPARTMENT_ID: &str = "ocid1.compartment.oc1..build";
pub const AVAILABILITY_DOMAIN: &str = "Uocm:PHX-AD-1";
pub const POLL_DELAY: Duration = Duration::from_millis(10);
pub const CLEANUP_POLLS: u32 = 5;

pub fn driver_config(base_image: BaseImage) -> DriverConfig {
    DriverConfig {
        launch: LaunchConfig {
            availability_domain: String::from(AVAILABILITY_DOMAIN),
            compartment_id: String::from(COMPARTMENT_ID),
            shape: String::from("VM.Standard.E4.Flex"),
            subnet_id: String::from("ocid1.subnet.oc1..build"),
            base_image,
            boot_volume_size_gb: 50,
            display_name: Some(String::from("imagewright-build")),
            metadata: BTreeMap::new(),
            user_data: None,
        },
        clone: CloneConfig {
            availability_domain: String::from(AVAILABILITY_DOMAIN),
            compartment_id: String::from(COMPARTMENT_ID),
            size_gb: 50,
        },
        capture: CaptureConfig::new(COMPARTMENT_ID, "golden-image"),
        use_private_ip: false,
        wait: WaitPolicy::unlimited(POLL_DELAY),
        cleanup_wait: WaitPolicy::bounded(CLEANUP_POLLS, POLL_DELAY),
    }
}

pub fn default_driver_config() -> DriverConfig {
    driver_config(BaseImage::Id(ImageId::from("ocid1.image.oc1..base")))
}

/// Routes crate logs to the test writer; honours `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .unwrap_or_default();
}

pub fn driver_with(api: &FakeCompute, config: DriverConfig) -> ComputeDriver<FakeCompute> {
    ComputeDriver::new(Arc::new(api.clone()), config)
}
