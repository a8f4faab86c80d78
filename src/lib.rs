//! Core library for the imagewright custom image builder.
//!
//! The crate drives the lifecycle of short-lived cloud resources to produce a
//! custom machine image: launch a build instance from a base image, wait for
//! it to run, optionally swap in a cloned boot volume, provision it, capture
//! an image, and tear everything down (create → wait → capture → destroy).
//!
//! The remote service is reached through the [`ComputeApi`] trait. The
//! [`ComputeDriver`] wraps it in per-resource managers that poll lifecycle
//! states with [`poll::wait_for_state`], and [`BuildOrchestrator`] sequences a
//! full build with best-effort rollback on failure.

pub mod build;
pub mod compute;
pub mod config;
pub mod driver;
pub mod poll;
pub mod test_support;
pub mod user_data;

pub use build::{
    BuildError, BuildOrchestrator, BuildOutcome, BuildRequest, BuildStage, NoopProvisioner,
    ProvisionError, ProvisionTarget, Provisioner,
};
pub use compute::ComputeApi;
pub use config::{BuildConfig, ConfigError};
pub use driver::{ComputeDriver, DriverConfig, DriverError};
pub use poll::{PollError, StateExpectation, WaitPolicy};
