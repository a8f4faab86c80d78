//! Errors surfaced by the build orchestrator.

use thiserror::Error;

use super::BuildStage;
use super::provision::ProvisionError;
use crate::driver::DriverError;

/// Failure of an image build, labelled with the stage that failed.
///
/// Cleanup has already run by the time this is returned; cleanup failures are
/// logged and never replace the original error.
#[derive(Debug, Error)]
pub enum BuildError<E>
where
    E: std::error::Error + 'static,
{
    /// A driver call failed.
    #[error("build stage '{stage}' failed: {source}")]
    Driver {
        /// Stage that failed.
        stage: BuildStage,
        /// Driver error.
        #[source]
        source: DriverError<E>,
    },
    /// The provisioner failed.
    #[error("build stage 'provision' failed: {source}")]
    Provision {
        /// Provisioner error.
        #[source]
        source: ProvisionError,
    },
}

impl<E> BuildError<E>
where
    E: std::error::Error + 'static,
{
    /// Stage at which the build failed.
    #[must_use]
    pub const fn stage(&self) -> BuildStage {
        match self {
            Self::Driver { stage, .. } => *stage,
            Self::Provision { .. } => BuildStage::Provision,
        }
    }

    /// Returns `true` when the build stopped because it was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Driver { source, .. } => source.is_cancelled(),
            Self::Provision { source } => matches!(source, ProvisionError::Cancelled),
        }
    }
}

/// Labels driver failures with the stage that produced them.
pub(super) trait StageContext<T, E>
where
    E: std::error::Error + 'static,
{
    /// Wraps the error in [`BuildError::Driver`] for `stage`.
    fn at(self, stage: BuildStage) -> Result<T, BuildError<E>>;
}

impl<T, E> StageContext<T, E> for Result<T, DriverError<E>>
where
    E: std::error::Error + 'static,
{
    fn at(self, stage: BuildStage) -> Result<T, BuildError<E>> {
        self.map_err(|source| BuildError::Driver { stage, source })
    }
}
