//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCompute`] is an in-memory [`ComputeApi`] whose lifecycle states are
//! scripted per resource kind. It records every call, hands out sequential
//! identifiers (`i-1`, `img-2`, ...) and fails or hangs on request.
//! [`EnvGuard`] serialises tests that steer configuration loading through
//! environment variables.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::build::{ProvisionError, ProvisionFuture, ProvisionTarget, Provisioner};
use crate::compute::{
    ApiFuture, AttachVolumeDetails, AttachmentId, AttachmentState, BootVolume,
    BootVolumeAttachment, BootVolumeAttachmentFilter, BootVolumeId, BootVolumeState, ComputeApi,
    CreateBootVolumeDetails, CreateImageDetails, Image, ImageFilter, ImageId, ImageState,
    Instance, InstanceCredentials, InstanceId, InstanceState, LaunchInstanceDetails, Vnic,
    VnicAttachment, VnicAttachmentFilter, VnicId, VolumeAttachment,
};

/// Compute API operations, used to target injected failures and hangs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum FakeOperation {
    /// `launch_instance`.
    LaunchInstance,
    /// `terminate_instance`.
    TerminateInstance,
    /// `get_instance`.
    GetInstance,
    /// `list_images`.
    ListImages,
    /// `get_image`.
    GetImage,
    /// `create_image`.
    CreateImage,
    /// `delete_image`.
    DeleteImage,
    /// `create_boot_volume`.
    CreateBootVolume,
    /// `get_boot_volume`.
    GetBootVolume,
    /// `delete_boot_volume`.
    DeleteBootVolume,
    /// `attach_volume`.
    AttachVolume,
    /// `detach_volume`.
    DetachVolume,
    /// `get_volume_attachment`.
    GetVolumeAttachment,
    /// `list_boot_volume_attachments`.
    ListBootVolumeAttachments,
    /// `list_vnic_attachments`.
    ListVnicAttachments,
    /// `get_vnic`.
    GetVnic,
    /// `get_initial_credentials`.
    GetInitialCredentials,
}

impl fmt::Display for FakeOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, formatter)
    }
}

/// A recorded call, with the arguments it received.
#[derive(Clone, Debug, PartialEq)]
pub enum ComputeCall {
    /// Launch request.
    LaunchInstance(LaunchInstanceDetails),
    /// Terminated instance.
    TerminateInstance(InstanceId),
    /// Polled instance.
    GetInstance(InstanceId),
    /// Image lookup.
    ListImages(ImageFilter),
    /// Polled image.
    GetImage(ImageId),
    /// Capture request.
    CreateImage(CreateImageDetails),
    /// Deleted image.
    DeleteImage(ImageId),
    /// Clone request.
    CreateBootVolume(CreateBootVolumeDetails),
    /// Polled boot volume.
    GetBootVolume(BootVolumeId),
    /// Deleted boot volume.
    DeleteBootVolume(BootVolumeId),
    /// Attach request.
    AttachVolume(AttachVolumeDetails),
    /// Detached attachment.
    DetachVolume(AttachmentId),
    /// Polled attachment.
    GetVolumeAttachment(AttachmentId),
    /// Boot volume attachment lookup.
    ListBootVolumeAttachments(BootVolumeAttachmentFilter),
    /// VNIC attachment lookup.
    ListVnicAttachments(VnicAttachmentFilter),
    /// VNIC lookup.
    GetVnic(VnicId),
    /// Credentials lookup.
    GetInitialCredentials(InstanceId),
}

impl ComputeCall {
    /// Operation this call invoked.
    #[must_use]
    pub const fn operation(&self) -> FakeOperation {
        match self {
            Self::LaunchInstance(_) => FakeOperation::LaunchInstance,
            Self::TerminateInstance(_) => FakeOperation::TerminateInstance,
            Self::GetInstance(_) => FakeOperation::GetInstance,
            Self::ListImages(_) => FakeOperation::ListImages,
            Self::GetImage(_) => FakeOperation::GetImage,
            Self::CreateImage(_) => FakeOperation::CreateImage,
            Self::DeleteImage(_) => FakeOperation::DeleteImage,
            Self::CreateBootVolume(_) => FakeOperation::CreateBootVolume,
            Self::GetBootVolume(_) => FakeOperation::GetBootVolume,
            Self::DeleteBootVolume(_) => FakeOperation::DeleteBootVolume,
            Self::AttachVolume(_) => FakeOperation::AttachVolume,
            Self::DetachVolume(_) => FakeOperation::DetachVolume,
            Self::GetVolumeAttachment(_) => FakeOperation::GetVolumeAttachment,
            Self::ListBootVolumeAttachments(_) => FakeOperation::ListBootVolumeAttachments,
            Self::ListVnicAttachments(_) => FakeOperation::ListVnicAttachments,
            Self::GetVnic(_) => FakeOperation::GetVnic,
            Self::GetInitialCredentials(_) => FakeOperation::GetInitialCredentials,
        }
    }
}

/// Errors returned by [`FakeCompute`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeComputeError {
    /// A failure injected with [`FakeCompute::fail_on`].
    #[error("injected failure in {operation}")]
    Injected {
        /// Operation that failed.
        operation: FakeOperation,
    },
}

#[derive(Debug)]
struct FakeState {
    next_id: u32,
    calls: Vec<ComputeCall>,
    failures: BTreeSet<FakeOperation>,
    hangs: BTreeSet<FakeOperation>,
    catalog: Vec<Image>,
    images: BTreeMap<ImageId, Image>,
    terminated: BTreeSet<InstanceId>,
    detached: BTreeSet<AttachmentId>,
    attachments: BTreeMap<AttachmentId, VolumeAttachment>,
    instance_states: VecDeque<InstanceState>,
    termination_states: VecDeque<InstanceState>,
    image_states: VecDeque<ImageState>,
    volume_states: VecDeque<BootVolumeState>,
    attachment_states: VecDeque<AttachmentState>,
    detachment_states: VecDeque<AttachmentState>,
    vnic: Option<Vnic>,
    boot_volume_attached: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            next_id: 0,
            calls: Vec::new(),
            failures: BTreeSet::new(),
            hangs: BTreeSet::new(),
            catalog: Vec::new(),
            images: BTreeMap::new(),
            terminated: BTreeSet::new(),
            detached: BTreeSet::new(),
            attachments: BTreeMap::new(),
            instance_states: VecDeque::new(),
            termination_states: VecDeque::new(),
            image_states: VecDeque::new(),
            volume_states: VecDeque::new(),
            attachment_states: VecDeque::new(),
            detachment_states: VecDeque::new(),
            vnic: Some(Vnic {
                id: VnicId::from("vnic-0"),
                private_ip: String::from(FakeCompute::PRIVATE_IP),
                public_ip: Some(String::from(FakeCompute::PUBLIC_IP)),
            }),
            boot_volume_attached: true,
        }
    }
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory compute API with scripted lifecycle states.
///
/// Unscripted polls settle immediately: instances report `RUNNING` (or
/// `TERMINATED` once terminated), images and boot volumes `AVAILABLE`, and
/// attachments `ATTACHED` (or `DETACHED` once detached).
#[derive(Clone, Debug, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCompute {
    /// Private address of the default VNIC.
    pub const PRIVATE_IP: &'static str = "10.0.0.2";
    /// Public address of the default VNIC.
    pub const PUBLIC_IP: &'static str = "203.0.113.10";

    /// Creates a fake with default behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every call to `operation` fail.
    pub fn fail_on(&self, operation: FakeOperation) {
        self.lock().failures.insert(operation);
    }

    /// Makes every call to `operation` hang until dropped.
    pub fn hang_on(&self, operation: FakeOperation) {
        self.lock().hangs.insert(operation);
    }

    /// Adds an image to the catalog searched by `list_images`.
    pub fn add_catalog_image(&self, id: &str, display_name: &str) {
        self.lock().catalog.push(Image {
            id: ImageId::from(id),
            state: ImageState::Available,
            display_name: display_name.to_owned(),
            freeform_tags: BTreeMap::new(),
            defined_tags: BTreeMap::new(),
        });
    }

    /// Replaces the VNIC reported for every instance; `None` removes it.
    pub fn set_vnic(&self, vnic: Option<Vnic>) {
        self.lock().vnic = vnic;
    }

    /// Stops reporting boot volume attachments for instances.
    pub fn without_boot_volume_attachments(&self) {
        self.lock().boot_volume_attached = false;
    }

    /// States returned by instance polls before termination.
    pub fn script_instance_states(&self, states: impl IntoIterator<Item = InstanceState>) {
        self.lock().instance_states.extend(states);
    }

    /// States returned by instance polls after termination was requested.
    pub fn script_termination_states(&self, states: impl IntoIterator<Item = InstanceState>) {
        self.lock().termination_states.extend(states);
    }

    /// States returned by image polls.
    pub fn script_image_states(&self, states: impl IntoIterator<Item = ImageState>) {
        self.lock().image_states.extend(states);
    }

    /// States returned by boot volume polls.
    pub fn script_boot_volume_states(&self, states: impl IntoIterator<Item = BootVolumeState>) {
        self.lock().volume_states.extend(states);
    }

    /// States returned by attachment polls before detach was requested.
    pub fn script_attachment_states(&self, states: impl IntoIterator<Item = AttachmentState>) {
        self.lock().attachment_states.extend(states);
    }

    /// States returned by attachment polls after detach was requested.
    pub fn script_detachment_states(&self, states: impl IntoIterator<Item = AttachmentState>) {
        self.lock().detachment_states.extend(states);
    }

    /// Every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.lock().calls.clone()
    }

    /// Operations invoked so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<FakeOperation> {
        self.lock()
            .calls
            .iter()
            .map(ComputeCall::operation)
            .collect()
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn count(&self, operation: FakeOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Launch requests received so far.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchInstanceDetails> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ComputeCall::LaunchInstance(details) => Some(details.clone()),
                _ => None,
            })
            .collect()
    }

    fn respond<'a, T, F>(
        &'a self,
        call: ComputeCall,
        reply: F,
    ) -> ApiFuture<'a, T, FakeComputeError>
    where
        T: Send + 'a,
        F: FnOnce(&mut FakeState) -> T + Send + 'a,
    {
        Box::pin(async move {
            let operation = call.operation();
            let hang = {
                let mut state = self.lock();
                state.calls.push(call);
                state.hangs.contains(&operation)
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.lock();
            if state.failures.contains(&operation) {
                return Err(FakeComputeError::Injected { operation });
            }
            Ok(reply(&mut state))
        })
    }
}

impl ComputeApi for FakeCompute {
    type Error = FakeComputeError;

    fn launch_instance<'a>(
        &'a self,
        details: &'a LaunchInstanceDetails,
    ) -> ApiFuture<'a, Instance, Self::Error> {
        self.respond(ComputeCall::LaunchInstance(details.clone()), move |state| {
            Instance {
                id: InstanceId::new(state.next_id("i")),
                state: InstanceState::Provisioning,
                availability_domain: details.availability_domain.clone(),
                shape: details.shape.clone(),
                display_name: details.display_name.clone(),
            }
        })
    }

    fn terminate_instance<'a>(&'a self, id: &'a InstanceId) -> ApiFuture<'a, (), Self::Error> {
        self.respond(ComputeCall::TerminateInstance(id.clone()), move |state| {
            state.terminated.insert(id.clone());
        })
    }

    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ApiFuture<'a, Instance, Self::Error> {
        self.respond(ComputeCall::GetInstance(id.clone()), move |state| {
            let lifecycle = if state.terminated.contains(id) {
                state
                    .termination_states
                    .pop_front()
                    .unwrap_or(InstanceState::Terminated)
            } else {
                state
                    .instance_states
                    .pop_front()
                    .unwrap_or(InstanceState::Running)
            };
            Instance {
                id: id.clone(),
                state: lifecycle,
                availability_domain: String::from("AD-1"),
                shape: String::from("VM.Standard.E4.Flex"),
                display_name: None,
            }
        })
    }

    fn list_images<'a>(
        &'a self,
        filter: &'a ImageFilter,
    ) -> ApiFuture<'a, Vec<Image>, Self::Error> {
        self.respond(ComputeCall::ListImages(filter.clone()), move |state| {
            state
                .catalog
                .iter()
                .filter(|image| image.display_name == filter.display_name)
                .cloned()
                .collect()
        })
    }

    fn get_image<'a>(&'a self, id: &'a ImageId) -> ApiFuture<'a, Image, Self::Error> {
        self.respond(ComputeCall::GetImage(id.clone()), move |state| {
            let lifecycle = state
                .image_states
                .pop_front()
                .unwrap_or(ImageState::Available);
            let mut image = state.images.get(id).cloned().unwrap_or_else(|| Image {
                id: id.clone(),
                state: lifecycle,
                display_name: String::new(),
                freeform_tags: BTreeMap::new(),
                defined_tags: BTreeMap::new(),
            });
            image.state = lifecycle;
            image
        })
    }

    fn create_image<'a>(
        &'a self,
        details: &'a CreateImageDetails,
    ) -> ApiFuture<'a, Image, Self::Error> {
        self.respond(ComputeCall::CreateImage(details.clone()), move |state| {
            let image = Image {
                id: ImageId::new(state.next_id("img")),
                state: ImageState::Provisioning,
                display_name: details.display_name.clone(),
                freeform_tags: details.freeform_tags.clone(),
                defined_tags: details.defined_tags.clone(),
            };
            state.images.insert(image.id.clone(), image.clone());
            image
        })
    }

    fn delete_image<'a>(&'a self, id: &'a ImageId) -> ApiFuture<'a, (), Self::Error> {
        self.respond(ComputeCall::DeleteImage(id.clone()), move |state| {
            state.images.remove(id);
        })
    }

    fn create_boot_volume<'a>(
        &'a self,
        details: &'a CreateBootVolumeDetails,
    ) -> ApiFuture<'a, BootVolume, Self::Error> {
        self.respond(ComputeCall::CreateBootVolume(details.clone()), move |state| {
            BootVolume {
                id: BootVolumeId::new(state.next_id("bv")),
                state: BootVolumeState::Provisioning,
                size_gb: details.size_gb,
                source_volume_id: Some(details.source_boot_volume_id.clone()),
            }
        })
    }

    fn get_boot_volume<'a>(
        &'a self,
        id: &'a BootVolumeId,
    ) -> ApiFuture<'a, BootVolume, Self::Error> {
        self.respond(ComputeCall::GetBootVolume(id.clone()), move |state| {
            BootVolume {
                id: id.clone(),
                state: state
                    .volume_states
                    .pop_front()
                    .unwrap_or(BootVolumeState::Available),
                size_gb: 50,
                source_volume_id: None,
            }
        })
    }

    fn delete_boot_volume<'a>(&'a self, id: &'a BootVolumeId) -> ApiFuture<'a, (), Self::Error> {
        self.respond(ComputeCall::DeleteBootVolume(id.clone()), |_| ())
    }

    fn attach_volume<'a>(
        &'a self,
        details: &'a AttachVolumeDetails,
    ) -> ApiFuture<'a, VolumeAttachment, Self::Error> {
        self.respond(ComputeCall::AttachVolume(details.clone()), move |state| {
            let attachment = VolumeAttachment {
                id: AttachmentId::new(state.next_id("va")),
                instance_id: details.instance_id.clone(),
                volume_id: details.volume_id.clone(),
                state: AttachmentState::Attaching,
            };
            state
                .attachments
                .insert(attachment.id.clone(), attachment.clone());
            attachment
        })
    }

    fn detach_volume<'a>(&'a self, id: &'a AttachmentId) -> ApiFuture<'a, (), Self::Error> {
        self.respond(ComputeCall::DetachVolume(id.clone()), move |state| {
            state.detached.insert(id.clone());
        })
    }

    fn get_volume_attachment<'a>(
        &'a self,
        id: &'a AttachmentId,
    ) -> ApiFuture<'a, VolumeAttachment, Self::Error> {
        self.respond(ComputeCall::GetVolumeAttachment(id.clone()), move |state| {
            let lifecycle = if state.detached.contains(id) {
                state
                    .detachment_states
                    .pop_front()
                    .unwrap_or(AttachmentState::Detached)
            } else {
                state
                    .attachment_states
                    .pop_front()
                    .unwrap_or(AttachmentState::Attached)
            };
            let mut attachment =
                state
                    .attachments
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| VolumeAttachment {
                        id: id.clone(),
                        instance_id: InstanceId::from("unknown"),
                        volume_id: BootVolumeId::from("unknown"),
                        state: lifecycle,
                    });
            attachment.state = lifecycle;
            attachment
        })
    }

    fn list_boot_volume_attachments<'a>(
        &'a self,
        filter: &'a BootVolumeAttachmentFilter,
    ) -> ApiFuture<'a, Vec<BootVolumeAttachment>, Self::Error> {
        self.respond(
            ComputeCall::ListBootVolumeAttachments(filter.clone()),
            move |state| {
                if !state.boot_volume_attached {
                    return Vec::new();
                }
                vec![BootVolumeAttachment {
                    instance_id: filter.instance_id.clone(),
                    boot_volume_id: BootVolumeId::new(format!("boot-{}", filter.instance_id)),
                }]
            },
        )
    }

    fn list_vnic_attachments<'a>(
        &'a self,
        filter: &'a VnicAttachmentFilter,
    ) -> ApiFuture<'a, Vec<VnicAttachment>, Self::Error> {
        self.respond(ComputeCall::ListVnicAttachments(filter.clone()), move |state| {
            state
                .vnic
                .iter()
                .map(|vnic| VnicAttachment {
                    vnic_id: vnic.id.clone(),
                    instance_id: filter.instance_id.clone(),
                })
                .collect()
        })
    }

    fn get_vnic<'a>(&'a self, id: &'a VnicId) -> ApiFuture<'a, Vnic, Self::Error> {
        self.respond(ComputeCall::GetVnic(id.clone()), move |state| {
            state.vnic.clone().unwrap_or_else(|| Vnic {
                id: id.clone(),
                private_ip: String::from(Self::PRIVATE_IP),
                public_ip: None,
            })
        })
    }

    fn get_initial_credentials<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ApiFuture<'a, InstanceCredentials, Self::Error> {
        self.respond(ComputeCall::GetInitialCredentials(id.clone()), |_| {
            InstanceCredentials {
                username: String::from("opc"),
                password: String::from("fake-initial-password"),
            }
        })
    }
}

/// Provisioner that records every target it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingProvisioner {
    targets: Arc<Mutex<Vec<ProvisionTarget>>>,
    failure: Option<String>,
}

impl RecordingProvisioner {
    /// Provisioner that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisioner that records the target and then fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            targets: Arc::default(),
            failure: Some(message.into()),
        }
    }

    /// Targets received so far.
    #[must_use]
    pub fn targets(&self) -> Vec<ProvisionTarget> {
        self.targets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Provisioner for RecordingProvisioner {
    fn provision<'a>(
        &'a self,
        _ctx: &'a CancellationToken,
        target: &'a ProvisionTarget,
    ) -> ProvisionFuture<'a> {
        Box::pin(async move {
            self.targets
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(target.clone());
            self.failure
                .as_ref()
                .map_or(Ok(()), |message| Err(ProvisionError::failed(message.clone())))
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Holds [`ENV_LOCK`] and restores the touched variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _lock: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `pairs` and clears `unset` while holding [`ENV_LOCK`].
    pub async fn set_vars(pairs: &[(&str, &str)], unset: &[&str]) -> Self {
        let lock = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len().saturating_add(unset.len()));
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // Restore in reverse so a key listed twice ends at its original value.
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: environment mutation is serialised by the held lock.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
