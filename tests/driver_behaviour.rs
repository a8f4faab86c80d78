//! Behavioural tests for the compute driver and its managers.

#[path = "common/driver_fixtures.rs"]
mod driver_fixtures;

use std::time::Duration;

use imagewright::compute::{
    AttachmentId, AttachmentState, BootVolumeId, BootVolumeState, ImageId, InstanceId,
    InstanceSource, InstanceState, Vnic, VnicId,
};
use imagewright::driver::{BaseImage, DriverError, SSH_AUTHORIZED_KEYS_KEY, USER_DATA_KEY};
use imagewright::poll::{PollError, WaitPolicy};
use imagewright::test_support::{ComputeCall, FakeCompute, FakeComputeError, FakeOperation};
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

use driver_fixtures::{
    COMPARTMENT_ID, POLL_DELAY, PUBLIC_KEY, default_driver_config, driver_config, driver_with,
    init_tracing,
};

#[fixture]
fn api() -> FakeCompute {
    init_tracing();
    FakeCompute::new()
}

fn first_launch_source(api: &FakeCompute) -> InstanceSource {
    api.launches()
        .first()
        .map(|details| details.source.clone())
        .unwrap_or_else(|| panic!("expected a launch request"))
}

#[rstest]
#[tokio::test]
async fn clone_source_never_triggers_image_lookup(api: FakeCompute) {
    api.add_catalog_image("img-base", "Oracle-Linux-9");
    let driver = driver_with(
        &api,
        driver_config(BaseImage::Name(String::from("Oracle-Linux-9"))),
    );
    let ctx = CancellationToken::new();
    let source = BootVolumeId::from("bv-source");

    let instance_id = driver
        .create_instance(&ctx, PUBLIC_KEY, Some(&source))
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(instance_id, InstanceId::from("i-1"));
    assert_eq!(api.count(FakeOperation::ListImages), 0);
    assert_eq!(
        first_launch_source(&api),
        InstanceSource::FromBootVolume {
            boot_volume_id: source
        }
    );
}

#[rstest]
#[tokio::test]
async fn base_image_name_resolves_with_a_single_lookup(api: FakeCompute) {
    api.add_catalog_image("img-first", "Oracle-Linux-9");
    api.add_catalog_image("img-second", "Oracle-Linux-9");
    api.add_catalog_image("img-other", "Ubuntu-24.04");
    let driver = driver_with(
        &api,
        driver_config(BaseImage::Name(String::from("Oracle-Linux-9"))),
    );

    driver
        .create_instance(&CancellationToken::new(), PUBLIC_KEY, None)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(api.count(FakeOperation::ListImages), 1);
    let lookups: Vec<_> = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ComputeCall::ListImages(filter) => Some(filter),
            _ => None,
        })
        .collect();
    assert!(
        lookups
            .iter()
            .all(|filter| filter.compartment_id == COMPARTMENT_ID
                && filter.display_name == "Oracle-Linux-9"),
        "lookup should be scoped by compartment and name: {lookups:?}"
    );
    assert_eq!(
        first_launch_source(&api),
        InstanceSource::FromImage {
            image_id: ImageId::from("img-first"),
            boot_volume_size_gb: 50,
        }
    );
}

#[rstest]
#[tokio::test]
async fn unknown_base_image_name_fails_before_launch(api: FakeCompute) {
    let driver = driver_with(
        &api,
        driver_config(BaseImage::Name(String::from("does-not-exist"))),
    );

    let result = driver
        .create_instance(&CancellationToken::new(), PUBLIC_KEY, None)
        .await;

    assert!(
        matches!(&result, Err(DriverError::ImageNotFound { name, .. }) if name == "does-not-exist"),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::LaunchInstance), 0);
}

#[rstest]
#[tokio::test]
async fn base_image_id_is_used_without_lookup(api: FakeCompute) {
    let driver = driver_with(&api, default_driver_config());

    driver
        .create_instance(&CancellationToken::new(), PUBLIC_KEY, None)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(api.count(FakeOperation::ListImages), 0);
    assert!(matches!(
        first_launch_source(&api),
        InstanceSource::FromImage { image_id, .. } if image_id.as_str() == "ocid1.image.oc1..base"
    ));
}

#[rstest]
#[tokio::test]
async fn launch_metadata_layers_key_then_metadata_then_user_data(api: FakeCompute) {
    let mut config = default_driver_config().with_metadata([
        (USER_DATA_KEY, "from-metadata"),
        ("role", "builder"),
    ]);
    config.launch.user_data = Some(String::from("I2Nsb3VkLWNvbmZpZwo="));
    let driver = driver_with(&api, config);

    driver
        .create_instance(&CancellationToken::new(), PUBLIC_KEY, None)
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    let metadata = api
        .launches()
        .first()
        .map(|details| details.metadata.clone())
        .unwrap_or_else(|| panic!("expected a launch request"));
    assert_eq!(
        metadata.get(SSH_AUTHORIZED_KEYS_KEY).map(String::as_str),
        Some(PUBLIC_KEY)
    );
    assert_eq!(metadata.get("role").map(String::as_str), Some("builder"));
    assert_eq!(
        metadata.get(USER_DATA_KEY).map(String::as_str),
        Some("I2Nsb3VkLWNvbmZpZwo=")
    );
}

#[rstest]
#[tokio::test]
async fn configured_metadata_overrides_ssh_key_entry(api: FakeCompute) {
    let config =
        default_driver_config().with_metadata([(SSH_AUTHORIZED_KEYS_KEY, "ssh-rsa AAAA other")]);
    let driver = driver_with(&api, config);

    let metadata = driver.instances().launch_metadata(PUBLIC_KEY);

    assert_eq!(
        metadata.get(SSH_AUTHORIZED_KEYS_KEY).map(String::as_str),
        Some("ssh-rsa AAAA other")
    );
    assert_eq!(metadata.len(), 1);
}

#[rstest]
#[tokio::test]
async fn detach_returns_the_attachment_id_from_attach(api: FakeCompute) {
    let driver = driver_with(&api, default_driver_config());
    let ctx = CancellationToken::new();

    let attachment_id = driver
        .attach_boot_clone(&ctx, &InstanceId::from("i-7"), &BootVolumeId::from("bv-7"))
        .await
        .unwrap_or_else(|err| panic!("attach: {err}"));
    let detached = driver
        .detach_boot_clone(&ctx, &attachment_id)
        .await
        .unwrap_or_else(|err| panic!("detach: {err}"));

    assert_eq!(attachment_id, AttachmentId::from("va-1"));
    assert_eq!(detached, attachment_id);
}

#[rstest]
#[case::private_preferred(true, Some("198.51.100.4"), Some("10.0.0.9"))]
#[case::private_without_public(true, None, Some("10.0.0.9"))]
#[case::public_preferred(false, Some("198.51.100.4"), Some("198.51.100.4"))]
#[case::public_missing(false, None, None)]
#[tokio::test]
async fn instance_ip_follows_address_preference(
    api: FakeCompute,
    #[case] prefer_private: bool,
    #[case] public_ip: Option<&str>,
    #[case] expected: Option<&str>,
) {
    api.set_vnic(Some(Vnic {
        id: VnicId::from("vnic-9"),
        private_ip: String::from("10.0.0.9"),
        public_ip: public_ip.map(str::to_owned),
    }));
    let mut config = default_driver_config();
    config.use_private_ip = prefer_private;
    let driver = driver_with(&api, config);
    let instance_id = InstanceId::from("i-3");

    let result = driver
        .get_instance_ip(&CancellationToken::new(), &instance_id)
        .await;

    match expected {
        Some(address) => assert_eq!(result.ok().as_deref(), Some(address)),
        None => assert!(
            matches!(
                &result,
                Err(DriverError::MissingPublicIp { instance_id: id }) if *id == instance_id
            ),
            "unexpected outcome: {result:?}"
        ),
    }
}

#[rstest]
#[tokio::test]
async fn instance_without_vnics_reports_missing_interfaces(api: FakeCompute) {
    api.set_vnic(None);
    let driver = driver_with(&api, default_driver_config());

    let result = driver
        .get_instance_ip(&CancellationToken::new(), &InstanceId::from("i-4"))
        .await;

    assert!(
        matches!(result, Err(DriverError::NoNetworkInterfaces { .. })),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::GetVnic), 0);
}

#[rstest]
#[tokio::test]
async fn boot_clone_copies_the_attached_boot_volume(api: FakeCompute) {
    let driver = driver_with(&api, default_driver_config());

    let clone_id = driver
        .create_boot_clone(&CancellationToken::new(), &InstanceId::from("i-9"))
        .await
        .unwrap_or_else(|err| panic!("clone: {err}"));

    assert_eq!(clone_id, BootVolumeId::from("bv-1"));
    let request = api
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ComputeCall::CreateBootVolume(details) => Some(details),
            _ => None,
        })
        .unwrap_or_else(|| panic!("expected a create boot volume call"));
    assert_eq!(request.source_boot_volume_id, BootVolumeId::from("boot-i-9"));
    assert_eq!(request.size_gb, 50);
}

#[rstest]
#[tokio::test]
async fn boot_clone_requires_a_boot_volume_attachment(api: FakeCompute) {
    api.without_boot_volume_attachments();
    let driver = driver_with(&api, default_driver_config());

    let result = driver
        .create_boot_clone(&CancellationToken::new(), &InstanceId::from("i-9"))
        .await;

    assert!(
        matches!(result, Err(DriverError::NoBootVolumeAttachment { .. })),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::CreateBootVolume), 0);
}

#[rstest]
#[tokio::test]
async fn capture_uses_configured_name_and_tags(api: FakeCompute) {
    let config = default_driver_config()
        .with_freeform_tags([("team", "platform")])
        .with_defined_tags(
            [(
                String::from("Operations"),
                [(String::from("CostCenter"), serde_json::json!("42"))]
                    .into_iter()
                    .collect(),
            )]
            .into_iter()
            .collect(),
        );
    let driver = driver_with(&api, config);

    let image = driver
        .create_image(&CancellationToken::new(), &InstanceId::from("i-1"))
        .await
        .unwrap_or_else(|err| panic!("capture: {err}"));

    assert_eq!(image.display_name, "golden-image");
    assert_eq!(
        image.freeform_tags.get("team").map(String::as_str),
        Some("platform")
    );
    assert_eq!(
        image
            .defined_tags
            .get("Operations")
            .and_then(|tags| tags.get("CostCenter")),
        Some(&serde_json::json!("42"))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn image_wait_polls_until_available(api: FakeCompute) {
    api.script_image_states([
        imagewright::compute::ImageState::Provisioning,
        imagewright::compute::ImageState::Provisioning,
        imagewright::compute::ImageState::Available,
    ]);
    let driver = driver_with(&api, default_driver_config());

    driver
        .wait_for_image_creation(&CancellationToken::new(), &ImageId::from("img-1"))
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert_eq!(api.count(FakeOperation::GetImage), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unexpected_instance_state_fails_the_wait(api: FakeCompute) {
    api.script_instance_states([InstanceState::Provisioning, InstanceState::Stopped]);
    let driver = driver_with(&api, default_driver_config());

    let result = driver
        .wait_for_instance_state(
            &CancellationToken::new(),
            &InstanceId::from("i-1"),
            &[InstanceState::Provisioning, InstanceState::Starting],
            InstanceState::Running,
        )
        .await;

    assert!(
        matches!(
            &result,
            Err(DriverError::Wait(PollError::UnexpectedState { observed, .. }))
                if observed == "STOPPED"
        ),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::GetInstance), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn bounded_policy_exhausts_after_budget(api: FakeCompute) {
    api.script_boot_volume_states([BootVolumeState::Provisioning; 5]);
    let config = default_driver_config().with_wait_policy(WaitPolicy::bounded(2, POLL_DELAY));
    let driver = driver_with(&api, config);

    let result = driver
        .wait_for_boot_volume_state(
            &CancellationToken::new(),
            &BootVolumeId::from("bv-1"),
            &[BootVolumeState::Provisioning, BootVolumeState::Restoring],
            BootVolumeState::Available,
        )
        .await;

    assert!(
        matches!(
            result,
            Err(DriverError::Wait(PollError::RetriesExhausted { max_retries: 2, .. }))
        ),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::GetBootVolume), 2);
}

#[rstest]
#[tokio::test]
async fn poll_fetch_errors_surface_unchanged(api: FakeCompute) {
    api.fail_on(FakeOperation::GetVolumeAttachment);
    let driver = driver_with(&api, default_driver_config());

    let result = driver
        .wait_for_volume_attachment_state(
            &CancellationToken::new(),
            &AttachmentId::from("va-1"),
            &[AttachmentState::Attaching],
            AttachmentState::Attached,
        )
        .await;

    assert!(
        matches!(
            result,
            Err(DriverError::Wait(PollError::Fetch(FakeComputeError::Injected {
                operation: FakeOperation::GetVolumeAttachment
            })))
        ),
        "unexpected outcome: {result:?}"
    );
}

#[rstest]
#[tokio::test]
async fn remote_errors_surface_as_api_errors(api: FakeCompute) {
    api.fail_on(FakeOperation::DeleteImage);
    let driver = driver_with(&api, default_driver_config());

    let result = driver
        .delete_image(&CancellationToken::new(), &ImageId::from("img-1"))
        .await;

    assert!(
        matches!(
            result,
            Err(DriverError::Api(FakeComputeError::Injected {
                operation: FakeOperation::DeleteImage
            }))
        ),
        "unexpected outcome: {result:?}"
    );
}

#[rstest]
#[tokio::test]
async fn cancelled_token_skips_remote_calls(api: FakeCompute) {
    let driver = driver_with(&api, default_driver_config());
    let ctx = CancellationToken::new();
    ctx.cancel();

    let result = driver.create_instance(&ctx, PUBLIC_KEY, None).await;

    assert!(
        result.as_ref().is_err_and(DriverError::is_cancelled),
        "unexpected outcome: {result:?}"
    );
    assert!(api.calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancellation_abandons_a_hanging_call(api: FakeCompute) {
    api.hang_on(FakeOperation::TerminateInstance);
    let driver = driver_with(&api, default_driver_config());
    let ctx = CancellationToken::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = driver
        .terminate_instance(&ctx, &InstanceId::from("i-1"))
        .await;

    assert!(
        matches!(
            result,
            Err(DriverError::Cancelled {
                operation: "terminate instance"
            })
        ),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(api.count(FakeOperation::TerminateInstance), 1);
}
