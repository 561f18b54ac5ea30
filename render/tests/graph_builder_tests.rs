//! Graph builder execution against a backend.
//!
//! # Test Categories
//!
//! - **Failure policy**: a failed action does not stop the sequence unless
//!   the builder aborts on failure
//! - **Frames**: a whole frame (acquire, upload, pass, submit, present)
//!   expressed as graph actions
//! - **Staging**: staging buffers live until the frame's fence is waited on

mod common;

use rstest::rstest;

use common::{Backend, TestContext, triangle};
use redlilium_render::backend::RecordedCommand;
use redlilium_render::backend::dummy::{DummyFailure, ObjectKind};
use redlilium_render::graph::CommandPoolKey;
use redlilium_render::{
    CommandPoolTarget, FailurePolicy, GraphBuilder, GraphicsError, MeshNode, OpaquePassDesc,
    PassBuildContext, RendererConfig, SceneView, SubmitCommandParams, stage_mesh,
};

// ============================================================================
// Failure policy
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_failed_action_does_not_stop_the_sequence(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut builder = GraphBuilder::new(FailurePolicy::ContinueOnFailure);
    builder
        .wait_fence(0)
        .allocate_fence(1, true)
        .allocate_command_pool(CommandPoolTarget::Frame(0))
        .reset_fence(0)
        .allocate_command_buffer(CommandPoolTarget::Frame(0));
    let report = tc.execute(builder, None);

    assert_eq!(report.outcomes.len(), 5);
    assert!(!report.aborted);
    assert!(matches!(
        report.outcomes[0].result,
        Err(GraphicsError::InvalidHandle(_))
    ));
    assert!(report.outcomes[1].is_ok());
    assert!(report.outcomes[2].is_ok());
    assert!(!report.outcomes[3].is_ok());
    assert!(report.outcomes[4].is_ok());

    assert!(!tc.frames[1].in_flight.is_null());
    assert!(tc.frames[0].command_pool.command_buffer().is_some());
    assert_eq!(report.failures().count(), 2);

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_abort_on_failure_stops(#[case] backend: Backend) {
    let config = RendererConfig::default().with_failure_policy(FailurePolicy::AbortOnFailure);
    let Some(mut tc) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut builder = tc.builder();
    assert_eq!(builder.policy(), FailurePolicy::AbortOnFailure);
    builder.wait_fence(0).allocate_fence(1, true);
    let report = tc.execute(builder, None);

    assert_eq!(report.outcomes.len(), 1);
    assert!(report.aborted);
    assert!(tc.frames[1].in_flight.is_null());

    tc.destroy();
}

// ============================================================================
// Frames
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_frame_as_actions(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let staged = stage_mesh(&[triangle(), triangle()]).unwrap();
    let geometry = tc.geometry.reserve();
    let scene = SceneView {
        meshes: vec![MeshNode::new(geometry, staged.ranges.clone())],
        ..Default::default()
    };

    let pool = CommandPoolTarget::Frame(0);
    let submit = SubmitCommandParams {
        wait: Some(tc.swapchain.acquire_semaphore(0).unwrap()),
        signal: Some(tc.frames[0].render_finished.handle()),
        fence: Some(tc.frames[0].in_flight.handle()),
        ..Default::default()
    };
    let pass_ctx = PassBuildContext {
        scene: &scene,
        image_index: 0,
        color_format: tc.swapchain.format(),
        depth_format: tc.swapchain.depth_format(),
        extent: tc.swapchain.extent(),
    };

    let mut builder = tc.builder();
    builder
        .wait_fence(0)
        .acquire_presentable_surface(0)
        .reset_fence(0)
        .reset_command_pool(pool.clone())
        .allocate_command_buffer(pool.clone())
        .enable_command_buffer_recording(pool.clone());
    builder.upload_geometry(staged, geometry, pool.clone(), 0);
    builder
        .make_pass(&OpaquePassDesc::presenting(), &pass_ctx, pool.clone())
        .unwrap()
        .disable_command_buffer_recording(pool.clone())
        .submit_commands(pool, submit)
        .present(0);

    let report = tc.execute(builder, None);
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.draw_count(), 2);
    assert_eq!(tc.dummy.presented_images(), vec![0]);

    let submissions = tc.dummy.submissions();
    let frame = submissions.last().unwrap();
    let copy = frame
        .iter()
        .position(|c| matches!(c, RecordedCommand::CopyBuffer { .. }))
        .unwrap();
    let barrier = frame
        .iter()
        .position(|c| matches!(c, RecordedCommand::BufferBarrier(_)))
        .unwrap();
    let begin = frame
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
        .unwrap();
    assert!(copy < barrier && barrier < begin);

    // The staging buffer stays alive until the frame's fence is waited on.
    assert_eq!(tc.frames[0].retired_staging().len(), 1);
    let staging = tc.frames[0].retired_staging()[0];
    assert!(tc.dummy.is_alive(staging.raw()));

    let mut builder = tc.builder();
    builder.wait_fence(0);
    assert!(tc.execute(builder, None).is_success());
    assert!(!tc.dummy.is_alive(staging.raw()));

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_out_of_date_acquire_fails_the_action(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();
    tc.dummy.force_out_of_date(1);

    let mut builder = tc.builder();
    builder.acquire_presentable_surface(0).reset_fence(0);
    let report = tc.execute(builder, None);

    assert!(matches!(
        report.outcomes[0].result,
        Err(GraphicsError::SurfaceOutdated)
    ));
    assert!(report.outcomes[1].is_ok());
    assert_eq!(tc.dummy.wait_idle_count(), 1);
    assert!(tc.frames[0].surface.image_index.is_none());

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_pass_without_image_fails(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let scene = SceneView::default();
    let pass_ctx = PassBuildContext {
        scene: &scene,
        image_index: 0,
        color_format: tc.swapchain.format(),
        depth_format: tc.swapchain.depth_format(),
        extent: tc.swapchain.extent(),
    };
    let pool = CommandPoolTarget::Frame(0);
    let mut builder = tc.builder();
    builder.enable_command_buffer_recording(pool.clone());
    builder
        .make_pass(&OpaquePassDesc::default(), &pass_ctx, pool.clone())
        .unwrap()
        .disable_command_buffer_recording(pool);

    let report = tc.execute(builder, None);
    assert!(report.failed("render_pass('opaque')"));
    assert!(report.outcomes[2].is_ok());

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_cached_command_pool(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let target = CommandPoolTarget::Cached(CommandPoolKey::from("uploads"));
    let mut builder = tc.builder();
    builder
        .allocate_command_pool(target.clone())
        .allocate_command_pool(target.clone())
        .allocate_command_buffer(target.clone())
        .enable_command_buffer_recording(target.clone())
        .disable_command_buffer_recording(target.clone())
        .submit_commands(target.clone(), SubmitCommandParams::default())
        .release_command_buffer(target);
    let report = tc.execute(builder, None);

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(tc.live(ObjectKind::CommandPool), 1);
    assert_eq!(tc.live(ObjectKind::CommandBuffer), 0);
    assert_eq!(tc.dummy.submissions().len(), 1);

    tc.destroy();
}

// ============================================================================
// Staging
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_unfinished_upload_releases_staging(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let staged = stage_mesh(&[triangle()]).unwrap();
    let geometry = tc.geometry.reserve();
    let buffers_before = tc.live(ObjectKind::Buffer);

    // The transfer fails: the command buffer is not recording.
    let mut builder = tc.builder();
    builder.upload_geometry(staged, geometry, CommandPoolTarget::Frame(0), 0);
    let report = tc.execute(builder, None);

    assert!(report.failed("buffer.transfer_to_gpu"));
    assert!(tc.frames[0].retired_staging().is_empty());
    // Only the device-local buffer survives.
    assert_eq!(tc.live(ObjectKind::Buffer), buffers_before + 1);
    assert!(tc.geometry.resolve(geometry).is_some());

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_stage_without_staging_buffer_fails(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let staged = stage_mesh(&[triangle()]).unwrap();
    let geometry = tc.geometry.reserve();
    let pool = CommandPoolTarget::Frame(0);
    tc.dummy.fail_next(DummyFailure::Create(ObjectKind::Buffer), 1);

    let mut builder = tc.builder();
    builder.enable_command_buffer_recording(pool.clone());
    builder.upload_geometry(staged, geometry, pool.clone(), 0);
    builder.disable_command_buffer_recording(pool);
    let report = tc.execute(builder, None);

    assert!(report.failed("buffer.allocate_cpu"));
    assert!(matches!(
        report.outcomes[2].result,
        Err(GraphicsError::InvalidHandle(_))
    ));
    // The device-local buffer still exists, but nothing was copied into it.
    assert!(report.outcomes[3].is_ok());
    assert!(report.failed("buffer.transfer_to_gpu"));
    assert!(report.outcomes[5].is_ok());
    assert!(tc.frames[0].retired_staging().is_empty());

    tc.destroy();
}
