//! The render system frame loop.
//!
//! # Test Categories
//!
//! - **Frame loop**: frames alternate between slots, resizes skip a frame
//! - **Uploads**: queued meshes are drawn by the frame that uploads them
//! - **Failures**: a failed submission does not stall later frames
//! - **Lifecycle**: shutdown releases every GPU object

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{Backend, init_logging, triangle};
use redlilium_render::backend::dummy::{DummyFailure, ObjectKind};
use redlilium_render::{
    DummyBackend, Extent2d, FailurePolicy, InitializationParams, MeshNode, MeshPasses,
    MeshPrimitive, NoopEventPump, RenderSystem, RendererConfig, SceneView, SurfaceEventPump,
};

const ALL_KINDS: [ObjectKind; 16] = [
    ObjectKind::Swapchain,
    ObjectKind::Texture,
    ObjectKind::Buffer,
    ObjectKind::Sampler,
    ObjectKind::ShaderModule,
    ObjectKind::RenderPass,
    ObjectKind::PipelineLayout,
    ObjectKind::Pipeline,
    ObjectKind::Framebuffer,
    ObjectKind::DescriptorSetLayout,
    ObjectKind::DescriptorPool,
    ObjectKind::DescriptorSet,
    ObjectKind::CommandPool,
    ObjectKind::CommandBuffer,
    ObjectKind::Fence,
    ObjectKind::Semaphore,
];

/// Restores the surface once pumped, like a window coming back from
/// minimized.
struct RestoringPump {
    backend: Arc<DummyBackend>,
    extent: Extent2d,
}

impl SurfaceEventPump for RestoringPump {
    fn pump_events(&mut self) {
        self.backend.set_surface_extent(self.extent);
    }
}

fn create_system(
    backend: Backend,
    config: RendererConfig,
) -> Option<(RenderSystem, Arc<DummyBackend>)> {
    init_logging();
    if !backend.is_available() {
        return None;
    }
    let dummy = Arc::new(DummyBackend::new());
    let system = RenderSystem::initialize(InitializationParams {
        config,
        backend: dummy.clone(),
        surface_pump: Box::new(NoopEventPump),
    })
    .ok()?;
    Some((system, dummy))
}

// ============================================================================
// Frame loop
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_frames_alternate(#[case] backend: Backend) {
    let Some((mut system, dummy)) = create_system(backend, RendererConfig::default()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let scene = SceneView::default();

    let mut slots = Vec::new();
    for _ in 0..4 {
        slots.push(system.frame_index());
        assert!(system.process(&scene).unwrap());
        assert!(system.last_report().is_success(), "{:?}", system.last_report());
    }

    assert_eq!(slots, vec![0, 1, 0, 1]);
    assert_eq!(dummy.presented_images(), vec![0, 1, 0, 1]);
    assert_eq!(dummy.submissions().len(), 4);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_resize_skips_a_frame(#[case] backend: Backend) {
    let Some((mut system, dummy)) = create_system(backend, RendererConfig::default()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let scene = SceneView::default();
    assert!(system.process(&scene).unwrap());
    let generation = system.render_graph().generation();

    system.handle_resize(640, 480);
    assert!(!system.process(&scene).unwrap());
    assert_eq!(system.frame_index(), 1);
    assert_eq!(system.swapchain().extent(), Extent2d::new(640, 480));
    assert_eq!(system.render_graph().generation(), generation + 1);
    assert_eq!(system.render_graph().pass_resource_count(), 0);

    assert!(system.process(&scene).unwrap());
    assert_eq!(dummy.presented_images().len(), 2);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_minimized_window_waits_for_surface(#[case] backend: Backend) {
    init_logging();
    if !backend.is_available() {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    }
    let dummy = Arc::new(DummyBackend::new());
    let mut system = RenderSystem::initialize(InitializationParams {
        config: RendererConfig::default(),
        backend: dummy.clone(),
        surface_pump: Box::new(RestoringPump {
            backend: dummy.clone(),
            extent: Extent2d::new(400, 300),
        }),
    })
    .unwrap();
    let scene = SceneView::default();

    system.handle_resize(0, 0);
    assert!(system.is_surface_invalid());
    assert!(!system.process(&scene).unwrap());

    assert!(!system.is_surface_invalid());
    assert_eq!(system.swapchain().extent(), Extent2d::new(400, 300));
    assert!(system.process(&scene).unwrap());
}

// ============================================================================
// Uploads
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_queued_mesh_drawn_by_uploading_frame(#[case] backend: Backend) {
    let Some((mut system, dummy)) = create_system(backend, RendererConfig::default()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (mesh, primitives) = system
        .queue_mesh_upload(&[triangle(), triangle(), triangle()])
        .unwrap();
    assert!(system.geometry().resolve(mesh).is_none());

    let scene = SceneView {
        meshes: vec![MeshNode::new(mesh, primitives)],
        ..Default::default()
    };
    assert!(system.process(&scene).unwrap());

    assert!(system.last_report().is_success(), "{:?}", system.last_report());
    assert_eq!(system.last_report().draw_count(), 3);
    let buffer = system.geometry().resolve(mesh).unwrap();
    assert!(dummy.is_alive(buffer.raw()));
    assert_eq!(system.frames()[0].retired_staging().len(), 1);

    // The upload is not repeated.
    assert!(system.process(&scene).unwrap());
    assert_eq!(system.last_report().draw_count(), 3);
    assert!(!system.last_report().failed("buffer"));
    assert!(system.frames()[1].retired_staging().is_empty());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_uploaded_mesh_drawn_immediately(#[case] backend: Backend) {
    let Some((mut system, _dummy)) = create_system(backend, RendererConfig::default()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (mesh, primitives) = system.upload_mesh(&[MeshPrimitive::quad(1.0)]).unwrap();
    assert!(system.geometry().resolve(mesh).is_some());

    let scene = SceneView {
        meshes: vec![MeshNode::new(mesh, primitives)],
        ..Default::default()
    };
    assert!(system.process(&scene).unwrap());
    assert_eq!(system.last_report().draw_count(), 1);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_floor_grid_pass(#[case] backend: Backend) {
    let config = RendererConfig::default().with_floor_grid(true);
    let Some((mut system, _dummy)) = create_system(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (floor, floor_primitives) = system.upload_mesh(&[MeshPrimitive::quad(10.0)]).unwrap();
    let (mesh, primitives) = system.upload_mesh(&[triangle()]).unwrap();
    let scene = SceneView {
        meshes: vec![
            MeshNode::new(floor, floor_primitives).with_passes(MeshPasses::FLOOR_GRID),
            MeshNode::new(mesh, primitives),
        ],
        ..Default::default()
    };
    assert!(system.process(&scene).unwrap());

    let report = system.last_report();
    assert!(report.is_success(), "{:?}", report);
    let passes: Vec<_> = report
        .outcomes
        .iter()
        .filter(|outcome| outcome.label.starts_with("render_pass"))
        .map(|outcome| outcome.label.as_str())
        .collect();
    assert_eq!(passes, vec!["render_pass('opaque')", "render_pass('floor_grid')"]);
    assert_eq!(report.draw_count(), 2);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_single_pass_without_floor_grid(#[case] backend: Backend) {
    let config = RendererConfig::default().with_floor_grid(false);
    let Some((mut system, _dummy)) = create_system(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert!(system.process(&SceneView::default()).unwrap());
    assert_eq!(system.last_report().pass_stats().count(), 1);
    assert!(!system.last_report().failed("render_pass"));
}

// ============================================================================
// Failures
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_failed_submit_does_not_stall(#[case] backend: Backend) {
    let Some((mut system, dummy)) = create_system(backend, RendererConfig::default()) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let scene = SceneView::default();

    dummy.fail_next(DummyFailure::Submit, 1);
    assert!(system.process(&scene).unwrap());
    assert!(system.last_report().failed("command_pool.submit"));
    assert!(system.swapchain().is_dirty());

    // The unsubmitted frame's image and semaphore are dropped with the
    // swapchain.
    assert!(!system.process(&scene).unwrap());

    // Slot 0 comes around again; its fence must not block.
    for _ in 0..3 {
        assert!(system.process(&scene).unwrap());
        assert!(system.last_report().is_success(), "{:?}", system.last_report());
    }
    assert_eq!(dummy.submissions().len(), 3);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_aborted_frame_does_not_stall(#[case] backend: Backend) {
    let config = RendererConfig::default().with_failure_policy(FailurePolicy::AbortOnFailure);
    let Some((mut system, dummy)) = create_system(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let scene = SceneView::default();

    dummy.fail_next(DummyFailure::Create(ObjectKind::Framebuffer), 1);
    assert!(system.process(&scene).unwrap());
    let report = system.last_report();
    assert!(report.aborted);
    assert!(report.failed("render_pass('opaque')"));
    assert!(!report.failed("command_pool.submit"));
    assert!(dummy.submissions().is_empty());
    assert!(system.frames()[0].surface.image_index.is_none());

    assert!(!system.process(&scene).unwrap());
    for _ in 0..4 {
        assert!(system.process(&scene).unwrap());
        assert!(system.last_report().is_success(), "{:?}", system.last_report());
    }
    assert_eq!(dummy.submissions().len(), 4);
    assert_eq!(dummy.presented_images().len(), 4);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_initialization_failure_leaks_nothing(#[case] backend: Backend) {
    init_logging();
    if !backend.is_available() {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    }
    let dummy = Arc::new(DummyBackend::new());
    dummy.fail_next(DummyFailure::Create(ObjectKind::CommandPool), 1);

    let result = RenderSystem::initialize(InitializationParams {
        config: RendererConfig::default(),
        backend: dummy.clone(),
        surface_pump: Box::new(NoopEventPump),
    });

    assert!(result.is_err());
    for kind in ALL_KINDS {
        assert_eq!(dummy.live_count(kind), 0, "{:?} leaked", kind);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_shutdown_releases_everything(#[case] backend: Backend) {
    let config = RendererConfig::default().with_floor_grid(true);
    let Some((mut system, dummy)) = create_system(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (mesh, primitives) = system.queue_mesh_upload(&[triangle()]).unwrap();
    let scene = SceneView {
        meshes: vec![MeshNode::new(mesh, primitives)],
        ..Default::default()
    };
    for _ in 0..3 {
        system.process(&scene).unwrap();
    }
    system.handle_resize(800, 600);
    for _ in 0..3 {
        system.process(&scene).unwrap();
    }
    assert!(dummy.live_count(ObjectKind::Pipeline) > 0);

    system.shutdown();
    for kind in ALL_KINDS {
        assert_eq!(dummy.live_count(kind), 0, "{:?} leaked", kind);
    }

    // Dropping after an explicit shutdown is a no-op.
    drop(system);
    assert_eq!(dummy.wait_idle_count(), 2);
}
