//! Swapchain acquisition, presentation and recreation.
//!
//! # Test Categories
//!
//! - **Acquisition**: images are handed out in order, out-of-date and dirty
//!   swapchains are recreated instead
//! - **Recreation**: render targets keep their names, PSOs are evicted,
//!   zero-sized surfaces are waited out
//! - **Presentation**: non-optimal presents dirty the swapchain

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{Backend, TestContext};
use redlilium_render::backend::dummy::ObjectKind;
use redlilium_render::passes::PassDescription;
use redlilium_render::swapchain::{color_target_name, depth_target_name};
use redlilium_render::{
    AcquireOutcome, DummyBackend, Extent2d, OpaquePassDesc, PassBuildContext, SceneView,
    SurfaceEventPump, SwapchainState,
};

/// Restores the surface extent after a few pumped events, like a window
/// being restored from minimized.
struct RestoringPump {
    backend: Arc<DummyBackend>,
    pumped: u32,
    restore_after: u32,
    extent: Extent2d,
}

impl SurfaceEventPump for RestoringPump {
    fn pump_events(&mut self) {
        self.pumped += 1;
        if self.pumped >= self.restore_after {
            self.backend.set_surface_extent(self.extent);
        }
    }
}

fn acquire(tc: &mut TestContext, frame: usize) -> AcquireOutcome {
    let mut pump = redlilium_render::NoopEventPump;
    tc.swapchain
        .request_new_presentable_image(&tc.ctx, &mut tc.graph, frame, &mut pump)
        .unwrap()
}

/// Cache the opaque pass PSO for `image_index`.
fn generate_opaque(tc: &mut TestContext, image_index: u32) {
    let scene = SceneView::default();
    let pass_ctx = PassBuildContext {
        scene: &scene,
        image_index,
        color_format: tc.swapchain.format(),
        depth_format: tc.swapchain.depth_format(),
        extent: tc.swapchain.extent(),
    };
    let generator = OpaquePassDesc::default().build(&pass_ctx).unwrap();
    generator
        .generate(&tc.ctx, &mut tc.graph, image_index)
        .unwrap();
}

// ============================================================================
// Acquisition
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_images_acquired_in_order(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Ready(0));
    assert_eq!(tc.swapchain.current_image(), Some(0));
    assert_eq!(acquire(&mut tc, 1), AcquireOutcome::Ready(1));
    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Ready(0));

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_out_of_date_acquire_recreates(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.dummy.force_out_of_date(1);

    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Recreated);
    assert_eq!(tc.dummy.wait_idle_count(), 1);
    assert_eq!(tc.graph.generation(), 1);
    assert_eq!(tc.swapchain.state(), SwapchainState::Clean);

    // The next acquisition goes through on the new swapchain.
    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Ready(0));

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_dirty_swapchain_recreated_before_acquire(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let old = tc.swapchain.handle();

    tc.swapchain.mark_dirty();
    assert!(tc.swapchain.is_dirty());
    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Recreated);

    assert!(!tc.swapchain.is_dirty());
    assert_ne!(tc.swapchain.handle(), old);
    assert!(!tc.dummy.is_alive(old.raw()));
    assert_eq!(tc.live(ObjectKind::Swapchain), 1);

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_acquire_semaphore_per_frame(#[case] backend: Backend) {
    let Some(tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let first = tc.swapchain.acquire_semaphore(0).unwrap();
    let second = tc.swapchain.acquire_semaphore(1).unwrap();
    assert_ne!(first, second);
    assert!(tc.swapchain.acquire_semaphore(2).is_err());

    tc.destroy();
}

// ============================================================================
// Recreation
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_recreation_keeps_target_names(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let image_count = tc.swapchain.image_count();
    assert_eq!(tc.graph.render_target_count(), 2 * image_count as usize);

    let old_views: Vec<_> = (0..image_count)
        .map(|i| tc.graph.cached_render_target(&depth_target_name(i)).unwrap().view())
        .collect();

    let resized = Extent2d::new(1024, 768);
    tc.dummy.set_surface_extent(resized);
    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Recreated);

    assert_eq!(tc.swapchain.extent(), resized);
    assert_eq!(tc.graph.render_target_count(), 2 * image_count as usize);
    for i in 0..image_count {
        let color = tc.graph.cached_render_target(&color_target_name(i)).unwrap();
        assert_eq!(color.extent(), resized);
        assert_eq!(color.view(), tc.swapchain.images()[i as usize]);

        let depth = tc.graph.cached_render_target(&depth_target_name(i)).unwrap();
        assert_eq!(depth.extent(), resized);
        assert_eq!(depth.format(), tc.swapchain.depth_format());
        assert!(!tc.dummy.is_alive(old_views[i as usize].raw()));
    }

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_recreation_evicts_psos(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    generate_opaque(&mut tc, 0);
    generate_opaque(&mut tc, 1);
    assert_eq!(tc.graph.pso_count(), 2);
    assert_eq!(tc.live(ObjectKind::Pipeline), 2);

    tc.swapchain.mark_dirty();
    assert_eq!(acquire(&mut tc, 0), AcquireOutcome::Recreated);

    assert_eq!(tc.graph.generation(), 1);
    assert_eq!(tc.graph.pso_count(), 0);
    assert_eq!(tc.live(ObjectKind::Pipeline), 0);
    assert_eq!(tc.live(ObjectKind::PipelineLayout), 0);

    // PSOs are regenerated lazily under the new generation.
    generate_opaque(&mut tc, 0);
    assert_eq!(tc.graph.pso_count(), 1);

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_zero_extent_waits_for_events(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    tc.dummy.set_surface_extent(Extent2d::new(0, 0));
    let mut pump = RestoringPump {
        backend: tc.dummy.clone(),
        pumped: 0,
        restore_after: 3,
        extent: Extent2d::new(320, 240),
    };
    let outcome = tc
        .swapchain
        .request_new_presentable_image(&tc.ctx, &mut tc.graph, 0, &mut pump)
        .unwrap();

    assert_eq!(outcome, AcquireOutcome::Recreated);
    assert_eq!(pump.pumped, 3);
    assert_eq!(tc.swapchain.extent(), Extent2d::new(320, 240));

    tc.destroy();
}

// ============================================================================
// Presentation
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_present_clears_current_image(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let AcquireOutcome::Ready(index) = acquire(&mut tc, 0) else {
        panic!("expected an image");
    };
    let wait = tc.frames[0].render_finished.handle();
    let result = tc.swapchain.present(tc.ctx.backend(), index, wait).unwrap();

    assert_eq!(result, redlilium_render::backend::PresentResult::Presented);
    assert_eq!(tc.swapchain.current_image(), None);
    assert!(!tc.swapchain.is_dirty());
    assert_eq!(tc.dummy.presented_images(), vec![index]);

    tc.destroy();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_out_of_date_present_marks_dirty(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    tc.allocate_frames();

    let AcquireOutcome::Ready(index) = acquire(&mut tc, 0) else {
        panic!("expected an image");
    };
    tc.dummy.force_present_out_of_date(1);
    let wait = tc.frames[0].render_finished.handle();
    tc.swapchain.present(tc.ctx.backend(), index, wait).unwrap();

    assert!(tc.swapchain.is_dirty());
    assert_eq!(acquire(&mut tc, 1), AcquireOutcome::Recreated);
    assert!(!tc.swapchain.is_dirty());

    tc.destroy();
}
