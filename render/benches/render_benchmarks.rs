use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_render::passes::PassDescription;
use redlilium_render::swapchain::Swapchain;
use redlilium_render::{
    CommandPoolTarget, DummyBackend, GraphBuilder, InitializationParams, MeshNode, MeshPrimitive,
    NoopEventPump, OpaquePassDesc, PassBuildContext, RenderContext, RenderGraph, RenderSystem,
    RendererConfig, SceneView, stage_mesh,
};

fn quads(count: usize) -> Vec<MeshPrimitive> {
    (0..count).map(|i| MeshPrimitive::quad(1.0 + i as f32)).collect()
}

fn system() -> RenderSystem {
    RenderSystem::initialize(InitializationParams {
        config: RendererConfig::default(),
        backend: Arc::new(DummyBackend::new()),
        surface_pump: Box::new(NoopEventPump),
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Geometry staging
// ---------------------------------------------------------------------------

fn bench_stage_mesh(c: &mut Criterion) {
    let primitives = quads(256);
    c.bench_function("stage_mesh_256_quads", |b| {
        b.iter(|| black_box(stage_mesh(black_box(&primitives)).unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Pass generation
// ---------------------------------------------------------------------------

fn bench_cached_generate(c: &mut Criterion) {
    let ctx = RenderContext::new(Arc::new(DummyBackend::new()), RendererConfig::default());
    let mut graph = RenderGraph::new();
    let swapchain = Swapchain::initialize(&ctx, &mut graph).unwrap();
    let scene = SceneView::default();
    let pass_ctx = PassBuildContext {
        scene: &scene,
        image_index: 0,
        color_format: swapchain.format(),
        depth_format: swapchain.depth_format(),
        extent: swapchain.extent(),
    };
    let generator = OpaquePassDesc::default().build(&pass_ctx).unwrap();
    generator.generate(&ctx, &mut graph, 0).unwrap();

    c.bench_function("generate_cached_pso", |b| {
        b.iter(|| black_box(generator.generate(&ctx, &mut graph, 0).unwrap()));
    });
}

fn bench_build_opaque_pass(c: &mut Criterion) {
    let mut system = system();
    let mut scene = SceneView::default();
    for _ in 0..64 {
        let (mesh, primitives) = system.upload_mesh(&quads(4)).unwrap();
        scene.meshes.push(MeshNode::new(mesh, primitives));
    }
    let pass_ctx = PassBuildContext {
        scene: &scene,
        image_index: 0,
        color_format: system.swapchain().format(),
        depth_format: system.swapchain().depth_format(),
        extent: system.swapchain().extent(),
    };

    c.bench_function("make_opaque_pass_256_primitives", |b| {
        b.iter(|| {
            let mut builder = GraphBuilder::default();
            builder
                .make_pass(&OpaquePassDesc::default(), &pass_ctx, CommandPoolTarget::Frame(0))
                .unwrap();
            black_box(builder);
        });
    });
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn bench_process_empty_frame(c: &mut Criterion) {
    let mut system = system();
    let scene = SceneView::default();

    c.bench_function("process_empty_frame", |b| {
        b.iter(|| black_box(system.process(&scene).unwrap()));
    });
}

fn bench_process_frame_64_meshes(c: &mut Criterion) {
    let mut system = system();
    let mut scene = SceneView::default();
    for _ in 0..64 {
        let (mesh, primitives) = system.upload_mesh(&quads(1)).unwrap();
        scene.meshes.push(MeshNode::new(mesh, primitives));
    }

    c.bench_function("process_frame_64_meshes", |b| {
        b.iter(|| black_box(system.process(&scene).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_stage_mesh,
    bench_cached_generate,
    bench_build_opaque_pass,
    bench_process_empty_frame,
    bench_process_frame_64_meshes,
);
criterion_main!(benches);
