//! Render graph: the cache of GPU objects that outlive a single frame.
//!
//! The render graph owns everything a frame would otherwise have to rebuild:
//! pipeline state objects, per-pass framebuffers, named command pools and the
//! render targets passes attach. Its contents are scoped to the lifetime of
//! the swapchain.
//!
//! # Architecture
//!
//! | Cache | Key | Value |
//! |-------|-----|-------|
//! | PSOs | [`PipelineKey`] | [`PipelineStateObject`] via [`PsoHandle`] |
//! | Pass resources | [`PassResourceKey`] | [`PassResource`] |
//! | Command pools | [`CommandPoolKey`] | [`CommandPool`] |
//! | Render targets | name (`$.scene_color_0`, ...) | [`RenderTarget`] |
//!
//! Every cache is a `register_*` / `cached_*` pair. A miss returns `None`;
//! there is no atomic get-or-create, callers build the object and register
//! it themselves.
//!
//! # Generations
//!
//! PSOs are stored in an arena and tagged with the generation they were
//! registered in. [`RenderGraph::advance_generation`] (called when the
//! swapchain is recreated) destroys every PSO of older generations, and
//! handles pointing at them stop resolving.
//!
//! ```ignore
//! let key = generator.key(image_index);
//! let handle = match graph.cached_pso(&key) {
//!     Some(handle) => handle,
//!     None => graph.register_pso(backend, key, build_pso(ctx)?),
//! };
//! ```

mod key;

use std::collections::HashMap;

use crate::backend::{
    CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GpuBackend, PipelineHandle, PipelineLayoutHandle, RenderPassHandle,
    SamplerHandle,
};
use crate::command::CommandPool;
use crate::render_target::RenderTarget;

pub use key::{CommandPoolKey, PassResourceKey, PipelineKey, PsoHandle};

/// Bound pipeline state of one render pass configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStateObject {
    pub render_pass: RenderPassHandle,
    pub pipeline_layout: PipelineLayoutHandle,
    pub pipeline: PipelineHandle,
    /// Framebuffer used with this PSO, filled in on first execution.
    /// Owned by the matching [`PassResource`].
    pub framebuffer: Option<FramebufferHandle>,
    /// Descriptor set, present when the pass binds textures.
    pub descriptor_set: Option<DescriptorSetHandle>,
    pub descriptor_set_layout: Option<DescriptorSetLayoutHandle>,
    pub descriptor_pool: Option<DescriptorPoolHandle>,
    pub samplers: Vec<SamplerHandle>,
}

impl PipelineStateObject {
    /// Destroy every object the PSO owns. The framebuffer is left alone.
    pub fn destroy(self, backend: &dyn GpuBackend) {
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_pipeline_layout(self.pipeline_layout);
        backend.destroy_render_pass(self.render_pass);
        if let Some(pool) = self.descriptor_pool {
            backend.destroy_descriptor_pool(pool);
        }
        if let Some(layout) = self.descriptor_set_layout {
            backend.destroy_descriptor_set_layout(layout);
        }
        for sampler in self.samplers {
            backend.destroy_sampler(sampler);
        }
    }
}

/// Framebuffer and command buffer a pass records with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassResource {
    pub framebuffer: FramebufferHandle,
    pub command_buffer: CommandBufferHandle,
}

#[derive(Debug)]
struct PsoSlot {
    pso: PipelineStateObject,
    generation: u64,
}

/// Cache of pipeline state objects, pass resources, command pools and
/// render targets.
#[derive(Debug, Default)]
pub struct RenderGraph {
    generation: u64,
    psos: Vec<Option<PsoSlot>>,
    free_slots: Vec<u32>,
    pso_keys: HashMap<PipelineKey, PsoHandle>,
    pass_resources: HashMap<PassResourceKey, PassResource>,
    command_pools: HashMap<CommandPoolKey, CommandPool>,
    render_targets: HashMap<String, RenderTarget>,
}

impl RenderGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ========================================================================
    // Pipeline state objects
    // ========================================================================

    /// Register a PSO under `key`, destroying any PSO previously cached there.
    pub fn register_pso(
        &mut self,
        backend: &dyn GpuBackend,
        key: PipelineKey,
        pso: PipelineStateObject,
    ) -> PsoHandle {
        if let Some(old) = self.pso_keys.remove(&key) {
            log::warn!("Replacing cached PSO for image {}", key.image_index);
            self.remove_slot(backend, old);
        }

        let slot = PsoSlot {
            pso,
            generation: self.generation,
        };
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.psos[index as usize] = Some(slot);
                index
            }
            None => {
                self.psos.push(Some(slot));
                (self.psos.len() - 1) as u32
            }
        };
        let handle = PsoHandle {
            index,
            generation: self.generation,
        };
        self.pso_keys.insert(key, handle);
        handle
    }

    /// Look up the PSO cached under `key`.
    pub fn cached_pso(&self, key: &PipelineKey) -> Option<PsoHandle> {
        self.pso_keys
            .get(key)
            .copied()
            .filter(|handle| self.pso(*handle).is_some())
    }

    /// Resolve a PSO handle. Handles from evicted generations return `None`.
    pub fn pso(&self, handle: PsoHandle) -> Option<&PipelineStateObject> {
        match self.psos.get(handle.index as usize) {
            Some(Some(slot)) if slot.generation == handle.generation => Some(&slot.pso),
            _ => None,
        }
    }

    /// Mutable access to a PSO.
    pub fn pso_mut(&mut self, handle: PsoHandle) -> Option<&mut PipelineStateObject> {
        match self.psos.get_mut(handle.index as usize) {
            Some(Some(slot)) if slot.generation == handle.generation => Some(&mut slot.pso),
            _ => None,
        }
    }

    /// Number of live PSOs.
    pub fn pso_count(&self) -> usize {
        self.psos.iter().filter(|slot| slot.is_some()).count()
    }

    /// Start a new generation and destroy every PSO registered before it.
    pub fn advance_generation(&mut self, backend: &dyn GpuBackend) {
        self.generation += 1;
        let stale: Vec<PsoHandle> = self
            .pso_keys
            .values()
            .copied()
            .filter(|handle| handle.generation < self.generation)
            .collect();
        log::debug!(
            "Render graph generation {}: evicting {} PSOs",
            self.generation,
            stale.len()
        );
        self.pso_keys
            .retain(|_, handle| handle.generation >= self.generation);
        for handle in stale {
            self.remove_slot(backend, handle);
        }
    }

    fn remove_slot(&mut self, backend: &dyn GpuBackend, handle: PsoHandle) {
        let Some(entry) = self.psos.get_mut(handle.index as usize) else {
            return;
        };
        if !entry
            .as_ref()
            .is_some_and(|slot| slot.generation == handle.generation)
        {
            return;
        }
        if let Some(slot) = entry.take() {
            slot.pso.destroy(backend);
            self.free_slots.push(handle.index);
        }
    }

    // ========================================================================
    // Pass resources
    // ========================================================================

    /// Register the resources of a pass, destroying the framebuffer of any
    /// resource previously registered under `key`.
    pub fn register_pass_resource(
        &mut self,
        backend: &dyn GpuBackend,
        key: PassResourceKey,
        resource: PassResource,
    ) {
        let Some(old) = self.pass_resources.insert(key, resource) else {
            return;
        };
        if old.framebuffer == resource.framebuffer {
            return;
        }
        for slot in self.psos.iter_mut().flatten() {
            if slot.pso.framebuffer == Some(old.framebuffer) {
                slot.pso.framebuffer = None;
            }
        }
        backend.destroy_framebuffer(old.framebuffer);
    }

    /// Look up the resources of a pass.
    pub fn cached_pass_resource(&self, key: &PassResourceKey) -> Option<&PassResource> {
        self.pass_resources.get(key)
    }

    /// Number of cached pass resources.
    pub fn pass_resource_count(&self) -> usize {
        self.pass_resources.len()
    }

    /// Destroy every pass framebuffer and forget the pass resources.
    pub fn release_pass_resources(&mut self, backend: &dyn GpuBackend) {
        for (_, resource) in self.pass_resources.drain() {
            backend.destroy_framebuffer(resource.framebuffer);
        }
        for slot in self.psos.iter_mut().flatten() {
            slot.pso.framebuffer = None;
        }
    }

    // ========================================================================
    // Command pools
    // ========================================================================

    /// Register a named command pool, destroying any pool previously there.
    pub fn register_command_pool(
        &mut self,
        backend: &dyn GpuBackend,
        key: CommandPoolKey,
        pool: CommandPool,
    ) {
        if let Some(mut old) = self.command_pools.insert(key, pool) {
            old.destroy(backend);
        }
    }

    /// Look up a named command pool.
    pub fn cached_command_pool(&self, key: &CommandPoolKey) -> Option<&CommandPool> {
        self.command_pools.get(key)
    }

    /// Mutable access to a named command pool.
    pub fn cached_command_pool_mut(&mut self, key: &CommandPoolKey) -> Option<&mut CommandPool> {
        self.command_pools.get_mut(key)
    }

    // ========================================================================
    // Render targets
    // ========================================================================

    /// Register a render target under its name, destroying any target
    /// previously registered with that name.
    pub fn register_render_target(&mut self, backend: &dyn GpuBackend, target: RenderTarget) {
        if let Some(old) = self
            .render_targets
            .insert(target.name().to_string(), target)
        {
            old.destroy(backend);
        }
    }

    /// Look up a render target by name.
    pub fn cached_render_target(&self, name: &str) -> Option<&RenderTarget> {
        self.render_targets.get(name)
    }

    /// Number of registered render targets.
    pub fn render_target_count(&self) -> usize {
        self.render_targets.len()
    }

    /// Destroy every owned render target and forget all of them.
    pub fn release_render_targets(&mut self, backend: &dyn GpuBackend) {
        for (_, target) in self.render_targets.drain() {
            target.destroy(backend);
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroy everything the graph owns.
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        self.release_pass_resources(backend);
        self.release_render_targets(backend);
        for (_, mut pool) in self.command_pools.drain() {
            pool.destroy(backend);
        }
        self.pso_keys.clear();
        for slot in self.psos.drain(..).flatten() {
            slot.pso.destroy(backend);
        }
        self.free_slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;
    use crate::pass::RenderPassGenerator;
    use crate::types::{Extent2d, Format};

    fn key(name: &str, image_index: u32) -> PipelineKey {
        RenderPassGenerator::new(name)
            .with_shader_path(name)
            .key(image_index)
    }

    fn fake_pso(backend: &DummyBackend) -> PipelineStateObject {
        PipelineStateObject {
            render_pass: backend
                .create_render_pass(&crate::backend::RenderPassDescriptor {
                    attachments: Vec::new(),
                    color_references: Vec::new(),
                    depth_reference: None,
                    dependency: crate::backend::SubpassDependency {
                        src_stages: crate::types::PipelineStages::empty(),
                        dst_stages: crate::types::PipelineStages::empty(),
                        src_access: crate::types::AccessFlags::empty(),
                        dst_access: crate::types::AccessFlags::empty(),
                    },
                })
                .unwrap(),
            pipeline_layout: backend
                .create_pipeline_layout(&Default::default())
                .unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let backend = DummyBackend::new();
        let mut graph = RenderGraph::new();
        let key = key("opaque.wgsl", 0);

        assert!(graph.cached_pso(&key).is_none());
        let handle = graph.register_pso(&backend, key.clone(), fake_pso(&backend));
        assert_eq!(graph.cached_pso(&key), Some(handle));
        assert!(graph.pso(handle).is_some());
        assert!(graph.cached_pso(&self::key("opaque.wgsl", 1)).is_none());
    }

    #[test]
    fn test_advance_generation_evicts_and_destroys() {
        let backend = DummyBackend::new();
        let mut graph = RenderGraph::new();
        let key = key("opaque.wgsl", 0);
        let handle = graph.register_pso(&backend, key.clone(), fake_pso(&backend));
        assert_eq!(backend.live_count(ObjectKind::RenderPass), 1);

        graph.advance_generation(&backend);

        assert!(graph.cached_pso(&key).is_none());
        assert!(graph.pso(handle).is_none());
        assert_eq!(graph.pso_count(), 0);
        assert_eq!(backend.live_count(ObjectKind::RenderPass), 0);
        assert_eq!(backend.live_count(ObjectKind::PipelineLayout), 0);

        // The slot is reused, but the stale handle still does not resolve.
        let fresh = graph.register_pso(&backend, key.clone(), fake_pso(&backend));
        assert_eq!(fresh.index(), handle.index());
        assert_ne!(fresh.generation(), handle.generation());
        assert!(graph.pso(handle).is_none());
        assert!(graph.pso(fresh).is_some());
    }

    #[test]
    fn test_register_replaces_existing() {
        let backend = DummyBackend::new();
        let mut graph = RenderGraph::new();
        let key = key("opaque.wgsl", 0);
        graph.register_pso(&backend, key.clone(), fake_pso(&backend));
        graph.register_pso(&backend, key.clone(), fake_pso(&backend));
        assert_eq!(graph.pso_count(), 1);
        assert_eq!(backend.live_count(ObjectKind::RenderPass), 1);
    }

    #[test]
    fn test_render_targets() {
        let backend = DummyBackend::new();
        let mut graph = RenderGraph::new();
        let target =
            RenderTarget::create(&backend, "$.scene_depth_0", Extent2d::new(4, 4), Format::D32Sfloat)
                .unwrap();
        graph.register_render_target(&backend, target);
        assert!(graph.cached_render_target("$.scene_depth_0").is_some());
        assert!(graph.cached_render_target("$.scene_depth_1").is_none());

        graph.release_render_targets(&backend);
        assert_eq!(graph.render_target_count(), 0);
        assert_eq!(backend.live_count(ObjectKind::Texture), 0);
    }

    #[test]
    fn test_command_pools() {
        let backend = DummyBackend::new();
        let mut graph = RenderGraph::new();
        let mut pool = CommandPool::default();
        pool.allocate(&backend).unwrap();
        graph.register_command_pool(&backend, "upload".into(), pool);
        assert!(graph.cached_command_pool(&"upload".into()).is_some());
        assert!(graph.cached_command_pool(&"other".into()).is_none());

        graph.destroy(&backend);
        assert_eq!(backend.live_count(ObjectKind::CommandPool), 0);
    }
}
