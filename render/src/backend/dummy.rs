//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but provides a valid,
//! observable implementation of [`GpuBackend`]:
//!
//! - every created object gets a unique id and is tracked until destroyed,
//! - every command recorded into a command buffer is kept as a
//!   [`RecordedCommand`] until the buffer is reset,
//! - submissions apply buffer copies and signal their fence immediately,
//! - the surface extent can be scripted, acquisitions/presentations can be
//!   forced out of date and object creation can be made to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, ClearValue, Extent2d, SamplerDescriptor, ScissorRect, ShaderStage,
    ShaderStages, TextureDescriptor, Viewport,
};

use super::{
    AcquireResult, BufferBarrier, BufferCopyRegion, BufferHandle, CommandBufferHandle,
    CommandPoolHandle, DescriptorImageWrite, DescriptorPoolDescriptor, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutBinding, DescriptorSetLayoutHandle, FenceHandle,
    FramebufferDescriptor, FramebufferHandle, GpuBackend, GraphicsPipelineDescriptor,
    PipelineHandle, PipelineLayoutDescriptor, PipelineLayoutHandle, PresentResult,
    RenderPassBeginInfo, RenderPassDescriptor, RenderPassHandle, SamplerHandle, SemaphoreHandle,
    ShaderModuleHandle, SubmitInfo, SwapchainDescriptor, SwapchainHandle, TextureHandle,
};

/// Kind of object tracked by the dummy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    Texture,
    Buffer,
    Sampler,
    ShaderModule,
    RenderPass,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

/// Operation that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyFailure {
    /// Creation of an object of this kind.
    Create(ObjectKind),
    /// Queue submission.
    Submit,
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2d,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass,
    BindPipeline(PipelineHandle),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(BufferHandle, u64)>,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindDescriptorSet {
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopyRegion>,
    },
    BufferBarrier(BufferBarrier),
}

#[derive(Debug)]
struct DummySwapchain {
    descriptor: SwapchainDescriptor,
    images: Vec<TextureHandle>,
    next_image: u32,
}

#[derive(Debug, Default)]
struct DummyCommandBuffer {
    pool: CommandPoolHandle,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug, Default)]
struct DummyState {
    surface_extent: Extent2d,
    live: HashMap<u64, ObjectKind>,
    created: HashMap<ObjectKind, usize>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    swapchains: HashMap<SwapchainHandle, DummySwapchain>,
    fences: HashMap<FenceHandle, bool>,
    command_buffers: HashMap<CommandBufferHandle, DummyCommandBuffer>,
    render_passes: HashMap<RenderPassHandle, RenderPassDescriptor>,
    pipeline_layouts: HashMap<PipelineLayoutHandle, PipelineLayoutDescriptor>,
    pipelines: HashMap<PipelineHandle, GraphicsPipelineDescriptor>,
    framebuffers: HashMap<FramebufferHandle, FramebufferDescriptor>,
    descriptor_writes: HashMap<DescriptorSetHandle, Vec<DescriptorImageWrite>>,
    submissions: Vec<Vec<RecordedCommand>>,
    presented: Vec<u32>,
    wait_idle_calls: usize,
    forced_out_of_date_acquires: u32,
    forced_out_of_date_presents: u32,
    failures: HashMap<DummyFailure, u32>,
}

impl DummyState {
    fn take_failure(&mut self, failure: DummyFailure) -> bool {
        match self.failures.get_mut(&failure) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn is_kind(&self, raw: u64, kind: ObjectKind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    fn record(&mut self, command_buffer: CommandBufferHandle, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer) {
            Some(cb) if cb.recording => cb.commands.push(command),
            Some(_) => log::warn!(
                "DummyBackend: command {:?} recorded into {:?} outside begin/end",
                command,
                command_buffer
            ),
            None => log::warn!(
                "DummyBackend: command recorded into unknown command buffer {:?}",
                command_buffer
            ),
        }
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_id: AtomicU64,
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Default surface extent of a new dummy backend.
    pub const DEFAULT_EXTENT: Extent2d = Extent2d::new(1280, 720);

    /// Create a new dummy backend with [`Self::DEFAULT_EXTENT`].
    pub fn new() -> Self {
        Self::with_extent(Self::DEFAULT_EXTENT)
    }

    /// Create a new dummy backend whose surface has `extent`.
    pub fn with_extent(extent: Extent2d) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(DummyState {
                surface_extent: extent,
                ..Default::default()
            }),
        }
    }

    fn create(&self, kind: ObjectKind) -> Result<u64, GraphicsError> {
        let mut state = self.state.lock();
        if state.take_failure(DummyFailure::Create(kind)) {
            log::trace!("DummyBackend: injected failure creating {:?}", kind);
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "injected failure creating {kind:?}"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.live.insert(id, kind);
        *state.created.entry(kind).or_default() += 1;
        log::trace!("DummyBackend: created {:?} #{}", kind, id);
        Ok(id)
    }

    fn destroy(&self, raw: u64, kind: ObjectKind) {
        if raw == 0 {
            return;
        }
        let mut state = self.state.lock();
        if state.is_kind(raw, kind) {
            state.live.remove(&raw);
            log::trace!("DummyBackend: destroyed {:?} #{}", kind, raw);
        } else {
            log::warn!("DummyBackend: destroy of unknown {:?} #{}", kind, raw);
        }
    }

    fn require(&self, raw: u64, kind: ObjectKind) -> Result<(), GraphicsError> {
        if self.state.lock().is_kind(raw, kind) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidHandle(format!("{kind:?} #{raw}")))
        }
    }

    // --- Scripting -------------------------------------------------------

    /// Change the reported surface extent, as a window resize would.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        self.state.lock().surface_extent = extent;
    }

    /// Make the next `count` acquisitions report an out-of-date swapchain.
    pub fn force_out_of_date(&self, count: u32) {
        self.state.lock().forced_out_of_date_acquires = count;
    }

    /// Make the next `count` presentations report an out-of-date swapchain.
    pub fn force_present_out_of_date(&self, count: u32) {
        self.state.lock().forced_out_of_date_presents = count;
    }

    /// Make the next `count` occurrences of `failure` fail.
    pub fn fail_next(&self, failure: DummyFailure, count: u32) {
        self.state.lock().failures.insert(failure, count);
    }

    // --- Inspection ------------------------------------------------------

    /// Number of live objects of `kind`.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Total number of objects of `kind` ever created.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.state.lock().created.get(&kind).copied().unwrap_or(0)
    }

    /// Returns true if the object with this raw handle is alive.
    pub fn is_alive(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// Commands currently recorded in a command buffer.
    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    /// Returns true if the command buffer is between begin and end.
    pub fn is_recording(&self, command_buffer: CommandBufferHandle) -> bool {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer)
            .is_some_and(|cb| cb.recording)
    }

    /// Commands of every submitted command buffer, one entry per submission.
    pub fn submissions(&self) -> Vec<Vec<RecordedCommand>> {
        self.state.lock().submissions.clone()
    }

    /// Image indices presented so far, in order.
    pub fn presented_images(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }

    /// Number of `wait_idle` calls.
    pub fn wait_idle_count(&self) -> usize {
        self.state.lock().wait_idle_calls
    }

    /// Contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }

    /// Descriptor a texture was created with.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.state.lock().textures.get(&texture).cloned()
    }

    /// Descriptor a render pass was created with.
    pub fn render_pass_descriptor(
        &self,
        render_pass: RenderPassHandle,
    ) -> Option<RenderPassDescriptor> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }

    /// Descriptor a pipeline layout was created with.
    pub fn pipeline_layout_descriptor(
        &self,
        layout: PipelineLayoutHandle,
    ) -> Option<PipelineLayoutDescriptor> {
        self.state.lock().pipeline_layouts.get(&layout).cloned()
    }

    /// Descriptor a graphics pipeline was created with.
    pub fn pipeline_descriptor(
        &self,
        pipeline: PipelineHandle,
    ) -> Option<GraphicsPipelineDescriptor> {
        self.state.lock().pipelines.get(&pipeline).cloned()
    }

    /// Descriptor a framebuffer was created with.
    pub fn framebuffer_descriptor(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<FramebufferDescriptor> {
        self.state.lock().framebuffers.get(&framebuffer).cloned()
    }

    /// Image/sampler writes applied to a descriptor set.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Vec<DescriptorImageWrite> {
        self.state
            .lock()
            .descriptor_writes
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        Ok(self.state.lock().surface_extent)
    }

    fn resize_surface(&self, extent: Extent2d) {
        self.set_surface_extent(extent);
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        old: Option<SwapchainHandle>,
    ) -> Result<SwapchainHandle, GraphicsError> {
        if descriptor.extent.is_zero_sized() {
            return Err(GraphicsError::InvalidParameter(
                "swapchain extent must be non-zero".to_string(),
            ));
        }
        if let Some(old) = old {
            self.require(old.0, ObjectKind::Swapchain)?;
        }
        let handle = SwapchainHandle(self.create(ObjectKind::Swapchain)?);
        let mut images = Vec::with_capacity(descriptor.image_count as usize);
        for _ in 0..descriptor.image_count {
            images.push(TextureHandle(self.create(ObjectKind::Texture)?));
        }
        log::trace!(
            "DummyBackend: creating swapchain {:?} ({}x{}, {} images)",
            handle,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.image_count
        );
        let mut state = self.state.lock();
        for image in &images {
            state.textures.insert(
                *image,
                TextureDescriptor {
                    label: Some("swapchain image".to_string()),
                    size: descriptor.extent,
                    format: descriptor.format,
                    usage: crate::types::TextureUsage::RENDER_ATTACHMENT,
                },
            );
        }
        state.swapchains.insert(
            handle,
            DummySwapchain {
                descriptor: descriptor.clone(),
                images,
                next_image: 0,
            },
        );
        Ok(handle)
    }

    fn swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> Result<Vec<TextureHandle>, GraphicsError> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{swapchain:?}")))
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> Result<AcquireResult, GraphicsError> {
        self.require(signal.0, ObjectKind::Semaphore)?;
        let mut state = self.state.lock();
        if state.forced_out_of_date_acquires > 0 {
            state.forced_out_of_date_acquires -= 1;
            return Ok(AcquireResult::OutOfDate);
        }
        let surface_extent = state.surface_extent;
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{swapchain:?}")))?;
        if chain.descriptor.extent != surface_extent {
            return Ok(AcquireResult::OutOfDate);
        }
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.descriptor.image_count;
        log::trace!("DummyBackend: acquired image {}", index);
        Ok(AcquireResult::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentResult, GraphicsError> {
        self.require(wait.0, ObjectKind::Semaphore)?;
        let mut state = self.state.lock();
        let surface_extent = state.surface_extent;
        let chain = state
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{swapchain:?}")))?;
        if image_index >= chain.descriptor.image_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "image index {image_index} out of range"
            )));
        }
        let stale = chain.descriptor.extent != surface_extent;
        state.presented.push(image_index);
        if state.forced_out_of_date_presents > 0 {
            state.forced_out_of_date_presents -= 1;
            return Ok(PresentResult::OutOfDate);
        }
        Ok(if stale {
            PresentResult::OutOfDate
        } else {
            PresentResult::Presented
        })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let chain = self.state.lock().swapchains.remove(&swapchain);
        if let Some(chain) = chain {
            for image in chain.images {
                self.state.lock().textures.remove(&image);
                self.destroy(image.0, ObjectKind::Texture);
            }
        }
        self.destroy(swapchain.0, ObjectKind::Swapchain);
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.state.lock().wait_idle_calls += 1;
        Ok(())
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );
        let handle = TextureHandle(self.create(ObjectKind::Texture)?);
        self.state.lock().textures.insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.state.lock().textures.remove(&texture);
        self.destroy(texture.0, ObjectKind::Texture);
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let handle = BufferHandle(self.create(ObjectKind::Buffer)?);
        self.state
            .lock()
            .buffers
            .insert(handle, vec![0; descriptor.size as usize]);
        Ok(handle)
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        let mut state = self.state.lock();
        let contents = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer);
        self.destroy(buffer.0, ObjectKind::Buffer);
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        Ok(SamplerHandle(self.create(ObjectKind::Sampler)?))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.destroy(sampler.0, ObjectKind::Sampler);
    }

    fn create_shader_module(
        &self,
        spirv: &[u32],
        stage: ShaderStage,
    ) -> Result<ShaderModuleHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating {:?} shader module ({} words)",
            stage,
            spirv.len()
        );
        if spirv.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "empty SPIR-V module".to_string(),
            ));
        }
        Ok(ShaderModuleHandle(self.create(ObjectKind::ShaderModule)?))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.destroy(module.0, ObjectKind::ShaderModule);
    }

    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError> {
        let handle = RenderPassHandle(self.create(ObjectKind::RenderPass)?);
        self.state
            .lock()
            .render_passes
            .insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state.lock().render_passes.remove(&render_pass);
        self.destroy(render_pass.0, ObjectKind::RenderPass);
    }

    fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutHandle, GraphicsError> {
        let handle = PipelineLayoutHandle(self.create(ObjectKind::PipelineLayout)?);
        self.state
            .lock()
            .pipeline_layouts
            .insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state.lock().pipeline_layouts.remove(&layout);
        self.destroy(layout.0, ObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError> {
        self.require(descriptor.layout.0, ObjectKind::PipelineLayout)?;
        self.require(descriptor.render_pass.0, ObjectKind::RenderPass)?;
        for stage in &descriptor.stages {
            self.require(stage.module.0, ObjectKind::ShaderModule)?;
        }
        let handle = PipelineHandle(self.create(ObjectKind::Pipeline)?);
        self.state
            .lock()
            .pipelines
            .insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline);
        self.destroy(pipeline.0, ObjectKind::Pipeline);
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferHandle, GraphicsError> {
        self.require(descriptor.render_pass.0, ObjectKind::RenderPass)?;
        for view in &descriptor.attachments {
            self.require(view.0, ObjectKind::Texture)?;
        }
        let handle = FramebufferHandle(self.create(ObjectKind::Framebuffer)?);
        self.state
            .lock()
            .framebuffers
            .insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state.lock().framebuffers.remove(&framebuffer);
        self.destroy(framebuffer.0, ObjectKind::Framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating descriptor set layout ({} bindings)",
            bindings.len()
        );
        Ok(DescriptorSetLayoutHandle(
            self.create(ObjectKind::DescriptorSetLayout)?,
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.destroy(layout.0, ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        descriptor: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating descriptor pool (max sets: {})",
            descriptor.max_sets
        );
        Ok(DescriptorPoolHandle(
            self.create(ObjectKind::DescriptorPool)?,
        ))
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<(), GraphicsError> {
        self.require(pool.0, ObjectKind::DescriptorPool)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        self.destroy(pool.0, ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        self.require(pool.0, ObjectKind::DescriptorPool)?;
        self.require(layout.0, ObjectKind::DescriptorSetLayout)?;
        Ok(DescriptorSetHandle(self.create(ObjectKind::DescriptorSet)?))
    }

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorImageWrite],
    ) -> Result<(), GraphicsError> {
        self.require(set.0, ObjectKind::DescriptorSet)?;
        self.state
            .lock()
            .descriptor_writes
            .entry(set)
            .or_default()
            .extend_from_slice(writes);
        Ok(())
    }

    fn create_command_pool(&self) -> Result<CommandPoolHandle, GraphicsError> {
        Ok(CommandPoolHandle(self.create(ObjectKind::CommandPool)?))
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<(), GraphicsError> {
        self.require(pool.0, ObjectKind::CommandPool)?;
        let mut state = self.state.lock();
        for cb in state.command_buffers.values_mut() {
            if cb.pool == pool {
                cb.recording = false;
                cb.commands.clear();
            }
        }
        log::trace!("DummyBackend: reset command pool {:?}", pool);
        Ok(())
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let freed: Vec<CommandBufferHandle> = {
            let mut state = self.state.lock();
            let freed = state
                .command_buffers
                .iter()
                .filter(|(_, cb)| cb.pool == pool)
                .map(|(handle, _)| *handle)
                .collect::<Vec<_>>();
            for handle in &freed {
                state.command_buffers.remove(handle);
            }
            freed
        };
        for handle in freed {
            self.destroy(handle.0, ObjectKind::CommandBuffer);
        }
        self.destroy(pool.0, ObjectKind::CommandPool);
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, GraphicsError> {
        self.require(pool.0, ObjectKind::CommandPool)?;
        let handle = CommandBufferHandle(self.create(ObjectKind::CommandBuffer)?);
        self.state.lock().command_buffers.insert(
            handle,
            DummyCommandBuffer {
                pool,
                ..Default::default()
            },
        );
        Ok(handle)
    }

    fn free_command_buffer(&self, _pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        self.state.lock().command_buffers.remove(&command_buffer);
        self.destroy(command_buffer.0, ObjectKind::CommandBuffer);
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        one_time: bool,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{command_buffer:?}")))?;
        if cb.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "{command_buffer:?} is already recording"
            )));
        }
        log::trace!(
            "DummyBackend: begin {:?} (one time: {})",
            command_buffer,
            one_time
        );
        cb.recording = true;
        cb.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{command_buffer:?}")))?;
        if !cb.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "{command_buffer:?} is not recording"
            )));
        }
        cb.recording = false;
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, info: &RenderPassBeginInfo) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: info.extent,
                clear_values: info.clear_values.clone(),
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &ScissorRect) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::PushConstants {
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindIndexBuffer { buffer, offset },
        );
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindDescriptorSet { layout, set },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BufferBarrier(*barrier));
    }

    fn submit(&self, info: &SubmitInfo) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.take_failure(DummyFailure::Submit) {
            return Err(GraphicsError::DeviceLost);
        }
        for (semaphore, _) in &info.wait_semaphores {
            if !state.is_kind(semaphore.0, ObjectKind::Semaphore) {
                return Err(GraphicsError::InvalidHandle(format!("{semaphore:?}")));
            }
        }
        for semaphore in &info.signal_semaphores {
            if !state.is_kind(semaphore.0, ObjectKind::Semaphore) {
                return Err(GraphicsError::InvalidHandle(format!("{semaphore:?}")));
            }
        }
        let mut executed = Vec::with_capacity(info.command_buffers.len());
        for handle in &info.command_buffers {
            let cb = state
                .command_buffers
                .get(handle)
                .ok_or_else(|| GraphicsError::InvalidHandle(format!("{handle:?}")))?;
            if cb.recording {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{handle:?} submitted while still recording"
                )));
            }
            executed.push(cb.commands.clone());
        }

        // Buffer copies are the only commands with an observable effect.
        for commands in &executed {
            for command in commands {
                if let RecordedCommand::CopyBuffer { src, dst, regions } = command {
                    for region in regions {
                        let source = state
                            .buffers
                            .get(src)
                            .map(|data| {
                                let start = region.src_offset as usize;
                                data[start..start + region.size as usize].to_vec()
                            })
                            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{src:?}")))?;
                        let target = state
                            .buffers
                            .get_mut(dst)
                            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{dst:?}")))?;
                        let start = region.dst_offset as usize;
                        target[start..start + source.len()].copy_from_slice(&source);
                    }
                }
            }
        }

        if let Some(fence) = info.fence {
            match state.fences.get_mut(&fence) {
                Some(signaled) => *signaled = true,
                None => return Err(GraphicsError::InvalidHandle(format!("{fence:?}"))),
            }
        }
        log::trace!(
            "DummyBackend: submitted {} command buffers",
            info.command_buffers.len()
        );
        state.submissions.extend(executed);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError> {
        let handle = FenceHandle(self.create(ObjectKind::Fence)?);
        self.state.lock().fences.insert(handle, signaled);
        Ok(handle)
    }

    fn wait_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError> {
        match self.state.lock().fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(GraphicsError::Internal(format!(
                "waiting on {fence:?}, which no pending submission will signal"
            ))),
            None => Err(GraphicsError::InvalidHandle(format!("{fence:?}"))),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError> {
        match self.state.lock().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(GraphicsError::InvalidHandle(format!("{fence:?}"))),
        }
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool, GraphicsError> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("{fence:?}")))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state.lock().fences.remove(&fence);
        self.destroy(fence.0, ObjectKind::Fence);
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, GraphicsError> {
        Ok(SemaphoreHandle(self.create(ObjectKind::Semaphore)?))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.destroy(semaphore.0, ObjectKind::Semaphore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_object_tracking() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        assert_eq!(backend.live_count(ObjectKind::Fence), 1);
        backend.destroy_fence(fence);
        assert_eq!(backend.live_count(ObjectKind::Fence), 0);
        assert_eq!(backend.created_count(ObjectKind::Fence), 1);
    }

    #[test]
    fn test_submit_signals_fence_and_copies() {
        let backend = DummyBackend::new();
        let src = backend.create_buffer(&BufferDescriptor::staging(4)).unwrap();
        let dst = backend.create_buffer(&BufferDescriptor::geometry(4)).unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        let pool = backend.create_command_pool().unwrap();
        let cb = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(cb, true).unwrap();
        backend.cmd_copy_buffer(
            cb,
            src,
            dst,
            &[BufferCopyRegion {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            }],
        );
        backend.end_command_buffer(cb).unwrap();

        let fence = backend.create_fence(false).unwrap();
        backend
            .submit(&SubmitInfo {
                command_buffers: vec![cb],
                fence: Some(fence),
                ..Default::default()
            })
            .unwrap();

        assert!(backend.is_fence_signaled(fence).unwrap());
        assert_eq!(backend.buffer_contents(dst).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wait_on_unsignaled_fence_fails() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        assert!(backend.wait_fence(fence).is_err());
    }

    #[test]
    fn test_injected_failure() {
        let backend = DummyBackend::new();
        backend.fail_next(DummyFailure::Create(ObjectKind::Fence), 1);
        assert!(backend.create_fence(true).is_err());
        assert!(backend.create_fence(true).is_ok());
    }

    #[test]
    fn test_acquire_out_of_date_after_resize() {
        let backend = DummyBackend::new();
        let chain = backend
            .create_swapchain(
                &SwapchainDescriptor {
                    extent: DummyBackend::DEFAULT_EXTENT,
                    image_count: 2,
                    format: crate::types::Format::Bgra8Unorm,
                    present_mode: super::super::PresentMode::Fifo,
                },
                None,
            )
            .unwrap();
        let semaphore = backend.create_semaphore().unwrap();
        assert_eq!(
            backend.acquire_next_image(chain, semaphore).unwrap(),
            AcquireResult::Acquired {
                index: 0,
                suboptimal: false
            }
        );
        backend.set_surface_extent(Extent2d::new(640, 480));
        assert_eq!(
            backend.acquire_next_image(chain, semaphore).unwrap(),
            AcquireResult::OutOfDate
        );
    }

    #[test]
    fn test_commands_outside_recording_are_dropped() {
        let backend = DummyBackend::new();
        let pool = backend.create_command_pool().unwrap();
        let cb = backend.allocate_command_buffer(pool).unwrap();
        backend.cmd_end_render_pass(cb);
        assert!(backend.recorded_commands(cb).is_empty());
    }
}
