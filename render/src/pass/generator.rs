//! Pipeline state generation from a declarative pass configuration.

use std::path::PathBuf;

use crate::backend::{
    AttachmentDescription, AttachmentReference, ColorBlendAttachment, DepthBiasState,
    DescriptorImageWrite, DescriptorPoolDescriptor, DescriptorSetLayoutBinding, DynamicState,
    GraphicsPipelineDescriptor, PipelineLayoutDescriptor, PipelineShaderStage, PushConstantRange,
    RenderPassDescriptor, ShaderModuleHandle, SubpassDependency, VertexAttributeDescription,
    VertexBindingDescription,
};
use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::graph::{PipelineKey, PipelineStateObject, PsoHandle, RenderGraph};
use crate::profiling::profile_scope;
use crate::render_target::{RenderTarget, common_extent};
use crate::types::{
    AccessFlags, ColorWriteMask, CompareOp, CullMode, Extent2d, ImageLayout, PipelineStages,
    PolygonMode, PrimitiveTopology, ShaderStage, ShaderStages, VertexInputRate, WindingOrder,
};

use super::config::{
    AttachmentConfig, PassSignature, PrimitiveDraw, PushConstantConfig, RasterizationConfig,
    SamplerBindingConfig, ShaderConfig, VertexGroupConfig,
};

/// Entry point of the vertex stage set by [`RenderPassGenerator::with_shader_path`].
pub const DEFAULT_VERTEX_ENTRY: &str = "vs_main";
/// Entry point of the fragment stage set by [`RenderPassGenerator::with_shader_path`].
pub const DEFAULT_FRAGMENT_ENTRY: &str = "fs_main";

/// Declarative description of one render pass.
///
/// The generator is configured fluently, then turned into a cached
/// [`PipelineStateObject`] by [`Self::generate`]:
///
/// ```ignore
/// let generator = RenderPassGenerator::new("opaque")
///     .with_shader_path("opaque.wgsl")
///     .with_cull_mode(CullMode::Back)
///     .add_attachment(color)
///     .add_attachment(depth);
/// let pso = generator.generate(&ctx, &mut graph, image_index)?;
/// ```
#[derive(Debug, Clone)]
pub struct RenderPassGenerator {
    name: String,
    rasterization: RasterizationConfig,
    shaders: Vec<ShaderConfig>,
    attachments: Vec<AttachmentConfig>,
    push_constants: Vec<PushConstantConfig>,
    vertex_groups: Vec<VertexGroupConfig>,
    samplers: Vec<SamplerBindingConfig>,
    primitives: Vec<PrimitiveDraw>,
}

impl RenderPassGenerator {
    /// Create an empty pass configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rasterization: RasterizationConfig::default(),
            shaders: Vec::new(),
            attachments: Vec::new(),
            push_constants: Vec::new(),
            vertex_groups: Vec::new(),
            samplers: Vec::new(),
            primitives: Vec::new(),
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Add (or replace) the shader of one stage.
    pub fn with_shader(
        mut self,
        stage: ShaderStage,
        path: impl Into<PathBuf>,
        entry_point: impl Into<String>,
    ) -> Self {
        self.shaders.retain(|shader| shader.stage != stage);
        self.shaders.push(ShaderConfig {
            stage,
            path: path.into(),
            entry_point: entry_point.into(),
        });
        self.shaders.sort_by_key(|shader| shader.stage);
        self
    }

    /// Use one WGSL file for both stages, with `vs_main` and `fs_main`
    /// entry points.
    pub fn with_shader_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.with_shader(ShaderStage::Vertex, path.clone(), DEFAULT_VERTEX_ENTRY)
            .with_shader(ShaderStage::Fragment, path, DEFAULT_FRAGMENT_ENTRY)
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.rasterization.cull_mode = cull_mode;
        self
    }

    pub fn with_winding_order(mut self, winding_order: WindingOrder) -> Self {
        self.rasterization.winding_order = winding_order;
        self
    }

    /// Set the depth bias constant factor, slope factor and clamp.
    pub fn with_depth_bias(mut self, constant: f32, slope: f32, clamp: f32) -> Self {
        self.rasterization.depth_bias = DepthBiasState::new(constant, slope, clamp);
        self
    }

    pub fn with_depth_compare(mut self, compare: CompareOp) -> Self {
        self.rasterization.depth_compare = compare;
        self
    }

    /// Append an attachment. Attachment order is framebuffer order.
    pub fn add_attachment(mut self, attachment: AttachmentConfig) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Declare a push constant block with one data blob per primitive.
    pub fn add_push_constant(mut self, stage: ShaderStage, size: u32, data: Vec<Vec<u8>>) -> Self {
        self.push_constants
            .push(PushConstantConfig { stage, size, data });
        self
    }

    pub fn add_vertex_group(mut self, group: VertexGroupConfig) -> Self {
        self.vertex_groups.push(group);
        self
    }

    pub fn add_sampler_binding(mut self, binding: SamplerBindingConfig) -> Self {
        self.samplers.push(binding);
        self
    }

    pub fn add_primitive(mut self, primitive: PrimitiveDraw) -> Self {
        self.primitives.push(primitive);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rasterization(&self) -> &RasterizationConfig {
        &self.rasterization
    }

    pub fn shaders(&self) -> &[ShaderConfig] {
        &self.shaders
    }

    pub fn attachments(&self) -> &[AttachmentConfig] {
        &self.attachments
    }

    pub fn push_constants(&self) -> &[PushConstantConfig] {
        &self.push_constants
    }

    pub fn vertex_groups(&self) -> &[VertexGroupConfig] {
        &self.vertex_groups
    }

    pub fn samplers(&self) -> &[SamplerBindingConfig] {
        &self.samplers
    }

    pub fn primitives(&self) -> &[PrimitiveDraw] {
        &self.primitives
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    /// The configuration that identifies the pipeline.
    pub fn signature(&self) -> PassSignature {
        PassSignature {
            name: self.name.clone(),
            rasterization: self.rasterization,
            shaders: self.shaders.clone(),
            attachments: self.attachments.clone(),
            push_constants: self
                .push_constants
                .iter()
                .map(|pc| (pc.stage, pc.size))
                .collect(),
            vertex_groups: self.vertex_groups.clone(),
            samplers: self.samplers.clone(),
        }
    }

    /// Cache key of the PSO for `image_index`.
    pub fn key(&self, image_index: u32) -> PipelineKey {
        PipelineKey::new(self.signature(), image_index)
    }

    /// Push constant ranges of the pipeline layout.
    ///
    /// Vertex blocks are packed into one range starting at 0, fragment
    /// blocks into a second range right after it.
    pub fn push_constant_ranges(&self) -> Vec<PushConstantRange> {
        let (vertex, fragment) = self.push_constant_sizes();
        let mut ranges = Vec::with_capacity(2);
        if vertex > 0 {
            ranges.push(PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: vertex,
            });
        }
        if fragment > 0 {
            ranges.push(PushConstantRange {
                stages: ShaderStages::FRAGMENT,
                offset: vertex,
                size: fragment,
            });
        }
        ranges
    }

    /// Byte offset of every push constant block, in declaration order.
    pub fn push_constant_offsets(&self) -> Vec<u32> {
        let mut vertex = 0;
        let mut fragment = self.push_constant_sizes().0;
        self.push_constants
            .iter()
            .map(|pc| match pc.stage {
                ShaderStage::Vertex => {
                    let offset = vertex;
                    vertex += pc.size;
                    offset
                }
                ShaderStage::Fragment => {
                    let offset = fragment;
                    fragment += pc.size;
                    offset
                }
            })
            .collect()
    }

    fn push_constant_sizes(&self) -> (u32, u32) {
        self.push_constants
            .iter()
            .fold((0, 0), |(vertex, fragment), pc| match pc.stage {
                ShaderStage::Vertex => (vertex + pc.size, fragment),
                ShaderStage::Fragment => (vertex, fragment + pc.size),
            })
    }

    /// Render pass with a single subpass over every attachment.
    ///
    /// Color formats become color references, everything else the depth
    /// reference. The subpass references each attachment in its initial
    /// layout, or in the attachment-optimal layout when that is undefined.
    pub fn render_pass_descriptor(&self) -> RenderPassDescriptor {
        let mut attachments = Vec::with_capacity(self.attachments.len());
        let mut color_references = Vec::new();
        let mut depth_reference = None;

        for (index, attachment) in self.attachments.iter().enumerate() {
            attachments.push(AttachmentDescription {
                format: attachment.format,
                load_op: attachment.load_op,
                store_op: attachment.store_op,
                stencil_load_op: attachment.stencil_load_op,
                stencil_store_op: attachment.stencil_store_op,
                initial_layout: attachment.initial_layout,
                final_layout: attachment.final_layout,
            });

            if attachment.is_color() {
                color_references.push(AttachmentReference {
                    attachment: index as u32,
                    layout: reference_layout(
                        attachment.initial_layout,
                        ImageLayout::ColorAttachment,
                    ),
                });
            } else {
                depth_reference = Some(AttachmentReference {
                    attachment: index as u32,
                    layout: reference_layout(
                        attachment.initial_layout,
                        ImageLayout::DepthStencilAttachment,
                    ),
                });
            }
        }

        let mut dependency = SubpassDependency {
            src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            dst_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            src_access: AccessFlags::COLOR_ATTACHMENT_READ,
            dst_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
        };
        if depth_reference.is_some() {
            dependency.src_stages |= PipelineStages::EARLY_FRAGMENT_TESTS;
            dependency.dst_stages |= PipelineStages::EARLY_FRAGMENT_TESTS;
            dependency.dst_access |= AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        RenderPassDescriptor {
            attachments,
            color_references,
            depth_reference,
            dependency,
        }
    }

    /// Look up the render target behind every attachment.
    pub fn resolve_attachments<'g>(
        &self,
        graph: &'g RenderGraph,
    ) -> Result<Vec<&'g RenderTarget>, GraphicsError> {
        self.attachments
            .iter()
            .map(|attachment| {
                graph
                    .cached_render_target(&attachment.render_target)
                    .ok_or_else(|| {
                        GraphicsError::InvalidHandle(format!(
                            "pass '{}': render target '{}' is not registered",
                            self.name, attachment.render_target
                        ))
                    })
            })
            .collect()
    }

    /// Shared extent of the attachments. Mismatched sizes are rejected.
    pub fn attachment_extent(&self, graph: &RenderGraph) -> Result<Extent2d, GraphicsError> {
        let targets = self.resolve_attachments(graph)?;
        common_extent(targets.iter().copied())?.ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("pass '{}' has no attachments", self.name))
        })
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Return the PSO for `image_index`, creating and caching it on a miss.
    pub fn generate(
        &self,
        ctx: &RenderContext,
        graph: &mut RenderGraph,
        image_index: u32,
    ) -> Result<PsoHandle, GraphicsError> {
        profile_scope!("RenderPassGenerator::generate");

        let key = self.key(image_index);
        if let Some(handle) = graph.cached_pso(&key) {
            return Ok(handle);
        }

        log::debug!(
            "Generating PSO for pass '{}' (image {})",
            self.name,
            image_index
        );
        let pso = self.create_pso(ctx)?;
        Ok(graph.register_pso(ctx.backend(), key, pso))
    }

    fn create_pso(&self, ctx: &RenderContext) -> Result<PipelineStateObject, GraphicsError> {
        let mut pso = PipelineStateObject::default();
        match self.build_pso(ctx, &mut pso) {
            Ok(()) => Ok(pso),
            Err(e) => {
                log::warn!("Failed to generate pass '{}': {}", self.name, e);
                pso.destroy(ctx.backend());
                Err(e)
            }
        }
    }

    fn build_pso(
        &self,
        ctx: &RenderContext,
        pso: &mut PipelineStateObject,
    ) -> Result<(), GraphicsError> {
        let backend = ctx.backend();

        if !self.samplers.is_empty() {
            self.build_descriptor_set(ctx, pso)?;
        }

        pso.pipeline_layout = backend.create_pipeline_layout(&PipelineLayoutDescriptor {
            set_layouts: pso.descriptor_set_layout.into_iter().collect(),
            push_constant_ranges: self.push_constant_ranges(),
        })?;

        pso.render_pass = backend.create_render_pass(&self.render_pass_descriptor())?;

        let modules = self.create_shader_modules(ctx)?;
        let result = backend.create_graphics_pipeline(&self.pipeline_descriptor(pso, &modules));
        for (_, module) in modules {
            backend.destroy_shader_module(module);
        }
        pso.pipeline = result?;
        Ok(())
    }

    fn build_descriptor_set(
        &self,
        ctx: &RenderContext,
        pso: &mut PipelineStateObject,
    ) -> Result<(), GraphicsError> {
        let backend = ctx.backend();

        let bindings: Vec<DescriptorSetLayoutBinding> = self
            .samplers
            .iter()
            .map(|sampler| DescriptorSetLayoutBinding {
                binding: sampler.binding,
                stages: sampler.stages,
            })
            .collect();
        let layout = backend.create_descriptor_set_layout(&bindings)?;
        pso.descriptor_set_layout = Some(layout);

        let pool = backend.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets: 1,
            combined_image_samplers: self.samplers.len() as u32,
        })?;
        pso.descriptor_pool = Some(pool);

        let set = backend.allocate_descriptor_set(pool, layout)?;
        pso.descriptor_set = Some(set);

        let mut writes = Vec::with_capacity(self.samplers.len());
        for binding in &self.samplers {
            let sampler = backend.create_sampler(&binding.sampler)?;
            pso.samplers.push(sampler);
            writes.push(DescriptorImageWrite {
                binding: binding.binding,
                texture: binding.texture,
                sampler,
                layout: ImageLayout::ShaderReadOnly,
            });
        }
        backend.write_descriptor_set(set, &writes)
    }

    fn create_shader_modules(
        &self,
        ctx: &RenderContext,
    ) -> Result<Vec<(usize, ShaderModuleHandle)>, GraphicsError> {
        if self.shaders.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "pass '{}' has no shaders",
                self.name
            )));
        }

        let mut modules = Vec::with_capacity(self.shaders.len());
        for (index, shader) in self.shaders.iter().enumerate() {
            match ctx.create_shader(&shader.path, shader.stage, &shader.entry_point) {
                Ok(module) => modules.push((index, module)),
                Err(e) => {
                    for (_, module) in modules {
                        ctx.backend().destroy_shader_module(module);
                    }
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }

    fn pipeline_descriptor(
        &self,
        pso: &PipelineStateObject,
        modules: &[(usize, ShaderModuleHandle)],
    ) -> GraphicsPipelineDescriptor {
        let stages = modules
            .iter()
            .map(|(index, module)| {
                let shader = &self.shaders[*index];
                PipelineShaderStage {
                    stage: shader.stage,
                    module: *module,
                    entry_point: shader.entry_point.clone(),
                }
            })
            .collect();

        let vertex_bindings = self
            .vertex_groups
            .iter()
            .map(|group| VertexBindingDescription {
                binding: group.binding,
                stride: group.stride,
                input_rate: VertexInputRate::Vertex,
            })
            .collect();

        let vertex_attributes = self
            .vertex_groups
            .iter()
            .flat_map(|group| {
                group
                    .attributes
                    .iter()
                    .map(move |attribute| VertexAttributeDescription {
                        location: attribute.location,
                        binding: group.binding,
                        format: attribute.format,
                        offset: attribute.offset,
                    })
            })
            .collect();

        let color_blend = self
            .attachments
            .iter()
            .filter(|attachment| attachment.is_color())
            .map(|attachment| ColorBlendAttachment {
                blend_enable: attachment.blend.enable,
                src_color_factor: attachment.blend.src_color,
                dst_color_factor: attachment.blend.dst_color,
                color_op: attachment.blend.color_op,
                src_alpha_factor: attachment.blend.src_alpha,
                dst_alpha_factor: attachment.blend.dst_alpha,
                alpha_op: attachment.blend.alpha_op,
                write_mask: ColorWriteMask::RGBA,
            })
            .collect();

        GraphicsPipelineDescriptor {
            layout: pso.pipeline_layout,
            render_pass: pso.render_pass,
            subpass: 0,
            stages,
            vertex_bindings,
            vertex_attributes,
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: self.rasterization.cull_mode,
            front_face: self.rasterization.winding_order,
            line_width_bits: 1.0f32.to_bits(),
            depth_bias: self.rasterization.depth_bias,
            depth_test: true,
            depth_write: true,
            depth_compare: self.rasterization.depth_compare,
            color_blend,
            dynamic_states: vec![DynamicState::Viewport, DynamicState::Scissor],
        }
    }
}

fn reference_layout(initial: ImageLayout, optimal: ImageLayout) -> ImageLayout {
    match initial {
        ImageLayout::Undefined => optimal,
        layout => layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Format, LoadOp, StoreOp};

    fn color() -> AttachmentConfig {
        AttachmentConfig::new(Format::Bgra8Unorm, "$.scene_color_0")
            .with_ops(LoadOp::Clear, StoreOp::Store)
            .with_layouts(ImageLayout::Undefined, ImageLayout::ColorAttachment)
    }

    fn depth() -> AttachmentConfig {
        AttachmentConfig::new(Format::D32Sfloat, "$.scene_depth_0")
            .with_ops(LoadOp::Clear, StoreOp::Store)
            .with_layouts(
                ImageLayout::DepthStencilAttachment,
                ImageLayout::DepthStencilAttachment,
            )
    }

    #[test]
    fn test_key_ignores_primitives_and_push_data() {
        let base = RenderPassGenerator::new("opaque").with_shader_path("opaque.wgsl");
        let with_data = base
            .clone()
            .add_push_constant(ShaderStage::Vertex, 4, vec![vec![1, 2, 3, 4]]);
        let other_data = base
            .clone()
            .add_push_constant(ShaderStage::Vertex, 4, vec![vec![9, 9, 9, 9]]);
        assert_eq!(with_data.key(0), other_data.key(0));
        assert_ne!(with_data.key(0), with_data.key(1));
        assert_ne!(base.key(0), with_data.key(0));
        assert_ne!(
            base.key(0),
            base.clone().with_cull_mode(CullMode::Front).key(0)
        );
    }

    #[test]
    fn test_push_constant_ranges() {
        let generator = RenderPassGenerator::new("p")
            .add_push_constant(ShaderStage::Vertex, 64, Vec::new())
            .add_push_constant(ShaderStage::Fragment, 16, Vec::new())
            .add_push_constant(ShaderStage::Vertex, 16, Vec::new());

        assert_eq!(
            generator.push_constant_ranges(),
            vec![
                PushConstantRange {
                    stages: ShaderStages::VERTEX,
                    offset: 0,
                    size: 80,
                },
                PushConstantRange {
                    stages: ShaderStages::FRAGMENT,
                    offset: 80,
                    size: 16,
                },
            ]
        );
        assert_eq!(generator.push_constant_offsets(), vec![0, 80, 64]);
        assert!(RenderPassGenerator::new("empty").push_constant_ranges().is_empty());
    }

    #[test]
    fn test_render_pass_descriptor_splits_attachments() {
        let desc = RenderPassGenerator::new("p")
            .add_attachment(color())
            .add_attachment(depth())
            .render_pass_descriptor();

        assert_eq!(desc.attachments.len(), 2);
        assert_eq!(
            desc.color_references,
            vec![AttachmentReference {
                attachment: 0,
                layout: ImageLayout::ColorAttachment,
            }]
        );
        assert_eq!(
            desc.depth_reference,
            Some(AttachmentReference {
                attachment: 1,
                layout: ImageLayout::DepthStencilAttachment,
            })
        );
        assert!(
            desc.dependency
                .dst_stages
                .contains(PipelineStages::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            desc.dependency
                .dst_access
                .contains(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_color_only_dependency() {
        let desc = RenderPassGenerator::new("p")
            .add_attachment(color())
            .render_pass_descriptor();
        assert_eq!(desc.depth_reference, None);
        assert_eq!(
            desc.dependency.dst_stages,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(desc.dependency.dst_access, AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_with_shader_replaces_stage() {
        let generator = RenderPassGenerator::new("p")
            .with_shader_path("a.wgsl")
            .with_shader(ShaderStage::Fragment, "b.wgsl", "main");
        assert_eq!(generator.shaders().len(), 2);
        assert_eq!(generator.shaders()[0].stage, ShaderStage::Vertex);
        assert_eq!(generator.shaders()[1].path, PathBuf::from("b.wgsl"));
        assert_eq!(generator.shaders()[1].entry_point, "main");
    }
}
