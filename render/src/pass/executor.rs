//! Recording of a generated render pass into a command buffer.

use crate::backend::{
    BufferHandle, CommandBufferHandle, FramebufferDescriptor, FramebufferHandle, RenderPassBeginInfo,
};
use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::geometry::GeometryStore;
use crate::graph::{PassResource, PassResourceKey, PsoHandle, RenderGraph};
use crate::profiling::profile_scope;
use crate::types::{ClearValue, Extent2d, ScissorRect, Viewport};

use super::generator::RenderPassGenerator;

/// Where a pass records to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassTarget {
    /// Command buffer in the recording state.
    pub command_buffer: CommandBufferHandle,
    /// Swapchain image the pass renders into.
    pub image_index: u32,
    /// Swapchain extent, used for the viewport and scissor.
    pub extent: Extent2d,
}

/// Draw statistics of one executed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Indexed draws recorded.
    pub draws: u32,
    /// Primitives skipped because their geometry was not uploaded.
    pub skipped: u32,
}

/// Records render passes using the PSOs and framebuffers cached in a
/// [`RenderGraph`].
///
/// Beginning and ending the command buffer is left to the caller.
pub struct RenderPassExecutor<'a> {
    ctx: &'a RenderContext,
    graph: &'a mut RenderGraph,
    geometry: &'a GeometryStore,
}

impl<'a> RenderPassExecutor<'a> {
    pub fn new(
        ctx: &'a RenderContext,
        graph: &'a mut RenderGraph,
        geometry: &'a GeometryStore,
    ) -> Self {
        Self {
            ctx,
            graph,
            geometry,
        }
    }

    /// Generate the pass and record its draws.
    pub fn execute(
        &mut self,
        generator: &RenderPassGenerator,
        target: PassTarget,
    ) -> Result<PassStats, GraphicsError> {
        profile_scope!("RenderPassExecutor::execute");

        validate_push_constants(generator)?;

        let handle = generator.generate(self.ctx, self.graph, target.image_index)?;
        let framebuffer = self.framebuffer(generator, handle, target)?;
        let pso = self.graph.pso(handle).ok_or_else(|| {
            GraphicsError::InvalidHandle(format!("PSO of pass '{}'", generator.name()))
        })?;

        let backend = self.ctx.backend();
        let config = self.ctx.config();
        let cb = target.command_buffer;

        let clear_values: Vec<ClearValue> = generator
            .attachments()
            .iter()
            .map(|attachment| {
                if attachment.is_color() {
                    config.color_clear_value()
                } else {
                    config.depth_clear_value()
                }
            })
            .collect();

        backend.cmd_begin_render_pass(
            cb,
            &RenderPassBeginInfo {
                render_pass: pso.render_pass,
                framebuffer,
                extent: target.extent,
                clear_values,
            },
        );
        backend.cmd_bind_pipeline(cb, pso.pipeline);
        backend.cmd_set_viewport(cb, &Viewport::from_extent(target.extent));
        backend.cmd_set_scissor(cb, &ScissorRect::from_extent(target.extent));

        let offsets = generator.push_constant_offsets();
        let mut stats = PassStats::default();

        for (index, primitive) in generator.primitives().iter().enumerate() {
            let Some(buffer) = self.geometry.resolve(primitive.geometry) else {
                log::warn!(
                    "Pass '{}': skipping primitive {} with unresolved geometry {:?}",
                    generator.name(),
                    index,
                    primitive.geometry
                );
                stats.skipped += 1;
                continue;
            };

            for (push_constant, offset) in generator.push_constants().iter().zip(&offsets) {
                if let Some(data) = push_constant.data_for(index) {
                    backend.cmd_push_constants(
                        cb,
                        pso.pipeline_layout,
                        push_constant.stage.flags(),
                        *offset,
                        data,
                    );
                }
            }

            let vertex_buffers: Vec<(BufferHandle, u64)> = primitive
                .vertex_offsets
                .iter()
                .map(|offset| (buffer, *offset))
                .collect();
            backend.cmd_bind_vertex_buffers(cb, 0, &vertex_buffers);
            backend.cmd_bind_index_buffer(cb, buffer, primitive.index_offset);

            if let Some(set) = pso.descriptor_set {
                backend.cmd_bind_descriptor_set(cb, pso.pipeline_layout, set);
            }

            backend.cmd_draw_indexed(cb, primitive.index_count, 1, 0, 0, 0);
            stats.draws += 1;
        }

        backend.cmd_end_render_pass(cb);

        log::trace!(
            "Pass '{}' recorded {} draws ({} skipped)",
            generator.name(),
            stats.draws,
            stats.skipped
        );
        Ok(stats)
    }

    /// The PSO's framebuffer, created and registered as a pass resource on
    /// first use.
    fn framebuffer(
        &mut self,
        generator: &RenderPassGenerator,
        handle: PsoHandle,
        target: PassTarget,
    ) -> Result<FramebufferHandle, GraphicsError> {
        let render_pass = match self.graph.pso(handle) {
            Some(pso) => {
                if let Some(framebuffer) = pso.framebuffer {
                    return Ok(framebuffer);
                }
                pso.render_pass
            }
            None => {
                return Err(GraphicsError::InvalidHandle(format!(
                    "PSO of pass '{}'",
                    generator.name()
                )));
            }
        };

        let extent = generator.attachment_extent(self.graph)?;
        let attachments = generator
            .resolve_attachments(self.graph)?
            .iter()
            .map(|target| target.view())
            .collect();

        let backend = self.ctx.backend();
        let framebuffer = backend.create_framebuffer(&FramebufferDescriptor {
            render_pass,
            attachments,
            extent,
        })?;
        log::debug!(
            "Created framebuffer for pass '{}' (image {}, {}x{})",
            generator.name(),
            target.image_index,
            extent.width,
            extent.height
        );

        self.graph.register_pass_resource(
            backend,
            PassResourceKey::new(generator.name(), target.image_index),
            PassResource {
                framebuffer,
                command_buffer: target.command_buffer,
            },
        );
        if let Some(pso) = self.graph.pso_mut(handle) {
            pso.framebuffer = Some(framebuffer);
        }
        Ok(framebuffer)
    }
}

fn validate_push_constants(generator: &RenderPassGenerator) -> Result<(), GraphicsError> {
    if generator.primitives().is_empty() {
        return Ok(());
    }
    for push_constant in generator.push_constants() {
        if push_constant.data.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "pass '{}': {:?} push constant has no data",
                generator.name(),
                push_constant.stage
            )));
        }
        if let Some(blob) = push_constant
            .data
            .iter()
            .find(|blob| blob.len() > push_constant.size as usize)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "pass '{}': push constant data of {} bytes exceeds declared size {}",
                generator.name(),
                blob.len(),
                push_constant.size
            )));
        }
    }
    Ok(())
}
