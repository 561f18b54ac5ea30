use crate::error::GraphicsError;
use crate::pass::{
    AttachmentConfig, BlendConfig, GpuStructWriter, RenderPassGenerator, VertexGroupConfig,
};
use crate::scene::MeshPasses;
use crate::types::{CompareOp, CullMode, ImageLayout, LoadOp, ShaderStage, StoreOp};

use super::{PassBuildContext, PassDescription, mesh_draws};

/// Floor grid blended over the opaque pass.
///
/// Loads the color and depth targets written by the opaque pass and leaves
/// the color target in the present layout. Draws meshes flagged
/// [`MeshPasses::FLOOR_GRID`] in world space.
#[derive(Debug, Clone)]
pub struct FloorGridPassDesc {
    pub shader: String,
}

impl FloorGridPassDesc {
    pub const NAME: &'static str = "floor_grid";
    pub const MATRIX_SIZE: u32 = 64;
}

impl Default for FloorGridPassDesc {
    fn default() -> Self {
        Self {
            shader: "floor_grid.wgsl".to_string(),
        }
    }
}

impl PassDescription for FloorGridPassDesc {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build(&self, ctx: &PassBuildContext<'_>) -> Result<RenderPassGenerator, GraphicsError> {
        let camera = &ctx.scene.camera;
        let mut writer = GpuStructWriter::new();
        let view = writer.mat4(&camera.view).finish();
        let projection = writer.mat4(&camera.projection).finish();

        let generator = RenderPassGenerator::new(Self::NAME)
            .with_shader_path(&self.shader)
            .with_cull_mode(CullMode::None)
            .with_depth_compare(CompareOp::Less)
            .add_attachment(
                AttachmentConfig::new(ctx.color_format, ctx.color_target())
                    .with_ops(LoadOp::Load, StoreOp::Store)
                    .with_layouts(ImageLayout::ColorAttachment, ImageLayout::PresentSrc)
                    .with_blend(BlendConfig::alpha_blending()),
            )
            .add_attachment(
                AttachmentConfig::new(ctx.depth_format, ctx.depth_target())
                    .with_ops(LoadOp::Load, StoreOp::Store)
                    .with_layouts(
                        ImageLayout::DepthStencilAttachment,
                        ImageLayout::DepthStencilAttachment,
                    ),
            )
            .add_vertex_group(VertexGroupConfig::position_normal(0))
            .add_push_constant(ShaderStage::Vertex, Self::MATRIX_SIZE, vec![view])
            .add_push_constant(ShaderStage::Vertex, Self::MATRIX_SIZE, vec![projection]);

        Ok(ctx
            .scene
            .meshes_in(MeshPasses::FLOOR_GRID)
            .flat_map(mesh_draws)
            .fold(generator, RenderPassGenerator::add_primitive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometryHandle, PrimitiveRange};
    use crate::scene::{MeshNode, SceneView};
    use crate::types::{Extent2d, Format};

    #[test]
    fn test_only_grid_meshes_are_drawn() {
        let range = PrimitiveRange {
            index_offset: 0,
            vertex_offset: 24,
            index_count: 6,
        };
        let mut scene = SceneView::default();
        scene
            .meshes
            .push(MeshNode::new(GeometryHandle::new(0), vec![range]));
        scene.meshes.push(
            MeshNode::new(GeometryHandle::new(1), vec![range]).with_passes(MeshPasses::FLOOR_GRID),
        );

        let ctx = PassBuildContext {
            scene: &scene,
            image_index: 0,
            color_format: Format::Bgra8Unorm,
            depth_format: Format::D32Sfloat,
            extent: Extent2d::new(64, 64),
        };
        let generator = FloorGridPassDesc::default().build(&ctx).unwrap();

        assert_eq!(generator.primitives().len(), 1);
        assert_eq!(generator.primitives()[0].geometry, GeometryHandle::new(1));
        assert_eq!(generator.push_constants().len(), 2);
        assert!(generator.attachments()[0].blend.enable);
        assert_eq!(
            generator.attachments()[0].final_layout,
            ImageLayout::PresentSrc
        );
    }
}
