use crate::error::GraphicsError;
use crate::pass::{AttachmentConfig, GpuStructWriter, RenderPassGenerator, VertexGroupConfig};
use crate::scene::MeshPasses;
use crate::types::{CompareOp, CullMode, ImageLayout, LoadOp, ShaderStage, StoreOp, WindingOrder};

use super::{PassBuildContext, PassDescription, mesh_draws};

/// Lit opaque geometry.
///
/// Clears the color and depth targets of the image, then draws every mesh
/// flagged [`MeshPasses::OPAQUE`]. Vertex push constants: the primitive's
/// MVP matrix, the directional light and the camera position.
#[derive(Debug, Clone)]
pub struct OpaquePassDesc {
    pub shader: String,
    /// Layout the color target is left in.
    pub color_final_layout: ImageLayout,
}

impl OpaquePassDesc {
    pub const NAME: &'static str = "opaque";

    /// Size of the per-primitive MVP block.
    pub const MVP_SIZE: u32 = 64;
    /// Direction, color and intensity, each in a 16-byte slot.
    pub const LIGHT_SIZE: u32 = 48;
    pub const CAMERA_SIZE: u32 = 16;

    /// Leave the color target ready for presentation, for frames without a
    /// later pass.
    pub fn presenting() -> Self {
        Self {
            color_final_layout: ImageLayout::PresentSrc,
            ..Self::default()
        }
    }
}

impl Default for OpaquePassDesc {
    fn default() -> Self {
        Self {
            shader: "opaque.wgsl".to_string(),
            color_final_layout: ImageLayout::ColorAttachment,
        }
    }
}

impl PassDescription for OpaquePassDesc {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build(&self, ctx: &PassBuildContext<'_>) -> Result<RenderPassGenerator, GraphicsError> {
        let scene = ctx.scene;
        let view_projection = scene.camera.view_projection();

        let mut writer = GpuStructWriter::new();
        let mut mvps = Vec::new();
        let mut generator = RenderPassGenerator::new(Self::NAME)
            .with_shader_path(&self.shader)
            .with_cull_mode(CullMode::Back)
            .with_winding_order(WindingOrder::Clockwise)
            .with_depth_compare(CompareOp::LessOrEqual)
            .add_attachment(
                AttachmentConfig::new(ctx.color_format, ctx.color_target())
                    .with_ops(LoadOp::Clear, StoreOp::Store)
                    .with_layouts(ImageLayout::Undefined, self.color_final_layout),
            )
            .add_attachment(
                AttachmentConfig::new(ctx.depth_format, ctx.depth_target())
                    .with_ops(LoadOp::Clear, StoreOp::Store)
                    .with_layouts(
                        ImageLayout::DepthStencilAttachment,
                        ImageLayout::DepthStencilAttachment,
                    ),
            )
            .add_vertex_group(VertexGroupConfig::position_normal(0));

        for mesh in scene.meshes_in(MeshPasses::OPAQUE) {
            let mvp = view_projection * mesh.transform;
            for draw in mesh_draws(mesh) {
                mvps.push(writer.mat4(&mvp).finish());
                generator = generator.add_primitive(draw);
            }
        }

        let light = writer
            .vec3(&scene.light.direction)
            .vec3(&scene.light.color)
            .f32(scene.light.intensity)
            .finish();
        let camera = writer.vec3(&scene.camera.position).finish();

        Ok(generator
            .add_push_constant(ShaderStage::Vertex, Self::MVP_SIZE, mvps)
            .add_push_constant(ShaderStage::Vertex, Self::LIGHT_SIZE, vec![light])
            .add_push_constant(ShaderStage::Vertex, Self::CAMERA_SIZE, vec![camera]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometryHandle, PrimitiveRange};
    use crate::scene::{MeshNode, SceneView};
    use crate::types::{Extent2d, Format};

    fn build(scene: &SceneView) -> RenderPassGenerator {
        let ctx = PassBuildContext {
            scene,
            image_index: 1,
            color_format: Format::Bgra8Unorm,
            depth_format: Format::D32Sfloat,
            extent: Extent2d::new(64, 64),
        };
        OpaquePassDesc::default().build(&ctx).unwrap()
    }

    #[test]
    fn test_one_mvp_per_primitive() {
        let range = PrimitiveRange {
            index_offset: 0,
            vertex_offset: 24,
            index_count: 6,
        };
        let mut scene = SceneView::default();
        scene
            .meshes
            .push(MeshNode::new(GeometryHandle::new(0), vec![range, range]));
        scene.meshes.push(
            MeshNode::new(GeometryHandle::new(1), vec![range]).with_passes(MeshPasses::FLOOR_GRID),
        );

        let generator = build(&scene);
        assert_eq!(generator.primitives().len(), 2);
        assert_eq!(generator.primitives()[0].vertex_offsets, vec![24]);

        let blocks = generator.push_constants();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].data.len(), 2);
        assert!(blocks[0].data.iter().all(|d| d.len() == 64));
        assert_eq!(blocks[1].data[0].len(), 48);
        assert_eq!(blocks[2].data[0].len(), 16);
    }

    #[test]
    fn test_targets_follow_image_index() {
        let generator = build(&SceneView::default());
        let attachments = generator.attachments();
        assert_eq!(attachments[0].render_target, "$.scene_color_1");
        assert_eq!(attachments[1].render_target, "$.scene_depth_1");
        assert_eq!(
            generator.rasterization().depth_compare,
            CompareOp::LessOrEqual
        );
    }

    #[test]
    fn test_presenting_variant() {
        let scene = SceneView::default();
        let ctx = PassBuildContext {
            scene: &scene,
            image_index: 0,
            color_format: Format::Bgra8Unorm,
            depth_format: Format::D32Sfloat,
            extent: Extent2d::new(64, 64),
        };
        let generator = OpaquePassDesc::presenting().build(&ctx).unwrap();
        assert_eq!(
            generator.attachments()[0].final_layout,
            ImageLayout::PresentSrc
        );
    }
}
