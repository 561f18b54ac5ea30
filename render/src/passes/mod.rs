//! Built-in render passes.
//!
//! A [`PassDescription`] turns the frame's [`SceneView`] into a
//! [`RenderPassGenerator`]. The render system queues the built-in passes
//! through [`GraphBuilder::make_pass`](crate::graph_builder::GraphBuilder::make_pass):
//!
//! - [`OpaquePassDesc`]: lit geometry, clears color and depth
//! - [`FloorGridPassDesc`]: alpha-blended grid drawn over the opaque result,
//!   leaves the color target ready for presentation

mod floor_grid;
mod opaque;

pub use floor_grid::FloorGridPassDesc;
pub use opaque::OpaquePassDesc;

use crate::error::GraphicsError;
use crate::pass::{PrimitiveDraw, RenderPassGenerator};
use crate::scene::{MeshNode, SceneView};
use crate::swapchain::{color_target_name, depth_target_name};
use crate::types::{Extent2d, Format};

/// Frame state a pass description builds against.
#[derive(Debug, Clone, Copy)]
pub struct PassBuildContext<'a> {
    pub scene: &'a SceneView,
    /// Swapchain image the pass renders into.
    pub image_index: u32,
    pub color_format: Format,
    pub depth_format: Format,
    pub extent: Extent2d,
}

impl PassBuildContext<'_> {
    /// Name of the color render target of this image.
    pub fn color_target(&self) -> String {
        color_target_name(self.image_index)
    }

    /// Name of the depth render target of this image.
    pub fn depth_target(&self) -> String {
        depth_target_name(self.image_index)
    }
}

/// Something that can configure a render pass for one frame.
pub trait PassDescription {
    /// Pass name, also the name of its cached pipeline.
    fn name(&self) -> &str;

    fn build(&self, ctx: &PassBuildContext<'_>) -> Result<RenderPassGenerator, GraphicsError>;
}

/// One draw per primitive of `mesh`.
fn mesh_draws(mesh: &MeshNode) -> impl Iterator<Item = PrimitiveDraw> + '_ {
    mesh.primitives.iter().map(|range| PrimitiveDraw {
        geometry: mesh.geometry,
        vertex_offsets: vec![range.vertex_offset],
        index_offset: range.index_offset,
        index_count: range.index_count,
    })
}
