//! State a graph builder's actions operate on.

use crate::command::CommandPool;
use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::frame::FrameResources;
use crate::geometry::GeometryStore;
use crate::graph::{CommandPoolKey, RenderGraph};
use crate::swapchain::{Swapchain, SurfaceEventPump};

/// Command pool an action addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandPoolTarget {
    /// The pool of frame slot `n`.
    Frame(usize),
    /// A named pool cached in the render graph.
    Cached(CommandPoolKey),
}

impl std::fmt::Display for CommandPoolTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(slot) => write!(f, "frame {slot}"),
            Self::Cached(key) => write!(f, "'{}'", key.0),
        }
    }
}

/// Borrowed render system state for one `GraphBuilder::execute`.
pub struct ExecutionContext<'a> {
    pub ctx: &'a RenderContext,
    pub graph: &'a mut RenderGraph,
    pub swapchain: &'a mut Swapchain,
    pub frames: &'a mut [FrameResources],
    pub geometry: &'a mut GeometryStore,
    pub pump: &'a mut dyn SurfaceEventPump,
    /// Swapchain image passes render into. Set by the caller, or by an
    /// acquire action.
    pub image_index: Option<u32>,
}

impl ExecutionContext<'_> {
    /// Resources of frame slot `slot`.
    pub fn frame(&mut self, slot: usize) -> Result<&mut FrameResources, GraphicsError> {
        let count = self.frames.len();
        self.frames.get_mut(slot).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("frame slot {slot} out of range ({count})"))
        })
    }

    /// The command pool addressed by `target`.
    pub fn command_pool(
        &mut self,
        target: &CommandPoolTarget,
    ) -> Result<&mut CommandPool, GraphicsError> {
        match target {
            CommandPoolTarget::Frame(slot) => Ok(&mut self.frame(*slot)?.command_pool),
            CommandPoolTarget::Cached(key) => {
                self.graph.cached_command_pool_mut(key).ok_or_else(|| {
                    GraphicsError::InvalidHandle(format!("command pool '{}' is not cached", key.0))
                })
            }
        }
    }

    /// Image index passes render into.
    pub fn require_image_index(&self) -> Result<u32, GraphicsError> {
        self.image_index.ok_or_else(|| {
            GraphicsError::InvalidParameter("no presentable image acquired".to_string())
        })
    }
}
