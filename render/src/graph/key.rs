//! Typed cache keys and handles of the render graph.

use crate::pass::PassSignature;

/// Key of a cached pipeline state object.
///
/// Structural over the complete pass configuration plus the swapchain image
/// the pass renders into, so two generators configured identically for the
/// same image share one PSO.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub signature: PassSignature,
    pub image_index: u32,
}

impl PipelineKey {
    pub fn new(signature: PassSignature, image_index: u32) -> Self {
        Self {
            signature,
            image_index,
        }
    }
}

/// Key of a cached pass resource: a pass identifier and the image it targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PassResourceKey {
    pub pass: String,
    pub image_index: u32,
}

impl PassResourceKey {
    pub fn new(pass: impl Into<String>, image_index: u32) -> Self {
        Self {
            pass: pass.into(),
            image_index,
        }
    }
}

/// Key of a command pool cached in the render graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandPoolKey(pub String);

impl From<&str> for CommandPoolKey {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Handle of a pipeline state object in the graph's arena.
///
/// Carries the generation it was registered in; a handle from an earlier
/// generation no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsoHandle {
    pub(super) index: u32,
    pub(super) generation: u64,
}

impl PsoHandle {
    /// Arena slot.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation the PSO was created in.
    pub fn generation(self) -> u64 {
        self.generation
    }
}
