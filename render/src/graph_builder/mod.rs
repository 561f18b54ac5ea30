//! One-shot, ordered lists of GPU work.
//!
//! A [`GraphBuilder`] collects [`GraphAction`]s: command pool and command
//! buffer lifecycle, fence and surface operations, swapchain acquisition,
//! geometry staging and render passes. Builder methods only append; nothing
//! touches the GPU until [`GraphBuilder::execute`], which runs the actions in
//! insertion order against an [`ExecutionContext`].
//!
//! # Failure policy
//!
//! Under [`FailurePolicy::ContinueOnFailure`] (the default) a failed action
//! is logged and the remaining actions still run. Under
//! [`FailurePolicy::AbortOnFailure`] execution stops at the first failure.
//! Either way every attempted action is listed in the returned
//! [`ExecutionReport`].
//!
//! # Example
//!
//! ```ignore
//! let mut builder = GraphBuilder::new(FailurePolicy::ContinueOnFailure);
//! builder
//!     .reset_fence(frame)
//!     .reset_command_pool(CommandPoolTarget::Frame(frame))
//!     .allocate_command_buffer(CommandPoolTarget::Frame(frame))
//!     .enable_command_buffer_recording(CommandPoolTarget::Frame(frame));
//! builder.make_pass(&OpaquePassDesc, &pass_ctx, CommandPoolTarget::Frame(frame))?;
//! builder.disable_command_buffer_recording(CommandPoolTarget::Frame(frame));
//! let report = builder.execute(&mut cx);
//! ```

mod action;
mod context;

use serde::{Deserialize, Serialize};

use crate::backend::FenceHandle;
use crate::command::SubmitCommandParams;
use crate::error::GraphicsError;
use crate::geometry::{GeometryHandle, StagedGeometry};
use crate::pass::{PassStats, RenderPassGenerator};
use crate::passes::{PassBuildContext, PassDescription};
use crate::profiling::profile_scope;

use action::PendingUpload;

pub use action::{
    ActionOutput, BufferAction, CommandPoolAction, FenceAction, GraphAction, SurfaceAction,
    SwapchainAction, UploadSlot,
};
pub use context::{CommandPoolTarget, ExecutionContext};

/// What [`GraphBuilder::execute`] does after a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and run the remaining actions.
    #[default]
    ContinueOnFailure,
    /// Stop at the first failed action.
    AbortOnFailure,
}

/// Result of one executed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub label: String,
    pub result: Result<ActionOutput, GraphicsError>,
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of one [`GraphBuilder::execute`], in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub outcomes: Vec<ActionOutcome>,
    /// Actions were left unexecuted because of [`FailurePolicy::AbortOnFailure`].
    pub aborted: bool,
}

impl ExecutionReport {
    /// Returns true if every action ran and succeeded.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.outcomes.iter().all(ActionOutcome::is_ok)
    }

    /// Failed actions.
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_ok())
    }

    /// Returns true if an action whose label starts with `prefix` failed.
    pub fn failed(&self, prefix: &str) -> bool {
        self.failures().any(|outcome| outcome.label.starts_with(prefix))
    }

    /// Returns true if a successful submission will signal `fence`.
    pub fn signals_fence(&self, fence: FenceHandle) -> bool {
        !fence.is_null()
            && self.outcomes.iter().any(|outcome| match outcome.result {
                Ok(ActionOutput::Submitted { fence: Some(f) }) => f == fence,
                _ => false,
            })
    }

    /// Draw statistics of every successful render pass action.
    pub fn pass_stats(&self) -> impl Iterator<Item = PassStats> + '_ {
        self.outcomes.iter().filter_map(|outcome| match outcome.result {
            Ok(ActionOutput::Pass(stats)) => Some(stats),
            _ => None,
        })
    }

    /// Total draws recorded by all render pass actions.
    pub fn draw_count(&self) -> u32 {
        self.pass_stats().map(|stats| stats.draws).sum()
    }
}

/// Ordered list of graph actions, executed once.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    actions: Vec<GraphAction>,
    uploads: Vec<PendingUpload>,
    policy: FailurePolicy,
}

impl GraphBuilder {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            actions: Vec::new(),
            uploads: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Queued actions, in execution order.
    pub fn actions(&self) -> &[GraphAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Append a raw action.
    pub fn push(&mut self, action: GraphAction) -> &mut Self {
        self.actions.push(action);
        self
    }

    fn command_pool(&mut self, target: CommandPoolTarget, action: CommandPoolAction) -> &mut Self {
        self.push(GraphAction::CommandPool { target, action })
    }

    // ========================================================================
    // Command pools
    // ========================================================================

    /// Allocate a command pool. For a cached target the pool is created and
    /// registered in the render graph unless it already exists.
    pub fn allocate_command_pool(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::Allocate)
    }

    pub fn reset_command_pool(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::Reset)
    }

    pub fn allocate_command_buffer(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::AllocateCommandBuffer)
    }

    pub fn enable_command_buffer_recording(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::EnableRecording)
    }

    pub fn disable_command_buffer_recording(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::DisableRecording)
    }

    pub fn release_command_buffer(&mut self, target: CommandPoolTarget) -> &mut Self {
        self.command_pool(target, CommandPoolAction::ReleaseCommandBuffer)
    }

    /// Submit the pool's command buffer.
    pub fn submit_commands(
        &mut self,
        target: CommandPoolTarget,
        params: SubmitCommandParams,
    ) -> &mut Self {
        self.command_pool(target, CommandPoolAction::Submit(params))
    }

    // ========================================================================
    // Synchronization and presentation
    // ========================================================================

    pub fn allocate_fence(&mut self, frame: usize, signaled: bool) -> &mut Self {
        self.push(GraphAction::Fence {
            frame,
            action: FenceAction::Allocate { signaled },
        })
    }

    /// Wait for the frame's fence, then release its retired staging buffers.
    pub fn wait_fence(&mut self, frame: usize) -> &mut Self {
        self.push(GraphAction::Fence {
            frame,
            action: FenceAction::Wait,
        })
    }

    pub fn reset_fence(&mut self, frame: usize) -> &mut Self {
        self.push(GraphAction::Fence {
            frame,
            action: FenceAction::Reset,
        })
    }

    pub fn allocate_surface(&mut self, frame: usize) -> &mut Self {
        self.push(GraphAction::Surface {
            frame,
            action: SurfaceAction::Allocate,
        })
    }

    pub fn present(&mut self, frame: usize) -> &mut Self {
        self.push(GraphAction::Surface {
            frame,
            action: SurfaceAction::Present,
        })
    }

    pub fn acquire_presentable_surface(&mut self, frame: usize) -> &mut Self {
        self.push(GraphAction::Swapchain {
            frame,
            action: SwapchainAction::AcquirePresentableSurface,
        })
    }

    // ========================================================================
    // Geometry staging
    // ========================================================================

    /// Queue creation of a `size` byte staging buffer.
    pub fn allocate_cpu_buffer(&mut self, size: u64) -> UploadSlot {
        let upload = UploadSlot(self.uploads.len());
        self.uploads.push(PendingUpload {
            size,
            ..Default::default()
        });
        self.push(GraphAction::Buffer(BufferAction::AllocateCpu { upload }));
        upload
    }

    /// Queue writing `data` into the staging buffer of `upload`.
    pub fn copy_geometry_data(&mut self, upload: UploadSlot, data: StagedGeometry) -> &mut Self {
        self.push(GraphAction::Buffer(BufferAction::StageGeometryData {
            upload,
            data,
        }))
    }

    /// Queue creation of the device-local buffer backing `geometry`.
    pub fn allocate_gpu_buffer(&mut self, upload: UploadSlot, geometry: GeometryHandle) -> &mut Self {
        self.push(GraphAction::Buffer(BufferAction::AllocateGpu { upload, geometry }))
    }

    /// Queue the staging to device copy into the command buffer of `pool`.
    /// Frame slot `frame` keeps the staging buffer until its fence is waited.
    pub fn upload_buffer_data(
        &mut self,
        upload: UploadSlot,
        pool: CommandPoolTarget,
        frame: usize,
    ) -> &mut Self {
        self.push(GraphAction::Buffer(BufferAction::TransferToGpu {
            upload,
            pool,
            frame,
        }))
    }

    /// Queue the full staging sequence for `data` into `geometry`.
    pub fn upload_geometry(
        &mut self,
        data: StagedGeometry,
        geometry: GeometryHandle,
        pool: CommandPoolTarget,
        frame: usize,
    ) -> UploadSlot {
        let upload = self.allocate_cpu_buffer(data.size());
        self.copy_geometry_data(upload, data)
            .allocate_gpu_buffer(upload, geometry)
            .upload_buffer_data(upload, pool, frame);
        upload
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Queue recording of `generator` into the command buffer of `pool`.
    pub fn add_pass(&mut self, generator: RenderPassGenerator, pool: CommandPoolTarget) -> &mut Self {
        self.push(GraphAction::RenderPass {
            pool,
            generator: Box::new(generator),
        })
    }

    /// Build a pass from its description and queue it.
    pub fn make_pass<D: PassDescription>(
        &mut self,
        desc: &D,
        ctx: &PassBuildContext<'_>,
        pool: CommandPoolTarget,
    ) -> Result<&mut Self, GraphicsError> {
        let generator = desc.build(ctx)?;
        Ok(self.add_pass(generator, pool))
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run every queued action in order.
    pub fn execute(mut self, cx: &mut ExecutionContext<'_>) -> ExecutionReport {
        profile_scope!("graph_builder_execute");

        let mut report = ExecutionReport::default();
        let actions = std::mem::take(&mut self.actions);
        for action in &actions {
            let label = action.label();
            let result = action.execute(cx, &mut self.uploads);
            let failed = result.is_err();
            if let Err(e) = &result {
                log::warn!("Graph action {} failed: {}", label, e);
            } else {
                log::trace!("Graph action {} done", label);
            }
            report.outcomes.push(ActionOutcome { label, result });

            if failed && self.policy == FailurePolicy::AbortOnFailure {
                report.aborted = report.outcomes.len() < actions.len();
                break;
            }
        }

        self.release_unretired_staging(cx);
        report
    }

    fn release_unretired_staging(&mut self, cx: &ExecutionContext<'_>) {
        for upload in self.uploads.drain(..) {
            if !upload.retired && !upload.staging.is_null() {
                log::debug!("Destroying staging buffer of an unfinished upload");
                cx.ctx.backend().destroy_buffer(upload.staging);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_only_appends() {
        let mut builder = GraphBuilder::new(FailurePolicy::default());
        assert!(builder.is_empty());

        builder
            .allocate_fence(0, true)
            .reset_fence(0)
            .allocate_command_pool(CommandPoolTarget::Frame(0))
            .allocate_command_buffer(CommandPoolTarget::Frame(0));
        assert_eq!(builder.len(), 4);
        assert_eq!(builder.actions()[0].label(), "fence.allocate(frame 0)");
        assert_eq!(
            builder.actions()[3].label(),
            "command_pool.allocate_command_buffer(frame 0)"
        );
    }

    #[test]
    fn test_upload_geometry_queues_four_actions() {
        let mut builder = GraphBuilder::default();
        let data = StagedGeometry {
            bytes: vec![0; 32],
            ranges: Vec::new(),
        };
        let upload = builder.upload_geometry(
            data,
            GeometryHandle::new(0),
            CommandPoolTarget::Frame(1),
            1,
        );
        assert_eq!(upload, UploadSlot(0));
        assert_eq!(builder.len(), 4);
        assert_eq!(builder.uploads[0].size, 32);
        assert!(matches!(
            builder.actions()[3],
            GraphAction::Buffer(BufferAction::TransferToGpu { frame: 1, .. })
        ));
    }

    #[test]
    fn test_failure_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"abort_on_failure\"").unwrap();
        assert_eq!(parsed.policy, FailurePolicy::AbortOnFailure);
        assert_eq!(FailurePolicy::default(), FailurePolicy::ContinueOnFailure);
    }

    #[test]
    fn test_report_helpers() {
        let report = ExecutionReport {
            outcomes: vec![
                ActionOutcome {
                    label: "fence.wait(frame 0)".to_string(),
                    result: Err(GraphicsError::InvalidHandle("fence".to_string())),
                },
                ActionOutcome {
                    label: "render_pass('opaque')".to_string(),
                    result: Ok(ActionOutput::Pass(PassStats {
                        draws: 3,
                        skipped: 1,
                    })),
                },
            ],
            aborted: false,
        };
        assert!(!report.is_success());
        assert!(report.failed("fence.wait"));
        assert!(!report.failed("render_pass"));
        assert_eq!(report.draw_count(), 3);
    }

    #[test]
    fn test_signals_fence_matches_submission() {
        let frame_fence = FenceHandle(4);
        let other_fence = FenceHandle(9);
        let mut report = ExecutionReport {
            outcomes: vec![
                ActionOutcome {
                    label: "command_pool.submit(cached)".to_string(),
                    result: Ok(ActionOutput::Submitted {
                        fence: Some(other_fence),
                    }),
                },
                ActionOutcome {
                    label: "command_pool.submit(frame 0)".to_string(),
                    result: Err(GraphicsError::DeviceLost),
                },
            ],
            aborted: false,
        };
        assert!(!report.signals_fence(frame_fence));
        assert!(report.signals_fence(other_fence));
        assert!(!report.signals_fence(FenceHandle::NULL));

        report.outcomes[1].result = Ok(ActionOutput::Submitted {
            fence: Some(frame_fence),
        });
        assert!(report.signals_fence(frame_fence));
    }
}
