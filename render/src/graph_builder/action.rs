//! The closed set of actions a graph builder sequences.

use crate::backend::{
    BufferBarrier, BufferCopyRegion, BufferHandle, CommandBufferHandle, FenceHandle,
    PresentResult,
};
use crate::command::{CommandPool, SubmitCommandParams};
use crate::error::GraphicsError;
use crate::geometry::{GeometryHandle, StagedGeometry};
use crate::pass::{PassStats, PassTarget, RenderPassExecutor, RenderPassGenerator};
use crate::swapchain::AcquireOutcome;
use crate::types::{AccessFlags, BufferDescriptor, PipelineStages};

use super::context::{CommandPoolTarget, ExecutionContext};

/// Index of a pending upload inside one graph builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadSlot(pub(super) usize);

/// Buffers of one staged upload, filled in as its actions run.
#[derive(Debug, Default)]
pub(super) struct PendingUpload {
    pub size: u64,
    pub staging: BufferHandle,
    pub gpu: BufferHandle,
    /// The staging buffer was handed to a frame.
    pub retired: bool,
}

/// Command pool lifecycle and recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPoolAction {
    Allocate,
    Reset,
    AllocateCommandBuffer,
    EnableRecording,
    DisableRecording,
    ReleaseCommandBuffer,
    Submit(SubmitCommandParams),
}

/// Frame fence operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceAction {
    Allocate { signaled: bool },
    /// Wait, then release the frame's retired staging buffers.
    Wait,
    Reset,
}

/// Presentable surface record of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAction {
    /// Create the frame's render-finished event and clear its record.
    Allocate,
    /// Present the frame's acquired image once rendering finished.
    Present,
}

/// Swapchain operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainAction {
    /// Acquire the next image for the frame; recreates the swapchain on
    /// failure, which fails the action.
    AcquirePresentableSurface,
}

/// Geometry staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferAction {
    /// Create the host-visible staging buffer.
    AllocateCpu { upload: UploadSlot },
    /// Write packed geometry into the staging buffer.
    StageGeometryData {
        upload: UploadSlot,
        data: StagedGeometry,
    },
    /// Create the device-local buffer and attach it to `geometry`.
    AllocateGpu {
        upload: UploadSlot,
        geometry: GeometryHandle,
    },
    /// Record the copy into the recording command buffer of `pool`. The
    /// staging buffer is kept alive by frame slot `frame`.
    TransferToGpu {
        upload: UploadSlot,
        pool: CommandPoolTarget,
        frame: usize,
    },
}

/// One step of a graph builder.
#[derive(Debug, Clone)]
pub enum GraphAction {
    CommandPool {
        target: CommandPoolTarget,
        action: CommandPoolAction,
    },
    Fence {
        frame: usize,
        action: FenceAction,
    },
    Surface {
        frame: usize,
        action: SurfaceAction,
    },
    Swapchain {
        frame: usize,
        action: SwapchainAction,
    },
    Buffer(BufferAction),
    /// Record a render pass into the recording command buffer of `pool`.
    RenderPass {
        pool: CommandPoolTarget,
        generator: Box<RenderPassGenerator>,
    },
}

/// What a successful action produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutput {
    Done,
    /// A command buffer reached the queue; `fence` is signaled when it
    /// completes.
    Submitted { fence: Option<FenceHandle> },
    /// Draw statistics of a render pass action.
    Pass(PassStats),
}

impl GraphAction {
    /// Short description used in logs and reports.
    pub fn label(&self) -> String {
        match self {
            Self::CommandPool { target, action } => {
                let op = match action {
                    CommandPoolAction::Allocate => "allocate",
                    CommandPoolAction::Reset => "reset",
                    CommandPoolAction::AllocateCommandBuffer => "allocate_command_buffer",
                    CommandPoolAction::EnableRecording => "enable_recording",
                    CommandPoolAction::DisableRecording => "disable_recording",
                    CommandPoolAction::ReleaseCommandBuffer => "release_command_buffer",
                    CommandPoolAction::Submit(_) => "submit",
                };
                format!("command_pool.{op}({target})")
            }
            Self::Fence { frame, action } => {
                let op = match action {
                    FenceAction::Allocate { .. } => "allocate",
                    FenceAction::Wait => "wait",
                    FenceAction::Reset => "reset",
                };
                format!("fence.{op}(frame {frame})")
            }
            Self::Surface { frame, action } => {
                let op = match action {
                    SurfaceAction::Allocate => "allocate",
                    SurfaceAction::Present => "present",
                };
                format!("surface.{op}(frame {frame})")
            }
            Self::Swapchain { frame, action } => match action {
                SwapchainAction::AcquirePresentableSurface => {
                    format!("swapchain.acquire_presentable_surface(frame {frame})")
                }
            },
            Self::Buffer(action) => match action {
                BufferAction::AllocateCpu { upload } => {
                    format!("buffer.allocate_cpu(upload {})", upload.0)
                }
                BufferAction::StageGeometryData { upload, .. } => {
                    format!("buffer.stage_geometry_data(upload {})", upload.0)
                }
                BufferAction::AllocateGpu { upload, .. } => {
                    format!("buffer.allocate_gpu(upload {})", upload.0)
                }
                BufferAction::TransferToGpu { upload, .. } => {
                    format!("buffer.transfer_to_gpu(upload {})", upload.0)
                }
            },
            Self::RenderPass { generator, .. } => format!("render_pass('{}')", generator.name()),
        }
    }

    pub(super) fn execute(
        &self,
        cx: &mut ExecutionContext<'_>,
        uploads: &mut [PendingUpload],
    ) -> Result<ActionOutput, GraphicsError> {
        match self {
            Self::CommandPool { target, action } => execute_command_pool(cx, target, action),
            Self::Fence { frame, action } => execute_fence(cx, *frame, *action),
            Self::Surface { frame, action } => execute_surface(cx, *frame, *action),
            Self::Swapchain { frame, action } => execute_swapchain(cx, *frame, *action),
            Self::Buffer(action) => execute_buffer(cx, uploads, action),
            Self::RenderPass { pool, generator } => {
                let command_buffer = recording_command_buffer(cx.command_pool(pool)?)?;
                let target = PassTarget {
                    command_buffer,
                    image_index: cx.require_image_index()?,
                    extent: cx.swapchain.extent(),
                };
                RenderPassExecutor::new(cx.ctx, cx.graph, cx.geometry)
                    .execute(generator, target)
                    .map(ActionOutput::Pass)
            }
        }
    }
}

fn recording_command_buffer(pool: &CommandPool) -> Result<CommandBufferHandle, GraphicsError> {
    match pool.command_buffer() {
        Some(buffer) if buffer.is_recording() => Ok(buffer.handle()),
        Some(buffer) => Err(GraphicsError::InvalidParameter(format!(
            "{:?} is not recording",
            buffer.handle()
        ))),
        None => Err(GraphicsError::InvalidHandle(
            "command buffer is not allocated".to_string(),
        )),
    }
}

fn execute_command_pool(
    cx: &mut ExecutionContext<'_>,
    target: &CommandPoolTarget,
    action: &CommandPoolAction,
) -> Result<ActionOutput, GraphicsError> {
    let ctx = cx.ctx;
    let backend = ctx.backend();

    if let (CommandPoolAction::Allocate, CommandPoolTarget::Cached(key)) = (action, target) {
        if cx.graph.cached_command_pool(key).is_some() {
            return Ok(ActionOutput::Done);
        }
        let mut pool = CommandPool::default();
        pool.allocate(backend)?;
        cx.graph.register_command_pool(backend, key.clone(), pool);
        return Ok(ActionOutput::Done);
    }

    let pool = cx.command_pool(target)?;
    match action {
        CommandPoolAction::Allocate => pool.allocate(backend)?,
        CommandPoolAction::Reset => pool.reset(backend)?,
        CommandPoolAction::AllocateCommandBuffer => {
            pool.allocate_command_buffer(backend)?;
        }
        CommandPoolAction::EnableRecording => pool.command_buffer_mut()?.begin(backend)?,
        CommandPoolAction::DisableRecording => pool.command_buffer_mut()?.end(backend)?,
        CommandPoolAction::ReleaseCommandBuffer => pool.release_command_buffer(backend),
        CommandPoolAction::Submit(params) => {
            pool.submit(backend, params)?;
            return Ok(ActionOutput::Submitted {
                fence: params.fence,
            });
        }
    }
    Ok(ActionOutput::Done)
}

fn execute_fence(
    cx: &mut ExecutionContext<'_>,
    slot: usize,
    action: FenceAction,
) -> Result<ActionOutput, GraphicsError> {
    let ctx = cx.ctx;
    let backend = ctx.backend();
    let frame = cx.frame(slot)?;
    match action {
        FenceAction::Allocate { signaled } => {
            frame.in_flight.allocate(ctx.backend_arc(), signaled)?
        }
        FenceAction::Wait => frame.wait(backend)?,
        FenceAction::Reset => frame.in_flight.reset()?,
    }
    Ok(ActionOutput::Done)
}

fn execute_surface(
    cx: &mut ExecutionContext<'_>,
    slot: usize,
    action: SurfaceAction,
) -> Result<ActionOutput, GraphicsError> {
    let ctx = cx.ctx;
    let backend = ctx.backend();
    match action {
        SurfaceAction::Allocate => {
            let frame = cx.frame(slot)?;
            frame.render_finished.allocate(ctx.backend_arc())?;
            frame.surface = Default::default();
        }
        SurfaceAction::Present => {
            let frame = cx.frame(slot)?;
            let image_index = frame.surface.image_index.take().ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("frame {slot} has no acquired image"))
            })?;
            let wait = frame.render_finished.handle();
            let result = cx.swapchain.present(backend, image_index, wait)?;
            if result != PresentResult::Presented {
                log::warn!("Present of image {} returned {:?}", image_index, result);
            }
        }
    }
    Ok(ActionOutput::Done)
}

fn execute_swapchain(
    cx: &mut ExecutionContext<'_>,
    slot: usize,
    action: SwapchainAction,
) -> Result<ActionOutput, GraphicsError> {
    match action {
        SwapchainAction::AcquirePresentableSurface => {
            cx.frame(slot)?;
            let outcome = cx.swapchain.request_new_presentable_image(
                cx.ctx,
                &mut *cx.graph,
                slot,
                &mut *cx.pump,
            )?;
            match outcome {
                AcquireOutcome::Ready(index) => {
                    cx.frame(slot)?.surface.image_index = Some(index);
                    cx.image_index = Some(index);
                    Ok(ActionOutput::Done)
                }
                AcquireOutcome::Recreated => {
                    cx.image_index = None;
                    Err(GraphicsError::SurfaceOutdated)
                }
            }
        }
    }
}

fn execute_buffer(
    cx: &mut ExecutionContext<'_>,
    uploads: &mut [PendingUpload],
    action: &BufferAction,
) -> Result<ActionOutput, GraphicsError> {
    let ctx = cx.ctx;
    let backend = ctx.backend();
    match action {
        BufferAction::AllocateCpu { upload } => {
            let pending = upload_mut(uploads, *upload)?;
            if !pending.staging.is_null() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "upload {} already has a staging buffer",
                    upload.0
                )));
            }
            pending.staging = backend.create_buffer(
                &BufferDescriptor::staging(pending.size).with_label("geometry staging"),
            )?;
        }
        BufferAction::StageGeometryData { upload, data } => {
            let pending = upload_mut(uploads, *upload)?;
            if pending.staging.is_null() {
                return Err(GraphicsError::InvalidHandle(format!(
                    "upload {} has no staging buffer",
                    upload.0
                )));
            }
            backend.write_buffer(pending.staging, 0, &data.bytes)?;
        }
        BufferAction::AllocateGpu { upload, geometry } => {
            let pending = upload_mut(uploads, *upload)?;
            let buffer = backend
                .create_buffer(&BufferDescriptor::geometry(pending.size).with_label("geometry"))?;
            match cx.geometry.assign(*geometry, buffer) {
                Ok(replaced) => {
                    if let Some(old) = replaced {
                        log::warn!("Geometry {:?} re-uploaded, destroying old buffer", geometry);
                        backend.destroy_buffer(old);
                    }
                    pending.gpu = buffer;
                }
                Err(e) => {
                    backend.destroy_buffer(buffer);
                    return Err(e);
                }
            }
        }
        BufferAction::TransferToGpu {
            upload,
            pool,
            frame,
        } => {
            let pending = upload_mut(uploads, *upload)?;
            if pending.staging.is_null() || pending.gpu.is_null() {
                return Err(GraphicsError::InvalidHandle(format!(
                    "upload {} is missing a buffer",
                    upload.0
                )));
            }
            cx.frame(*frame)?;
            let cb = recording_command_buffer(cx.command_pool(pool)?)?;
            backend.cmd_copy_buffer(
                cb,
                pending.staging,
                pending.gpu,
                &[BufferCopyRegion {
                    src_offset: 0,
                    dst_offset: 0,
                    size: pending.size,
                }],
            );
            backend.cmd_buffer_barrier(
                cb,
                &BufferBarrier {
                    buffer: pending.gpu,
                    src_stages: PipelineStages::TRANSFER,
                    dst_stages: PipelineStages::VERTEX_INPUT,
                    src_access: AccessFlags::TRANSFER_WRITE,
                    dst_access: AccessFlags::VERTEX_ATTRIBUTE_READ | AccessFlags::INDEX_READ,
                },
            );
            cx.frame(*frame)?.retire_staging(pending.staging);
            pending.retired = true;
        }
    }
    Ok(ActionOutput::Done)
}

fn upload_mut(
    uploads: &mut [PendingUpload],
    slot: UploadSlot,
) -> Result<&mut PendingUpload, GraphicsError> {
    uploads
        .get_mut(slot.0)
        .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown upload {}", slot.0)))
}
