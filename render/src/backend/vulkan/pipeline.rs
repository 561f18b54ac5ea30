//! Render pass, pipeline layout and graphics pipeline creation.

use std::ffi::CString;

use ash::vk;
use ash::vk::Handle;

use super::conversion::{
    convert_access_flags, convert_blend_factor, convert_blend_op, convert_color_write_mask,
    convert_compare_op, convert_cull_mode, convert_dynamic_state, convert_format,
    convert_front_face, convert_image_layout, convert_input_rate, convert_load_op,
    convert_pipeline_stages, convert_polygon_mode, convert_shader_stage, convert_shader_stages,
    convert_store_op, convert_topology,
};
use crate::backend::{
    AttachmentReference, DescriptorPoolDescriptor, DescriptorSetLayoutBinding,
    GraphicsPipelineDescriptor, PipelineLayoutDescriptor, RenderPassDescriptor,
};
use crate::error::GraphicsError;

fn creation_error(what: &str, error: vk::Result) -> GraphicsError {
    match error {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::ResourceCreationFailed(format!(
            "Failed to create {}: {:?}",
            what, other
        )),
    }
}

fn convert_reference(reference: &AttachmentReference) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment: reference.attachment,
        layout: convert_image_layout(reference.layout),
    }
}

/// Create a render pass with a single graphics subpass.
///
/// The descriptor's dependency becomes the dependency from
/// `VK_SUBPASS_EXTERNAL` into subpass 0.
pub fn create_render_pass(
    device: &ash::Device,
    descriptor: &RenderPassDescriptor,
) -> Result<vk::RenderPass, GraphicsError> {
    let attachments: Vec<vk::AttachmentDescription> = descriptor
        .attachments
        .iter()
        .map(|attachment| {
            vk::AttachmentDescription::default()
                .format(convert_format(attachment.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(convert_load_op(attachment.load_op))
                .store_op(convert_store_op(attachment.store_op))
                .stencil_load_op(convert_load_op(attachment.stencil_load_op))
                .stencil_store_op(convert_store_op(attachment.stencil_store_op))
                .initial_layout(convert_image_layout(attachment.initial_layout))
                .final_layout(convert_image_layout(attachment.final_layout))
        })
        .collect();

    let color_references: Vec<vk::AttachmentReference> = descriptor
        .color_references
        .iter()
        .map(convert_reference)
        .collect();
    let depth_reference = descriptor.depth_reference.as_ref().map(convert_reference);

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_references);
    if let Some(depth_reference) = depth_reference.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_reference);
    }
    let subpasses = [subpass];

    let dependency = &descriptor.dependency;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(convert_pipeline_stages(dependency.src_stages))
        .dst_stage_mask(convert_pipeline_stages(dependency.dst_stages))
        .src_access_mask(convert_access_flags(dependency.src_access))
        .dst_access_mask(convert_access_flags(dependency.dst_access))];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| creation_error("render pass", e))
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    descriptor: &PipelineLayoutDescriptor,
) -> Result<vk::PipelineLayout, GraphicsError> {
    let set_layouts: Vec<vk::DescriptorSetLayout> = descriptor
        .set_layouts
        .iter()
        .map(|layout| vk::DescriptorSetLayout::from_raw(layout.raw()))
        .collect();

    let push_constant_ranges: Vec<vk::PushConstantRange> = descriptor
        .push_constant_ranges
        .iter()
        .map(|range| vk::PushConstantRange {
            stage_flags: convert_shader_stages(range.stages),
            offset: range.offset,
            size: range.size,
        })
        .collect();

    let create_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    unsafe { device.create_pipeline_layout(&create_info, None) }
        .map_err(|e| creation_error("pipeline layout", e))
}

/// Create a graphics pipeline against a render pass subpass.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    descriptor: &GraphicsPipelineDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    let entry_points = descriptor
        .stages
        .iter()
        .map(|stage| {
            CString::new(stage.entry_point.as_str()).map_err(|_| {
                GraphicsError::InvalidParameter(format!(
                    "entry point {:?} contains a NUL byte",
                    stage.entry_point
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = descriptor
        .stages
        .iter()
        .zip(&entry_points)
        .map(|(stage, entry_point)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert_shader_stage(stage.stage))
                .module(vk::ShaderModule::from_raw(stage.module.raw()))
                .name(entry_point)
        })
        .collect();

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = descriptor
        .vertex_bindings
        .iter()
        .map(|binding| {
            vk::VertexInputBindingDescription::default()
                .binding(binding.binding)
                .stride(binding.stride)
                .input_rate(convert_input_rate(binding.input_rate))
        })
        .collect();

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = descriptor
        .vertex_attributes
        .iter()
        .map(|attribute| {
            vk::VertexInputAttributeDescription::default()
                .location(attribute.location)
                .binding(attribute.binding)
                .format(convert_format(attribute.format))
                .offset(attribute.offset)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(descriptor.topology))
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic; only the counts are baked.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let depth_bias = &descriptor.depth_bias;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_polygon_mode(descriptor.polygon_mode))
        .line_width(descriptor.line_width())
        .cull_mode(convert_cull_mode(descriptor.cull_mode))
        .front_face(convert_front_face(descriptor.front_face))
        .depth_bias_enable(depth_bias.enable)
        .depth_bias_constant_factor(depth_bias.constant_factor())
        .depth_bias_slope_factor(depth_bias.slope_factor())
        .depth_bias_clamp(depth_bias.clamp());

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(descriptor.depth_test)
        .depth_write_enable(descriptor.depth_write)
        .depth_compare_op(convert_compare_op(descriptor.depth_compare))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = descriptor
        .color_blend
        .iter()
        .map(|blend| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(blend.blend_enable)
                .src_color_blend_factor(convert_blend_factor(blend.src_color_factor))
                .dst_color_blend_factor(convert_blend_factor(blend.dst_color_factor))
                .color_blend_op(convert_blend_op(blend.color_op))
                .src_alpha_blend_factor(convert_blend_factor(blend.src_alpha_factor))
                .dst_alpha_blend_factor(convert_blend_factor(blend.dst_alpha_factor))
                .alpha_blend_op(convert_blend_op(blend.alpha_op))
                .color_write_mask(convert_color_write_mask(blend.write_mask))
        })
        .collect();

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states: Vec<vk::DynamicState> = descriptor
        .dynamic_states
        .iter()
        .copied()
        .map(convert_dynamic_state)
        .collect();
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(vk::PipelineLayout::from_raw(descriptor.layout.raw()))
        .render_pass(vk::RenderPass::from_raw(descriptor.render_pass.raw()))
        .subpass(descriptor.subpass);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| creation_error("graphics pipeline", e))?;

    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed("Driver returned no pipeline".to_string())
    })
}

/// Create a layout of combined image/sampler bindings.
pub fn create_descriptor_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(convert_shader_stages(binding.stages))
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| creation_error("descriptor set layout", e))
}

pub fn create_descriptor_pool(
    device: &ash::Device,
    descriptor: &DescriptorPoolDescriptor,
) -> Result<vk::DescriptorPool, GraphicsError> {
    // Vulkan rejects zero-sized pools.
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: descriptor.combined_image_samplers.max(1),
    }];

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(descriptor.max_sets.max(1))
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&create_info, None) }
        .map_err(|e| creation_error("descriptor pool", e))
}
