//! shader 程序与反射信息
//!
//! shader 的编译与反射不在渲染图的职责内，调用者提供已经创建好的 module 以及反射出的 binding。

use std::collections::HashSet;

use ash::vk;
use cinder_gfx::resources::{image::format_byte_size, pipeline::GfxShaderStage};
use itertools::Itertools;

use crate::descriptor_cache::RgLayoutSpec;

/// 反射出的一个 descriptor binding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgShaderBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

impl RgShaderBinding {
    #[inline]
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
        }
    }

    #[inline]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// 顶点输入属性，按 location 顺序排列
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgVertexAttribute {
    pub format: vk::Format,
    pub size: u32,
}

impl RgVertexAttribute {
    /// size 由 format 推断，未知 format 需要用 [`Self::with_size`]
    pub fn new(format: vk::Format) -> Option<Self> {
        format_byte_size(format).map(|size| Self { format, size })
    }

    #[inline]
    pub fn with_size(format: vk::Format, size: u32) -> Self {
        Self { format, size }
    }
}

#[derive(Clone, Debug)]
pub struct RgShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
    pub bindings: Vec<RgShaderBinding>,
}

/// 一个 pass 使用的全部 shader
#[derive(Clone, Debug, Default)]
pub struct RgShaderProgram {
    pub stages: Vec<RgShaderStage>,
    /// vertex shader 的输入
    pub vertex_attributes: Vec<RgVertexAttribute>,
}

impl RgShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(
        mut self,
        stage: vk::ShaderStageFlags,
        module: vk::ShaderModule,
        entry_point: impl Into<String>,
        bindings: Vec<RgShaderBinding>,
    ) -> Self {
        self.stages.push(RgShaderStage {
            stage,
            module,
            entry_point: entry_point.into(),
            bindings,
        });
        self
    }

    pub fn with_vertex_attributes(mut self, attributes: Vec<RgVertexAttribute>) -> Self {
        self.vertex_attributes = attributes;
        self
    }

    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, stage| acc | stage.stage)
    }

    /// 只支持 vertex + fragment 的图形管线，或者单独的 compute
    pub fn is_valid_combination(&self) -> bool {
        let flags = self.stage_flags();
        let mut seen = HashSet::new();
        let unique = self.stages.iter().all(|stage| seen.insert(stage.stage.as_raw()));
        unique
            && (flags == vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
                || flags == vk::ShaderStageFlags::COMPUTE)
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.stage_flags() == vk::ShaderStageFlags::COMPUTE
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        if self.is_compute() { vk::PipelineBindPoint::COMPUTE } else { vk::PipelineBindPoint::GRAPHICS }
    }

    /// 第一个声明了该 slot 的 stage 中的反射信息
    pub fn binding(&self, slot: u32) -> Option<RgShaderBinding> {
        self.stages.iter().flat_map(|stage| stage.bindings.iter()).find(|binding| binding.binding == slot).copied()
    }

    pub fn has_bindings(&self) -> bool {
        self.stages.iter().any(|stage| !stage.bindings.is_empty())
    }

    /// descriptor 缓存使用的 layout 描述
    pub fn layout_spec(&self) -> RgLayoutSpec {
        self.stages
            .iter()
            .filter(|stage| !stage.bindings.is_empty())
            .fold(RgLayoutSpec::new(), |spec, stage| spec.with_stage(stage.stage, stage.bindings.clone()))
    }

    pub fn gfx_stages(&self) -> Vec<GfxShaderStage> {
        self.stages
            .iter()
            .map(|stage| GfxShaderStage {
                stage: stage.stage,
                module: stage.module,
                entry_point: stage.entry_point.clone(),
            })
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_combinations() {
        let graphics = RgShaderProgram::new()
            .with_stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main", vec![])
            .with_stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main", vec![]);
        assert!(graphics.is_valid_combination());
        assert_eq!(graphics.bind_point(), vk::PipelineBindPoint::GRAPHICS);

        let compute = RgShaderProgram::new().with_stage(
            vk::ShaderStageFlags::COMPUTE,
            vk::ShaderModule::null(),
            "main",
            vec![],
        );
        assert!(compute.is_valid_combination());
        assert_eq!(compute.bind_point(), vk::PipelineBindPoint::COMPUTE);

        let vertex_only = RgShaderProgram::new().with_stage(
            vk::ShaderStageFlags::VERTEX,
            vk::ShaderModule::null(),
            "main",
            vec![],
        );
        assert!(!vertex_only.is_valid_combination());

        let mixed = compute.clone().with_stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main", vec![]);
        assert!(!mixed.is_valid_combination());
    }

    #[test]
    fn test_binding_lookup() {
        let program = RgShaderProgram::new()
            .with_stage(
                vk::ShaderStageFlags::VERTEX,
                vk::ShaderModule::null(),
                "main",
                vec![RgShaderBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER)],
            )
            .with_stage(
                vk::ShaderStageFlags::FRAGMENT,
                vk::ShaderModule::null(),
                "main",
                vec![RgShaderBinding::new(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER).with_count(2)],
            );
        assert_eq!(program.binding(1).map(|b| b.count), Some(2));
        assert_eq!(program.binding(5), None);
        assert!(program.has_bindings());
        assert_eq!(program.layout_spec().stage_count(), 2);
    }
}
