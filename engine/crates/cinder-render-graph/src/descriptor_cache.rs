//! descriptor set layout 缓存
//!
//! 以"每个 stage 的 binding 列表"为 key。新请求是已有条目的子集时直接复用；
//! 新请求包含已有条目时，旧条目被替换并进入 retired 列表，等到 GPU 不再使用后由调用者回收。
//!
//! 复用的前提是多个 pass 可以共享同一个 descriptor set，但共享的 set 在同一帧内会被不同 pass 覆盖写入，
//! 调用者需要保证共享同一 layout 的 pass 绑定的资源一致。

use ash::vk;
use cinder_gfx::{device::GfxDevice, resources::descriptor::GfxDescriptorBinding};
use indexmap::IndexMap;

use crate::{
    error::{RgError, RgResult},
    shader::RgShaderBinding,
};

/// 每个 stage 的 binding 列表
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgLayoutSpec {
    stages: Vec<(vk::ShaderStageFlags, Vec<RgShaderBinding>)>,
}

impl RgLayoutSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: vk::ShaderStageFlags, bindings: Vec<RgShaderBinding>) -> Self {
        match self.stages.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, existing)) => existing.extend(bindings),
            None => self.stages.push((stage, bindings)),
        }
        self
    }

    #[inline]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(|(_, bindings)| bindings.is_empty())
    }

    /// self 的每一个 stage 的每一个 binding 都出现在 other 的同一 stage 中
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.stages.iter().all(|(stage, bindings)| {
            let Some((_, other_bindings)) = other.stages.iter().find(|(s, _)| s == stage) else {
                return bindings.is_empty();
            };
            bindings.iter().all(|binding| other_bindings.contains(binding))
        })
    }

    /// 合并所有 stage：同一个 binding 的 stage flags 取并集
    ///
    /// 类型或数量不一致时报错
    pub fn merged_bindings(&self) -> RgResult<Vec<GfxDescriptorBinding>> {
        let mut merged: IndexMap<u32, GfxDescriptorBinding> = IndexMap::new();
        for (stage, bindings) in &self.stages {
            for binding in bindings {
                match merged.get_mut(&binding.binding) {
                    Some(existing) => {
                        if existing.descriptor_type != binding.descriptor_type || existing.count != binding.count {
                            return Err(RgError::ConflictingBinding {
                                binding: binding.binding,
                            });
                        }
                        existing.stages |= *stage;
                    }
                    None => {
                        merged.insert(
                            binding.binding,
                            GfxDescriptorBinding {
                                binding: binding.binding,
                                descriptor_type: binding.descriptor_type,
                                count: binding.count,
                                stages: *stage,
                            },
                        );
                    }
                }
            }
        }
        merged.sort_keys();
        Ok(merged.into_values().collect())
    }
}

/// 缓存给出的 layout 与 set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgDescriptor {
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
}

struct RgCacheEntry {
    spec: RgLayoutSpec,
    descriptor: RgDescriptor,
}

#[derive(Default)]
pub struct RgDescriptorLayoutCache {
    entries: Vec<RgCacheEntry>,
    /// 被替换的条目，可能仍被之前构建的 graph 或 in-flight 的帧引用
    retired: Vec<RgDescriptor>,
    allocation_count: usize,
}

impl RgDescriptorLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回能够容纳 `spec` 的 layout 与 set
    pub fn get_descriptor(&mut self, device: &dyn GfxDevice, spec: &RgLayoutSpec) -> RgResult<RgDescriptor> {
        if let Some(entry) = self.entries.iter().find(|entry| spec.is_subset_of(&entry.spec)) {
            return Ok(entry.descriptor);
        }

        // 先校验，保证出错时缓存不被修改
        let bindings = spec.merged_bindings()?;

        let layout = device.create_descriptor_set_layout(&bindings)?;
        let set = match device.allocate_descriptor_set(layout) {
            Ok(set) => set,
            Err(e) => {
                device.destroy_descriptor_set_layout(layout);
                return Err(e.into());
            }
        };
        self.allocation_count += 1;

        let (evicted, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|entry| entry.spec.is_subset_of(spec));
        if !evicted.is_empty() {
            log::debug!("descriptor cache: {} layout(s) replaced by a superset", evicted.len());
        }
        self.retired.extend(evicted.into_iter().map(|entry| entry.descriptor));
        self.entries = kept;

        let descriptor = RgDescriptor { layout, set };
        self.entries.push(RgCacheEntry {
            spec: spec.clone(),
            descriptor,
        });
        Ok(descriptor)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 创建过的 layout 数量
    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// 销毁被替换的条目，调用者需要保证它们不再被 GPU 使用
    pub fn collect_retired(&mut self, device: &dyn GfxDevice) {
        for descriptor in self.retired.drain(..) {
            device.free_descriptor_set(descriptor.set);
            device.destroy_descriptor_set_layout(descriptor.layout);
        }
    }

    pub fn destroy(&mut self, device: &dyn GfxDevice) {
        self.collect_retired(device);
        for entry in self.entries.drain(..) {
            device.free_descriptor_set(entry.descriptor.set);
            device.destroy_descriptor_set_layout(entry.descriptor.layout);
        }
    }
}

impl Drop for RgDescriptorLayoutCache {
    fn drop(&mut self) {
        if !self.entries.is_empty() || !self.retired.is_empty() {
            log::warn!(
                "descriptor cache dropped with {} live and {} retired layouts, call destroy() first",
                self.entries.len(),
                self.retired.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use cinder_gfx::device::headless::{GfxObjectKind, HeadlessDevice};

    use super::*;

    fn ubo(binding: u32) -> RgShaderBinding {
        RgShaderBinding::new(binding, vk::DescriptorType::UNIFORM_BUFFER)
    }

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(vk::Extent2D {
            width: 64,
            height: 64,
        })
    }

    #[test]
    fn test_same_spec_is_cached() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let spec = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0)]);

        let first = cache.get_descriptor(&device, &spec).unwrap();
        let second = cache.get_descriptor(&device, &spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.allocation_count(), 1);
        assert_eq!(cache.len(), 1);

        cache.destroy(&device);
        assert_eq!(device.live_count(GfxObjectKind::DescriptorSetLayout), 0);
        assert_eq!(device.live_count(GfxObjectKind::DescriptorSet), 0);
    }

    #[test]
    fn test_superset_replaces_subset() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let small = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0)]);
        let large = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0), ubo(1)]);

        let first = cache.get_descriptor(&device, &small).unwrap();
        let second = cache.get_descriptor(&device, &large).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.retired_count(), 1);

        // 子集命中已有条目，不再分配
        let third = cache.get_descriptor(&device, &small).unwrap();
        assert_eq!(third, second);
        assert_eq!(cache.allocation_count(), 2);

        cache.collect_retired(&device);
        assert_eq!(device.live_count(GfxObjectKind::DescriptorSetLayout), 1);
        cache.destroy(&device);
    }

    #[test]
    fn test_stage_matters_for_subset() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let vertex = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0)]);
        let fragment = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::FRAGMENT, vec![ubo(0)]);

        let a = cache.get_descriptor(&device, &vertex).unwrap();
        let b = cache.get_descriptor(&device, &fragment).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        cache.destroy(&device);
    }

    #[test]
    fn test_merged_bindings() {
        let spec = RgLayoutSpec::new()
            .with_stage(vk::ShaderStageFlags::FRAGMENT, vec![ubo(2), ubo(0)])
            .with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0)]);
        let merged = spec.merged_bindings().unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].binding, 0);
        assert_eq!(merged[0].stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(merged[1].stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_conflicting_binding() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let spec = RgLayoutSpec::new().with_stage(vk::ShaderStageFlags::VERTEX, vec![ubo(0)]).with_stage(
            vk::ShaderStageFlags::FRAGMENT,
            vec![RgShaderBinding::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)],
        );

        assert_eq!(cache.get_descriptor(&device, &spec), Err(RgError::ConflictingBinding { binding: 0 }));
        assert!(cache.is_empty());
        assert_eq!(device.live_count(GfxObjectKind::DescriptorSetLayout), 0);
    }
}
