//! 渲染图的构建与执行
//!
//! [`RenderGraphBuilder`] 收集 pass 声明，[`RenderGraphBuilder::build`] 依次完成：
//! 1. 收集 attachment 声明并校验 output
//! 2. 推导每个资源在每个 pass 中的用法转换
//! 3. 创建 attachment（extent 为 0 的维度跟随 surface）
//! 4. 烘焙每个 pass，生成 barrier 计划
//! 5. 准备首帧使用的 layout 初始化 barrier
//!
//! [`RenderGraph::execute`] 每一帧按声明顺序录制全部 pass，[`RenderGraph::present`] 把 output 拷贝到 swapchain。

use std::collections::HashMap;

use ash::vk::{self, Handle};
use cinder_gfx::{
    commands::{
        barrier::GfxBarrierBatch,
        render_pass_begin::{GfxImageBlit, GfxRenderPassBegin},
    },
    device::{GfxDevice, GfxDeviceRef},
    resources::{
        descriptor::{GfxDescriptorResource, GfxDescriptorWrite},
        image::{GfxImage, GfxImageDesc, GfxImageViewDesc, is_depth_format},
    },
};
use indexmap::IndexMap;
use itertools::Itertools;
use slotmap::{SlotMap, new_key_type};

use crate::{
    baker::{RgBakedPass, RgOutputTarget},
    barrier::{RgBarrierEntry, RgPassBarrier, image_barrier},
    declaration::{RgAttachmentDecl, RgBindingSet, RgDependency, RgPassContext, RgPassDecl, RgResolvePolicy, RgSetupContext},
    descriptor_cache::RgDescriptorLayoutCache,
    error::{RgError, RgResult},
    frame::RgFrame,
    profiling::rg_span,
    resolver::{RgPassUsages, RgTransition, RgTransitionTable},
    resource::{RgImage, RgResolveTable, RgResource, RgResourceKey, RgResourceRef},
    settings::DefaultRenderGraphSettings,
    state::{format_access_flags, format_pipeline_stage},
    usage::RgUsage,
};

new_key_type! {
    pub struct RgAttachmentHandle;
}

/// graph 创建并持有的 image
#[derive(Clone, Debug)]
pub struct RgAttachment {
    pub decl: RgAttachmentDecl,
    pub image: GfxImage,
    pub view: vk::ImageView,
}

impl RgAttachment {
    #[inline]
    pub fn as_image(&self) -> RgImage {
        RgImage {
            image: self.image,
            view: self.view,
        }
    }
}

struct RgPassEntry {
    decl: RgPassDecl,
    baked: RgBakedPass,
    barrier: RgPassBarrier,
    /// AtBuild 与 Resolved 策略在构建时就确定的 descriptor 写入
    prepared_writes: Option<Vec<GfxDescriptorWrite>>,
}

type RgCreationCallback = Box<dyn FnOnce(&dyn GfxDevice, vk::CommandBuffer)>;

#[inline]
fn is_buffer_descriptor(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

/// 把 binding set 解析成 descriptor 写入
///
/// image 的 layout 取本 pass 结束时该资源的用法
fn descriptor_writes(
    decl: &RgPassDecl,
    set: &RgBindingSet,
    resolve: &RgResolveTable,
    table: &RgTransitionTable,
    pass_index: usize,
) -> RgResult<Vec<GfxDescriptorWrite>> {
    let Some(program) = &decl.shader else {
        return Ok(vec![]);
    };
    set.bindings
        .iter()
        .map(|binding| {
            let reflected = program.binding(binding.slot).ok_or_else(|| RgError::UnknownBindingSlot {
                pass: decl.name.clone(),
                slot: binding.slot,
            })?;
            let is_buffer = is_buffer_descriptor(reflected.descriptor_type);
            let resource = match binding.resource.resolve(resolve)? {
                RgResource::Buffer(buffer) if is_buffer => GfxDescriptorResource::Buffer {
                    buffer: buffer.handle,
                    offset: buffer.offset,
                    range: buffer.size,
                },
                RgResource::Image(image) if !is_buffer => {
                    let layout = table
                        .transition(&binding.resource.key(), pass_index)
                        .map(|transition| transition.final_usage.image_state().layout)
                        .filter(|layout| *layout != vk::ImageLayout::UNDEFINED)
                        .unwrap_or(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                    GfxDescriptorResource::Image {
                        view: image.view,
                        layout,
                        sampler: binding.sampler,
                    }
                }
                _ => {
                    return Err(RgError::ResourceKindMismatch {
                        name: binding.resource.key().to_string(),
                        expected: if is_buffer { "buffer" } else { "image" },
                    });
                }
            };
            Ok(GfxDescriptorWrite {
                binding: binding.slot,
                array_element: 0,
                descriptor_type: reflected.descriptor_type,
                resource,
            })
        })
        .collect()
}

/// 渲染图的声明
#[derive(Default)]
pub struct RenderGraphBuilder {
    passes: Vec<RgPassDecl>,
    imports: IndexMap<String, RgResource>,
    output: Option<String>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个外部资源，pass 可以通过名字引用；同名时后者覆盖前者
    ///
    /// 外部资源的 layout 由调用者维护：每一帧开始时应处于它在本图中最后一次使用后的状态
    pub fn import(&mut self, name: impl Into<String>, resource: impl Into<RgResource>) -> &mut Self {
        self.imports.insert(name.into(), resource.into());
        self
    }

    /// 指定呈现到 swapchain 的 attachment
    pub fn set_output(&mut self, name: impl Into<String>) -> &mut Self {
        self.output = Some(name.into());
        self
    }

    /// 校验 binding 并推断 binding 带来的资源依赖
    pub fn add_pass(&mut self, mut decl: RgPassDecl) -> RgResult<&mut Self> {
        if self.passes.iter().any(|pass| pass.name == decl.name) {
            return Err(RgError::DuplicatePass { name: decl.name });
        }
        if let Some(program) = &decl.shader {
            if !program.is_valid_combination() {
                return Err(RgError::InvalidShaderStages {
                    pass: decl.name.clone(),
                    stages: program.stage_flags(),
                });
            }
        }

        let mut inferred = vec![];
        if let Some(set) = &decl.binding_set {
            for binding in &set.bindings {
                let reflected = decl.shader.as_ref().and_then(|program| program.binding(binding.slot)).ok_or_else(
                    || RgError::UnknownBindingSlot {
                        pass: decl.name.clone(),
                        slot: binding.slot,
                    },
                )?;
                if set.policy == RgResolvePolicy::Resolved {
                    if let Some(name) = binding.resource.name() {
                        return Err(RgError::NamedInResolvedSet {
                            pass: decl.name.clone(),
                            name: name.to_string(),
                        });
                    }
                }
                let usage = RgUsage::from_descriptor_type(reflected.descriptor_type);
                if !usage.is_unknown() {
                    inferred.push(RgDependency {
                        resource: binding.resource.clone(),
                        usage,
                    });
                }
            }
        }
        log::debug!(
            "add pass \"{}\": {} declared and {} inferred dependencies, {} output(s)",
            decl.name,
            decl.dependencies.len(),
            inferred.len(),
            decl.outputs.len()
        );
        decl.dependencies.extend(inferred);
        self.passes.push(decl);
        Ok(self)
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn passes(&self) -> &[RgPassDecl] {
        &self.passes
    }

    /// 所有 pass 声明的 attachment，同名声明必须完全一致
    fn collect_attachments(&self) -> RgResult<IndexMap<String, RgAttachmentDecl>> {
        let mut attachments: IndexMap<String, RgAttachmentDecl> = IndexMap::new();
        for decl in self.passes.iter().flat_map(|pass| pass.attachments.iter()) {
            if self.imports.contains_key(&decl.name) {
                return Err(RgError::AttachmentRedeclared {
                    name: decl.name.clone(),
                });
            }
            match attachments.get(&decl.name) {
                Some(existing) if existing != decl => {
                    return Err(RgError::AttachmentRedeclared {
                        name: decl.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    attachments.insert(decl.name.clone(), decl.clone());
                }
            }
        }
        Ok(attachments)
    }

    /// 一个 pass 中每个资源的用法，output 按格式视为 color 或 depth attachment
    fn pass_usages(
        pass: &RgPassDecl,
        attachments: &IndexMap<String, RgAttachmentDecl>,
        refs: &mut HashMap<RgResourceKey, RgResourceRef>,
    ) -> RgPassUsages {
        let mut usages = RgPassUsages::new();
        for dependency in &pass.dependencies {
            if dependency.usage.is_unknown() {
                continue;
            }
            let key = dependency.resource.key();
            refs.entry(key.clone()).or_insert_with(|| dependency.resource.clone());
            *usages.entry(key).or_default() |= dependency.usage;
        }
        for output in &pass.outputs {
            let usage = match attachments.get(&output.name) {
                Some(decl) if is_depth_format(decl.format) => RgUsage::DEPTH_ATTACHMENT,
                _ => RgUsage::COLOR_ATTACHMENT,
            };
            let resource = RgResourceRef::named(output.name.clone());
            let key = resource.key();
            refs.entry(key.clone()).or_insert(resource);
            *usages.entry(key).or_default() |= usage;
        }
        usages
    }

    /// 创建全部 native 对象
    ///
    /// 失败时已经创建的对象都会被释放；descriptor 缓存中新增的条目保留在缓存中
    pub fn build(&self, device: GfxDeviceRef, cache: &mut RgDescriptorLayoutCache) -> RgResult<RenderGraph> {
        let _span = rg_span!("RenderGraphBuilder::build");

        let attachments = self.collect_attachments()?;
        for pass in &self.passes {
            for output in &pass.outputs {
                if !attachments.contains_key(&output.name) {
                    return Err(RgError::UnknownOutputAttachment {
                        pass: pass.name.clone(),
                        name: output.name.clone(),
                    });
                }
            }
        }
        if let Some(output) = &self.output {
            match attachments.get(output) {
                None => return Err(RgError::UnknownResource { name: output.clone() }),
                Some(decl) if is_depth_format(decl.format) => {
                    return Err(RgError::ResourceKindMismatch {
                        name: output.clone(),
                        expected: "color attachment",
                    });
                }
                Some(_) => {}
            }
        }

        let mut refs = HashMap::new();
        let pass_usages =
            self.passes.iter().map(|pass| Self::pass_usages(pass, &attachments, &mut refs)).collect_vec();
        let table = RgTransitionTable::resolve(&pass_usages);

        // 所有名字必须在构建时可以解析
        for (key, _) in table.iter() {
            if let RgResourceKey::Named(name) = key {
                if !attachments.contains_key(name) && !self.imports.contains_key(name) {
                    return Err(RgError::UnknownResource { name: name.clone() });
                }
            }
        }

        // output 呈现前后的用法，没有任何 pass 使用时无法确定
        let output = match &self.output {
            Some(name) => {
                let transition = table
                    .output_final_transition(&RgResourceKey::Named(name.clone()))
                    .filter(|transition| !transition.final_usage.is_unknown())
                    .ok_or_else(|| RgError::UnusedOutputAttachment { name: name.clone() })?;
                Some((name.clone(), transition))
            }
            None => None,
        };

        let extent = device.surface_extent();
        let mut graph = RenderGraph {
            device,
            attachments: SlotMap::with_key(),
            attachment_names: IndexMap::new(),
            imports: self.imports.clone(),
            passes: Vec::with_capacity(self.passes.len()),
            table,
            output,
            on_create: None,
            applied_writes: HashMap::new(),
            extent,
        };
        graph.allocate_attachments(&attachments, self.output.as_deref())?;
        graph.bake_passes(&self.passes, &refs, cache)?;
        graph.on_create = graph.creation_callback();
        graph.run_setup_hooks()?;

        log::info!(
            "render graph built: {} passes, {} attachments, {} tracked resources, extent {}x{}",
            graph.passes.len(),
            graph.attachments.len(),
            graph.table.len(),
            extent.width,
            extent.height
        );
        Ok(graph)
    }
}

/// 构建完成的渲染图
///
/// 持有 attachment 与每个 pass 的 native 对象，drop 时等待设备空闲后释放
pub struct RenderGraph {
    device: GfxDeviceRef,
    attachments: SlotMap<RgAttachmentHandle, RgAttachment>,
    attachment_names: IndexMap<String, RgAttachmentHandle>,
    imports: IndexMap<String, RgResource>,
    passes: Vec<RgPassEntry>,
    table: RgTransitionTable,
    /// output attachment 及其呈现前后的用法
    output: Option<(String, RgTransition)>,
    /// 第一次执行时把 attachment 从 UNDEFINED 转换到每帧开始时的用法
    on_create: Option<RgCreationCallback>,
    /// 每个 descriptor set 最近一次写入的内容，key 为 (binding, array element)
    applied_writes: HashMap<vk::DescriptorSet, IndexMap<(u32, u32), GfxDescriptorWrite>>,
    extent: vk::Extent2D,
}

// build 的各个阶段
impl RenderGraph {
    fn allocate_attachments(
        &mut self,
        decls: &IndexMap<String, RgAttachmentDecl>,
        output: Option<&str>,
    ) -> RgResult<()> {
        for (name, decl) in decls {
            let total_usages = self
                .table
                .get(&RgResourceKey::Named(name.clone()))
                .map(|info| info.total_usages)
                .unwrap_or_default();
            let mut usage = total_usages.image_usage_flags() | decl.flags.image_usage_flags();
            if output == Some(name.as_str()) {
                usage |= vk::ImageUsageFlags::TRANSFER_SRC;
            }
            if usage.is_empty() {
                log::warn!("attachment \"{}\" is declared but never used", name);
                usage = if is_depth_format(decl.format) {
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                };
            }

            let desc = GfxImageDesc {
                format: decl.format,
                extent: decl.resolved_extent(self.extent),
                mip_levels: decl.mip_levels,
                array_layers: decl.array_layers,
                usage,
                flags: decl.flags.image_create_flags(),
            };
            let image = self.device.create_image(&desc, name)?;
            let handle = self.attachments.insert(RgAttachment {
                decl: decl.clone(),
                image,
                view: vk::ImageView::null(),
            });
            self.attachment_names.insert(name.clone(), handle);
            self.attachments[handle].view =
                self.device.create_image_view(image.handle, &GfxImageViewDesc::whole(&image), name)?;
            log::debug!(
                "attachment \"{}\": {:?} {}x{} x{} layer(s), usage {:?}",
                name,
                decl.format,
                desc.extent.width,
                desc.extent.height,
                decl.array_layers,
                usage
            );
        }
        Ok(())
    }

    fn bake_passes(
        &mut self,
        decls: &[RgPassDecl],
        refs: &HashMap<RgResourceKey, RgResourceRef>,
        cache: &mut RgDescriptorLayoutCache,
    ) -> RgResult<()> {
        let resolve = self.resolve_table();
        for (pass_index, decl) in decls.iter().enumerate() {
            let barrier = RgPassBarrier::new(self.table.pass_transitions(pass_index).into_iter().filter_map(
                |(key, transition)| {
                    refs.get(key).map(|resource| RgBarrierEntry {
                        key: key.clone(),
                        resource: resource.clone(),
                        transition,
                    })
                },
            ));

            let targets = decl
                .outputs
                .iter()
                .map(|output| {
                    let attachment = self.attachment(&output.name).ok_or_else(|| RgError::UnknownOutputAttachment {
                        pass: decl.name.clone(),
                        name: output.name.clone(),
                    })?;
                    let usage = self
                        .table
                        .transition(&RgResourceKey::Named(output.name.clone()), pass_index)
                        .map(|transition| transition.final_usage)
                        .unwrap_or(RgUsage::COLOR_ATTACHMENT);
                    Ok(RgOutputTarget {
                        name: output.name.clone(),
                        load_op: output.load_op,
                        layer: output.layer,
                        image: attachment.image,
                        view: attachment.view,
                        usage,
                    })
                })
                .collect::<RgResult<Vec<_>>>()?;

            let prepared_writes = match &decl.binding_set {
                Some(set) if set.policy != RgResolvePolicy::EveryFrame => {
                    Some(descriptor_writes(decl, set, &resolve, &self.table, pass_index)?)
                }
                _ => None,
            };

            let baked = RgBakedPass::bake(self.device.as_ref(), cache, decl, &targets)?;
            self.passes.push(RgPassEntry {
                decl: decl.clone(),
                baked,
                barrier,
                prepared_writes,
            });
        }
        Ok(())
    }

    fn creation_callback(&self) -> Option<RgCreationCallback> {
        let mut batch = GfxBarrierBatch::new();
        for attachment in self.attachments.values() {
            let key = RgResourceKey::Named(attachment.decl.name.clone());
            let Some(loop_usage) = self.table.loop_usage(&key) else {
                continue;
            };
            batch.image_barriers.push(image_barrier(
                attachment.image.handle,
                attachment.image.aspect(),
                RgUsage::UNKNOWN,
                loop_usage,
            ));
        }
        if batch.is_empty() {
            return None;
        }
        batch.unify_stages();
        Some(Box::new(move |device: &dyn GfxDevice, cmd: vk::CommandBuffer| {
            log::debug!("initializing layouts of {} attachment(s)", batch.len());
            device.cmd_pipeline_barrier(cmd, &batch);
        }))
    }

    fn run_setup_hooks(&self) -> RgResult<()> {
        let resolve = self.resolve_table();
        for entry in &self.passes {
            if let Some(setup) = &entry.decl.hooks.setup {
                let ctx = RgSetupContext {
                    device: self.device.as_ref(),
                    pass: &entry.baked,
                    resolve: &resolve,
                };
                setup(&ctx)?;
            }
        }
        Ok(())
    }
}

// 执行
impl RenderGraph {
    /// 当前的名字解析表：attachment 与外部资源
    pub fn resolve_table(&self) -> RgResolveTable {
        let mut table = RgResolveTable::new();
        for (name, handle) in &self.attachment_names {
            if let Some(attachment) = self.attachments.get(*handle) {
                table.insert(name.clone(), RgResource::Image(attachment.as_image()));
            }
        }
        for (name, resource) in &self.imports {
            table.insert(name.clone(), *resource);
        }
        table
    }

    /// 在录制任何命令之前写入本帧所有 pass 的 descriptor
    ///
    /// 共享同一个 set 的 pass 必须对同一个 binding 写入相同的资源。
    /// 只更新内容变化的 binding，内容不变的 set 不会被重写
    fn update_descriptors(&mut self, resolve: &RgResolveTable) -> RgResult<()> {
        let mut frame_writes: IndexMap<vk::DescriptorSet, IndexMap<(u32, u32), (usize, GfxDescriptorWrite)>> =
            IndexMap::new();
        for (pass_index, entry) in self.passes.iter().enumerate() {
            let Some(descriptor) = entry.baked.descriptor() else {
                continue;
            };
            let writes = match (&entry.prepared_writes, &entry.decl.binding_set) {
                (Some(writes), _) => writes.clone(),
                (None, Some(set)) => descriptor_writes(&entry.decl, set, resolve, &self.table, pass_index)?,
                (None, None) => vec![],
            };
            let set_writes = frame_writes.entry(descriptor.set).or_default();
            for write in writes {
                match set_writes.entry((write.binding, write.array_element)) {
                    indexmap::map::Entry::Occupied(occupied) => {
                        let (first_pass, first_write) = occupied.get();
                        if *first_write != write {
                            let first = self.passes[*first_pass].decl.name.clone();
                            log::error!(
                                "passes \"{}\" and \"{}\" write different resources to binding {} of shared set {:?}",
                                first,
                                entry.decl.name,
                                write.binding,
                                descriptor.set
                            );
                            return Err(RgError::SharedDescriptorConflict {
                                first,
                                second: entry.decl.name.clone(),
                                binding: write.binding,
                            });
                        }
                    }
                    indexmap::map::Entry::Vacant(vacant) => {
                        vacant.insert((pass_index, write));
                    }
                }
            }
        }

        let device = self.device.as_ref();
        for (set, writes) in frame_writes {
            let applied = self.applied_writes.entry(set).or_default();
            let changed = writes
                .into_values()
                .map(|(_, write)| write)
                .filter(|write| applied.get(&(write.binding, write.array_element)) != Some(write))
                .collect_vec();
            if changed.is_empty() {
                continue;
            }
            device.update_descriptor_set(set, &changed);
            applied.extend(changed.iter().map(|write| ((write.binding, write.array_element), *write)));
        }
        Ok(())
    }

    /// 录制所有 pass
    ///
    /// 先写入所有 descriptor，然后每个 pass：before_render -> barrier -> begin render pass -> 绑定管线
    /// -> on_render -> end render pass -> after_render
    pub fn execute(&mut self, frame: &RgFrame) -> RgResult<()> {
        let _span = rg_span!("RenderGraph::execute");
        let cmd = frame.cmd;
        let resolve = self.resolve_table();
        self.update_descriptors(&resolve)?;

        let device = self.device.as_ref();
        if let Some(on_create) = self.on_create.take() {
            on_create(device, cmd);
        }

        for entry in &self.passes {
            let _pass_span = rg_span!(entry.decl.name.as_str());
            let baked = &entry.baked;

            let ctx = RgPassContext {
                device,
                cmd,
                pass: baked,
                resolve: &resolve,
                upload: &frame.upload,
                frame_id: frame.frame_id,
            };
            if let Some(hook) = &entry.decl.hooks.before_render {
                hook(&ctx)?;
            }

            entry.barrier.record(device, cmd, &resolve)?;

            device.cmd_begin_label(cmd, baked.name(), DefaultRenderGraphSettings::PASS_LABEL_COLOR);
            let has_render_pass = !baked.render_pass().is_null();
            if has_render_pass {
                device.cmd_begin_render_pass(
                    cmd,
                    &GfxRenderPassBegin {
                        render_pass: baked.render_pass(),
                        framebuffer: baked.framebuffer(),
                        render_area: baked.render_area(),
                        clear_values: baked.clear_values().to_vec(),
                    },
                );
            }
            if !baked.pipeline().is_null() {
                device.cmd_bind_pipeline(cmd, baked.bind_point(), baked.pipeline());
                if let Some(descriptor) = baked.descriptor() {
                    device.cmd_bind_descriptor_set(cmd, baked.bind_point(), baked.pipeline_layout(), descriptor.set);
                }
            }

            if let Some(hook) = &entry.decl.hooks.on_render {
                hook(&ctx)?;
            }

            if has_render_pass {
                device.cmd_end_render_pass(cmd);
            }
            device.cmd_end_label(cmd);

            if let Some(hook) = &entry.decl.hooks.after_render {
                hook(&ctx)?;
            }
        }
        Ok(())
    }

    /// 把 output attachment blit 到本帧的 swapchain image
    ///
    /// 之后 output 恢复到每帧开始时的用法，swapchain image 处于 TRANSFER_DST
    pub fn present(&self, frame: &mut RgFrame) -> RgResult<()> {
        let _span = rg_span!("RenderGraph::present");
        let (name, transition) = self.output.as_ref().ok_or(RgError::NoOutputAttachment)?;
        let attachment = self.attachment(name).ok_or_else(|| RgError::UnknownResource { name: name.clone() })?;
        let device = self.device.as_ref();
        let cmd = frame.cmd;
        let image = attachment.image;

        device.cmd_begin_label(cmd, "present", DefaultRenderGraphSettings::PRESENT_LABEL_COLOR);

        let mut to_transfer = GfxBarrierBatch::new();
        to_transfer.image_barriers.push(image_barrier(
            image.handle,
            image.aspect(),
            transition.initial_usage,
            RgUsage::TRANSFER_SRC,
        ));
        to_transfer.image_barriers.push(image_barrier(
            frame.present_image,
            vk::ImageAspectFlags::COLOR,
            frame.present_usage,
            RgUsage::TRANSFER_DST,
        ));
        to_transfer.unify_stages();
        device.cmd_pipeline_barrier(cmd, &to_transfer);

        device.cmd_blit_image(
            cmd,
            &GfxImageBlit {
                src_image: image.handle,
                src_extent: image.extent,
                dst_image: frame.present_image,
                dst_extent: device.surface_extent(),
                aspect: vk::ImageAspectFlags::COLOR,
                filter: vk::Filter::LINEAR,
            },
        );

        let mut restore = GfxBarrierBatch::new();
        restore.image_barriers.push(image_barrier(
            image.handle,
            image.aspect(),
            RgUsage::TRANSFER_SRC,
            transition.final_usage,
        ));
        device.cmd_pipeline_barrier(cmd, &restore);
        device.cmd_end_label(cmd);

        frame.present_usage = RgUsage::TRANSFER_DST;
        Ok(())
    }

    /// 替换一个外部资源，下一次解析时生效；AtBuild 策略的 binding 不受影响
    pub fn set_named(&mut self, name: &str, resource: impl Into<RgResource>) -> RgResult<()> {
        let resource = resource.into();
        match self.imports.get_mut(name) {
            Some(existing) => {
                if existing.kind_name() != resource.kind_name() {
                    return Err(RgError::ResourceKindMismatch {
                        name: name.to_string(),
                        expected: existing.kind_name(),
                    });
                }
                *existing = resource;
                Ok(())
            }
            None if self.attachment_names.contains_key(name) => Err(RgError::AttachmentRedeclared {
                name: name.to_string(),
            }),
            None => Err(RgError::UnknownResource { name: name.to_string() }),
        }
    }
}

// getters
impl RenderGraph {
    pub fn pass(&self, name: &str) -> Option<&RgBakedPass> {
        self.passes.iter().find(|entry| entry.decl.name == name).map(|entry| &entry.baked)
    }

    pub fn pass_barrier(&self, name: &str) -> Option<&RgPassBarrier> {
        self.passes.iter().find(|entry| entry.decl.name == name).map(|entry| &entry.barrier)
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|entry| entry.decl.name.as_str()).collect()
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn attachment(&self, name: &str) -> Option<&RgAttachment> {
        self.attachment_names.get(name).and_then(|handle| self.attachments.get(*handle))
    }

    #[inline]
    pub fn attachment_by_handle(&self, handle: RgAttachmentHandle) -> Option<&RgAttachment> {
        self.attachments.get(handle)
    }

    #[inline]
    pub fn attachment_handle(&self, name: &str) -> Option<RgAttachmentHandle> {
        self.attachment_names.get(name).copied()
    }

    #[inline]
    pub fn transitions(&self) -> &RgTransitionTable {
        &self.table
    }

    #[inline]
    pub fn output_name(&self) -> Option<&str> {
        self.output.as_ref().map(|(name, _)| name.as_str())
    }

    #[inline]
    pub fn output_final_transition(&self) -> Option<RgTransition> {
        self.output.as_ref().map(|(_, transition)| *transition)
    }

    /// 构建时的 surface 大小
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// 首帧的 layout 初始化是否已经录制
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.on_create.is_none()
    }
}

// debug
impl RenderGraph {
    /// 打印执行计划（用于调试）
    ///
    /// 每个 pass 的资源用法转换、barrier 以及烘焙出的 native 对象
    pub fn print_execution_plan(&self) {
        let resolve = self.resolve_table();

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Execution Order: [{}]",
            self.passes.len(),
            self.pass_names().join(" → ")
        );
        log::info!(
            "║ Attachments: [{}]  |  Output: {}",
            self.attachment_names.keys().join(", "),
            self.output_name().unwrap_or("<none>")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (pass_index, entry) in self.passes.iter().enumerate() {
            let baked = &entry.baked;
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Pass: \"{}\"", pass_index + 1, self.passes.len(), baked.name());
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            let transitions = self.table.pass_transitions(pass_index);
            if !transitions.is_empty() {
                log::info!("│ Resources:");
                for (key, transition) in transitions {
                    let marker = if transition.final_usage.is_write() { "✏️ " } else { "📖" };
                    log::info!(
                        "│   {} {}: {} → {}",
                        marker,
                        key,
                        transition.initial_usage,
                        transition.final_usage
                    );
                }
            }

            if !baked.render_pass().is_null() {
                let area = baked.render_area().extent;
                log::info!("│ Render area: {}x{}  |  View mask: {:#b}", area.width, area.height, baked.view_mask());
            }
            if !baked.pipeline().is_null() {
                log::info!(
                    "│ Pipeline: {:?}  |  Descriptor set: {}",
                    baked.bind_point(),
                    if baked.descriptor().is_some() { "yes" } else { "no" }
                );
            }

            if entry.barrier.is_empty() {
                log::info!("│ No barriers required");
            } else {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ Barriers: {}", entry.barrier.entries().len());
                for barrier in entry.barrier.entries() {
                    let from = barrier.transition.initial_usage;
                    let to = barrier.transition.final_usage;
                    match barrier.resource.resolve(&resolve) {
                        Ok(RgResource::Image(_)) => {
                            let (src, dst) = (from.image_state(), to.image_state());
                            log::info!("│   🔒 Image {}:", barrier.key);
                            log::info!("│       Layout: {:?} → {:?}", src.layout, dst.layout);
                            log::info!(
                                "│       Stage:  {} → {}",
                                format_pipeline_stage(src.stage),
                                format_pipeline_stage(dst.stage)
                            );
                            log::info!(
                                "│       Access: {} → {}",
                                format_access_flags(src.src_access()),
                                format_access_flags(dst.access)
                            );
                        }
                        Ok(RgResource::Buffer(_)) => {
                            let (src, dst) = (from.buffer_state(), to.buffer_state());
                            log::info!("│   🔒 Buffer {}:", barrier.key);
                            log::info!(
                                "│       Stage:  {} → {}",
                                format_pipeline_stage(src.stage),
                                format_pipeline_stage(dst.stage)
                            );
                            log::info!(
                                "│       Access: {} → {}",
                                format_access_flags(src.src_access()),
                                format_access_flags(dst.access)
                            );
                        }
                        Err(e) => log::info!("│   🔒 {}: {}", barrier.key, e),
                    }
                }
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        let _span = rg_span!("RenderGraph::drop");
        if let Err(e) = self.device.wait_idle() {
            log::error!("failed to wait for device idle before destroying render graph: {:?}", e);
        }
        let device = self.device.as_ref();
        for entry in &mut self.passes {
            entry.baked.destroy(device);
        }
        for (_, attachment) in self.attachments.drain() {
            device.destroy_image_view(attachment.view);
            device.destroy_image(attachment.image.handle);
        }
        log::debug!("render graph destroyed");
    }
}
