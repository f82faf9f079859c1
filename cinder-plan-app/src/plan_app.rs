//! 在 [`HeadlessDevice`] 上运行示例渲染图
//!
//! 第 3 帧之后模拟一次窗口大小变化：acquire 返回 out-of-date，重建 swapchain 相关对象与整张图。

use std::rc::Rc;

use ash::vk;
use cinder_gfx::device::headless::HeadlessDevice;
use cinder_render_graph::{
    RenderGraph, RgPresentStatus, descriptor_cache::RgDescriptorLayoutCache, frame::RgFrameProvider,
    settings::RgFrameSettings,
};

use crate::passes::{FRAME_UNIFORMS, FrameUniforms, declare_graph};

const INITIAL_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1280,
    height: 720,
};
const RESIZED_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1920,
    height: 1080,
};
const RESIZE_AT_FRAME: u64 = 3;
const UNIFORM_ALIGNMENT: vk::DeviceSize = 256;

pub struct PlanApp {
    device: Rc<HeadlessDevice>,
    /// graph 在 cache 之前 drop
    graph: Option<RenderGraph>,
    descriptor_cache: RgDescriptorLayoutCache,
    frames: RgFrameProvider,
    resized: bool,
}

impl PlanApp {
    pub fn new() -> anyhow::Result<Self> {
        let device = Rc::new(HeadlessDevice::with_swapchain(
            INITIAL_EXTENT,
            vk::Format::B8G8R8A8_SRGB,
            3,
        ));
        let frames = RgFrameProvider::new(device.clone(), RgFrameSettings::default())?;
        let mut app = Self {
            device,
            graph: None,
            descriptor_cache: RgDescriptorLayoutCache::new(),
            frames,
            resized: false,
        };
        app.rebuild_graph()?;
        Ok(app)
    }

    fn rebuild_graph(&mut self) -> anyhow::Result<()> {
        // 旧的 graph 先释放，再构建新的
        self.graph = None;
        let graph = declare_graph()?.build(self.device.clone(), &mut self.descriptor_cache)?;
        log::info!(
            "graph built for {}x{}, descriptor cache holds {} layout(s)",
            graph.extent().width,
            graph.extent().height,
            self.descriptor_cache.len()
        );
        self.graph = Some(graph);
        Ok(())
    }

    pub fn print_plan(&self) {
        if let Some(graph) = &self.graph {
            graph.print_execution_plan();
        }
    }

    pub fn run(&mut self, frame_count: u64) -> anyhow::Result<()> {
        while self.frames.frame_id() < frame_count {
            if self.frames.frame_id() == RESIZE_AT_FRAME && !self.resized {
                self.resized = true;
                self.device.set_surface_extent(RESIZED_EXTENT);
                self.device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
            }

            match self.draw_frame() {
                Ok(RgPresentStatus::Optimal) => {}
                Ok(RgPresentStatus::Suboptimal) => self.on_resize()?,
                Err(e) if e.requires_rebuild() => {
                    log::info!("{}: {}, rebuilding", self.frames.frame_name(), e);
                    self.on_resize()?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        log::info!(
            "ran {} frame(s): {} submission(s), {} present(s)",
            self.frames.frame_id(),
            self.device.submissions().len(),
            self.device.presents().len()
        );
        Ok(())
    }

    fn on_resize(&mut self) -> anyhow::Result<()> {
        self.frames.on_swapchain_recreated()?;
        self.rebuild_graph()?;
        self.descriptor_cache.collect_retired(self.device.as_ref());
        Ok(())
    }

    fn draw_frame(&mut self) -> cinder_render_graph::RgResult<RgPresentStatus> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(RgPresentStatus::Optimal);
        };

        let mut frame = self.frames.start_frame()?;
        let extent = graph.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let uniforms = FrameUniforms {
            view_proj: glam::Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0)
                * glam::Mat4::look_at_rh(glam::vec3(0.0, 2.0, 5.0), glam::Vec3::ZERO, glam::Vec3::Y),
            light_pos: glam::vec4(2.0, 4.0, 2.0, 1.0),
            time: frame.frame_id as f32 / 60.0,
            _padding: [0.0; 3],
        };

        let recorded = frame
            .upload
            .write_pod(&uniforms, UNIFORM_ALIGNMENT)
            .and_then(|allocation| graph.set_named(FRAME_UNIFORMS, allocation.as_resource()))
            .and_then(|_| graph.execute(&frame))
            .and_then(|_| graph.present(&mut frame));
        let status = self.frames.end_frame(frame);
        recorded?;

        log::debug!("{} done", self.frames.frame_name());
        status
    }
}

impl Drop for PlanApp {
    fn drop(&mut self) {
        self.graph = None;
        self.descriptor_cache.destroy(self.device.as_ref());
    }
}
