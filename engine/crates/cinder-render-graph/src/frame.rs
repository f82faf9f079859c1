//! Frames in flight
//!
//! 每个 frame slot 拥有一个 command buffer、一个 upload arena 与一个 fence。
//! slot 的状态：Idle -> Recording -> Submitted -> (fence signaled) -> Recording ...
//!
//! `start_frame` 开头的 fence 等待是唯一的背压，同时在 GPU 上的帧不会超过 slot 数量。

use ash::vk;
use cinder_gfx::{
    commands::{barrier::GfxBarrierBatch, submit_info::GfxSubmitInfo},
    device::{GfxDevice, GfxDeviceRef},
};
use itertools::Itertools;

use crate::{
    barrier::image_barrier,
    error::{RgError, RgResult},
    profiling::rg_span,
    settings::RgFrameSettings,
    upload::RgUploadArena,
    usage::RgUsage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RgFrameState {
    #[default]
    Idle,
    Recording,
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgPresentStatus {
    Optimal,
    /// swapchain 仍然可用，但最好重建
    Suboptimal,
}

/// 正在录制的一帧
///
/// 由 [`RgFrameProvider::start_frame`] 创建，必须交还给 [`RgFrameProvider::end_frame`]
pub struct RgFrame {
    pub slot: usize,
    pub frame_id: u64,
    pub cmd: vk::CommandBuffer,
    pub image_index: u32,
    pub present_image: vk::Image,
    /// swapchain image 当前的用法，present 之后变为 TRANSFER_DST
    pub present_usage: RgUsage,
    pub upload: RgUploadArena,
    /// acquire 时得到 suboptimal
    pub suboptimal: bool,
}

impl RgFrame {
    #[inline]
    pub fn name(&self) -> String {
        frame_name(self.frame_id, self.slot)
    }
}

/// 形如 `[F12B]`：frame id 与 slot 标签
pub fn frame_name(frame_id: u64, slot: usize) -> String {
    let label = (b'A' + (slot % 26) as u8) as char;
    format!("[F{}{}]", frame_id, label)
}

struct RgFrameSlot {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    image_available: vk::Semaphore,
    /// 录制期间 arena 被移入 [`RgFrame`]
    upload: Option<RgUploadArena>,
    state: RgFrameState,
}

pub struct RgFrameProvider {
    device: GfxDeviceRef,
    settings: RgFrameSettings,
    slots: Vec<RgFrameSlot>,
    /// 每张 swapchain image 一个
    render_finished: Vec<vk::Semaphore>,
    present_images: Vec<vk::Image>,
    present_usages: Vec<RgUsage>,
    current: usize,
    frame_id: u64,
}

// new & init
impl RgFrameProvider {
    pub fn new(device: GfxDeviceRef, settings: RgFrameSettings) -> RgResult<Self> {
        let _span = rg_span!("RgFrameProvider::new");
        let fif_count = settings.fif_count.max(1);
        if fif_count != settings.fif_count {
            log::warn!("fif_count must be at least 1, got {}", settings.fif_count);
        }

        let mut provider = Self {
            device,
            settings,
            slots: Vec::with_capacity(fif_count),
            render_finished: vec![],
            present_images: vec![],
            present_usages: vec![],
            current: 0,
            frame_id: 0,
        };
        // 中途失败时 Drop 会释放已经创建的对象
        for slot in 0..fif_count {
            provider.create_slot(slot)?;
        }
        provider.create_present_semaphores()?;

        log::info!(
            "frame provider created: {} frame(s) in flight, {} swapchain image(s), {} byte upload arena per frame",
            fif_count,
            provider.present_images.len(),
            settings.upload_arena_size
        );
        Ok(provider)
    }

    fn create_slot(&mut self, slot: usize) -> RgResult<()> {
        let name = frame_name(0, slot);
        let device = &self.device;
        let cmd = device.allocate_command_buffer(&format!("{name}-cmd"))?;
        let fence = match device.create_fence(true, &format!("{name}-fence")) {
            Ok(fence) => fence,
            Err(e) => {
                device.free_command_buffer(cmd);
                return Err(e.into());
            }
        };
        let mut frame_slot = RgFrameSlot {
            cmd,
            fence,
            image_available: vk::Semaphore::null(),
            upload: None,
            state: RgFrameState::Idle,
        };
        let result = device
            .create_semaphore(&format!("{name}-image-available"))
            .map_err(RgError::from)
            .and_then(|semaphore| {
                frame_slot.image_available = semaphore;
                RgUploadArena::new(device.clone(), self.settings.upload_arena_size, &format!("{name}-upload"))
            });
        match result {
            Ok(upload) => {
                frame_slot.upload = Some(upload);
                self.slots.push(frame_slot);
                Ok(())
            }
            Err(e) => {
                Self::destroy_slot(device.as_ref(), frame_slot);
                Err(e)
            }
        }
    }

    fn create_present_semaphores(&mut self) -> RgResult<()> {
        self.present_images = self.device.swapchain_images();
        self.present_usages = vec![RgUsage::UNKNOWN; self.present_images.len()];
        for index in 0..self.present_images.len() {
            let semaphore = self.device.create_semaphore(&format!("swapchain-{index}-render-finished"))?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    fn destroy_present_semaphores(&mut self) {
        for semaphore in self.render_finished.drain(..) {
            self.device.destroy_semaphore(semaphore);
        }
        self.present_images.clear();
        self.present_usages.clear();
    }

    fn destroy_slot(device: &dyn GfxDevice, slot: RgFrameSlot) {
        // arena 自己负责释放 buffer
        drop(slot.upload);
        device.destroy_semaphore(slot.image_available);
        device.destroy_fence(slot.fence);
        device.free_command_buffer(slot.cmd);
    }
}

// 每一帧
impl RgFrameProvider {
    /// 等待当前 slot 的 fence，acquire 下一张 swapchain image，开始录制
    ///
    /// acquire 失败时 fence 保持 signaled，下一次调用不会死锁
    pub fn start_frame(&mut self) -> RgResult<RgFrame> {
        let _span = rg_span!("RgFrameProvider::start_frame");
        let slot_index = self.current;
        let name = frame_name(self.frame_id, slot_index);
        let device = self.device.as_ref();
        let slot = &mut self.slots[slot_index];

        if slot.state == RgFrameState::Recording || slot.upload.is_none() {
            return Err(RgError::InvalidFrameState {
                slot: slot_index,
                detail: "start_frame called while the slot is still recording".to_string(),
            });
        }

        {
            let _span = rg_span!("wait frame fence");
            device.wait_fence(slot.fence, self.settings.fence_timeout_ns)?;
        }
        slot.state = RgFrameState::Idle;

        let acquired = match device.acquire_next_image(slot.image_available, self.settings.acquire_timeout_ns) {
            Ok(acquired) => acquired,
            Err(e) => {
                let e = RgError::from(e);
                if e.requires_rebuild() {
                    log::info!("{} acquire: {}", name, e);
                } else {
                    log::error!("{} acquire failed: {}", name, e);
                }
                return Err(e);
            }
        };
        if acquired.suboptimal {
            log::warn!("{} acquired a suboptimal swapchain image", name);
        }
        let image_index = acquired.image_index as usize;
        let (Some(present_image), Some(present_usage)) =
            (self.present_images.get(image_index).copied(), self.present_usages.get(image_index).copied())
        else {
            return Err(RgError::InvalidFrameState {
                slot: slot_index,
                detail: format!("acquired image index {} is out of range", image_index),
            });
        };

        device.reset_fence(slot.fence)?;
        let begun = device.begin_command_buffer(slot.cmd).map_err(RgError::from).and_then(|_| {
            slot.upload.take().ok_or_else(|| RgError::InvalidFrameState {
                slot: slot_index,
                detail: "upload arena is missing".to_string(),
            })
        });
        let upload = match begun {
            Ok(upload) => upload,
            Err(e) => {
                Self::release_unsubmitted_slot(device, slot, &name);
                return Err(e);
            }
        };
        slot.state = RgFrameState::Recording;
        log::trace!("{} started on swapchain image {}", name, image_index);

        Ok(RgFrame {
            slot: slot_index,
            frame_id: self.frame_id,
            cmd: slot.cmd,
            image_index: acquired.image_index,
            present_image,
            present_usage,
            upload,
            suboptimal: acquired.suboptimal,
        })
    }

    /// 结束录制、提交并 present，然后轮转到下一个 slot
    ///
    /// 提交之前失败时 slot 回到 Idle 并且 fence 重新 signaled；arena 在任何情况下都会归还
    pub fn end_frame(&mut self, frame: RgFrame) -> RgResult<RgPresentStatus> {
        let _span = rg_span!("RgFrameProvider::end_frame");
        if frame.slot != self.current || self.slots[frame.slot].state != RgFrameState::Recording {
            return Err(RgError::InvalidFrameState {
                slot: frame.slot,
                detail: format!("{} is not the frame being recorded", frame.name()),
            });
        }

        let result = self.submit_and_present(&frame);
        let name = frame.name();
        let device = self.device.as_ref();
        let slot = &mut self.slots[frame.slot];
        slot.upload = Some(frame.upload);
        if result.is_err() && slot.state == RgFrameState::Recording {
            Self::release_unsubmitted_slot(device, slot, &name);
        }
        let suboptimal = result? || frame.suboptimal;
        Ok(if suboptimal { RgPresentStatus::Suboptimal } else { RgPresentStatus::Optimal })
    }

    /// fence 已经 reset 但这一帧没有提交
    ///
    /// 用一次空提交等待 `image_available` 并 signal fence，slot 回到 Idle。
    /// 空提交也失败时重新创建一个 signaled 的 fence
    fn release_unsubmitted_slot(device: &dyn GfxDevice, slot: &mut RgFrameSlot, name: &str) {
        slot.state = RgFrameState::Idle;
        let submit = GfxSubmitInfo::new(&[]).wait(slot.image_available, vk::PipelineStageFlags2::ALL_COMMANDS);
        let Err(e) = device.queue_submit(&submit, slot.fence) else {
            log::warn!("{} dropped before submit, fence signaled by an empty submit", name);
            return;
        };
        log::error!("{} empty submit failed: {:?}, recreating the fence", name, e);
        match device.create_fence(true, &format!("{name}-fence")) {
            Ok(fence) => {
                device.destroy_fence(std::mem::replace(&mut slot.fence, fence));
            }
            Err(e) => log::error!("{} failed to recreate the fence: {:?}", name, e),
        }
    }

    /// 返回 present 是否 suboptimal
    fn submit_and_present(&mut self, frame: &RgFrame) -> RgResult<bool> {
        let device = self.device.as_ref();
        let slot = &mut self.slots[frame.slot];

        let mut batch = GfxBarrierBatch::new();
        batch.image_barriers.push(image_barrier(
            frame.present_image,
            vk::ImageAspectFlags::COLOR,
            frame.present_usage,
            RgUsage::PRESENT,
        ));
        device.cmd_pipeline_barrier(frame.cmd, &batch);
        device.end_command_buffer(frame.cmd)?;
        frame.upload.flush_and_reset()?;

        let image_index = frame.image_index as usize;
        let render_finished =
            self.render_finished.get(image_index).copied().ok_or_else(|| RgError::InvalidFrameState {
                slot: frame.slot,
                detail: format!("swapchain image {} has no semaphore", image_index),
            })?;
        let submit = GfxSubmitInfo::new(&[frame.cmd])
            .wait(slot.image_available, vk::PipelineStageFlags2::ALL_COMMANDS)
            .signal(render_finished, vk::PipelineStageFlags2::ALL_COMMANDS);
        device.queue_submit(&submit, slot.fence)?;
        slot.state = RgFrameState::Submitted;
        self.present_usages[image_index] = RgUsage::PRESENT;

        self.current = (self.current + 1) % self.slots.len();
        self.frame_id += 1;

        match device.queue_present(frame.image_index, render_finished) {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("{} presented to a suboptimal swapchain", frame.name());
                }
                Ok(suboptimal)
            }
            Err(e) => {
                let e = RgError::from(e);
                log::info!("{} present: {}", frame.name(), e);
                Err(e)
            }
        }
    }

    /// swapchain 重建之后调用：等待设备空闲，重新创建每张 image 的信号量
    pub fn on_swapchain_recreated(&mut self) -> RgResult<()> {
        let _span = rg_span!("RgFrameProvider::on_swapchain_recreated");
        self.device.wait_idle()?;
        self.destroy_present_semaphores();
        self.create_present_semaphores()?;
        log::info!("frame provider rebound to {} swapchain image(s)", self.present_images.len());
        Ok(())
    }

    /// 等待设备空闲后释放全部对象，可以重复调用
    pub fn destroy(&mut self) {
        if self.slots.is_empty() && self.render_finished.is_empty() {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            log::error!("failed to wait for device idle before destroying frames: {:?}", e);
        }
        self.destroy_present_semaphores();
        for slot in std::mem::take(&mut self.slots) {
            Self::destroy_slot(self.device.as_ref(), slot);
        }
        log::debug!("frame provider destroyed");
    }
}

// getters
impl RgFrameProvider {
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// 下一帧的名字
    #[inline]
    pub fn frame_name(&self) -> String {
        frame_name(self.frame_id, self.current)
    }

    pub fn slot_states(&self) -> Vec<RgFrameState> {
        self.slots.iter().map(|slot| slot.state).collect_vec()
    }

    #[inline]
    pub fn settings(&self) -> &RgFrameSettings {
        &self.settings
    }
}

impl Drop for RgFrameProvider {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use cinder_gfx::device::headless::{GfxObjectKind, HeadlessDevice, RecordedCommand};

    use super::*;

    fn setup(fif_count: usize) -> (Rc<HeadlessDevice>, RgFrameProvider) {
        let device = Rc::new(HeadlessDevice::new(vk::Extent2D {
            width: 640,
            height: 480,
        }));
        let settings = RgFrameSettings {
            fif_count,
            upload_arena_size: 1024,
            ..Default::default()
        };
        let provider = RgFrameProvider::new(device.clone(), settings).unwrap();
        (device, provider)
    }

    #[test]
    fn test_frame_name() {
        assert_eq!(frame_name(0, 0), "[F0A]");
        assert_eq!(frame_name(12, 1), "[F12B]");
    }

    #[test]
    fn test_round_robin() {
        let (device, mut provider) = setup(2);
        let mut slots = vec![];
        for _ in 0..5 {
            let frame = provider.start_frame().unwrap();
            slots.push(frame.slot);
            assert_eq!(provider.end_frame(frame).unwrap(), RgPresentStatus::Optimal);
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(provider.frame_id(), 5);
        assert_eq!(device.submissions().len(), 5);
        assert_eq!(device.presents().iter().map(|(index, _)| *index).collect_vec(), vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_slot_states() {
        let (device, mut provider) = setup(2);
        assert_eq!(provider.slot_states(), vec![RgFrameState::Idle, RgFrameState::Idle]);

        let frame = provider.start_frame().unwrap();
        assert_eq!(provider.slot_states(), vec![RgFrameState::Recording, RgFrameState::Idle]);
        // 录制期间 fence 已经被 reset
        let fence = provider.slots[0].fence;
        assert_eq!(device.fence_signaled(fence), Some(false));

        provider.end_frame(frame).unwrap();
        assert_eq!(provider.slot_states(), vec![RgFrameState::Submitted, RgFrameState::Idle]);
        assert_eq!(device.fence_signaled(fence), Some(true));
        assert!(provider.slot_states().iter().filter(|s| **s == RgFrameState::Submitted).count() <= 2);
    }

    #[test]
    fn test_end_frame_transitions_present_image() {
        let (device, mut provider) = setup(1);
        let frame = provider.start_frame().unwrap();
        let cmd = frame.cmd;
        let present_image = frame.present_image;
        frame.upload.write(&[1, 2, 3, 4], 4).unwrap();
        provider.end_frame(frame).unwrap();

        let commands = device.commands(cmd);
        let Some(RecordedCommand::Barrier(batch)) = commands.last() else {
            panic!("expected a barrier at the end of the frame");
        };
        let barrier = batch.image_barriers[0].inner();
        assert_eq!(barrier.image, present_image);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        // arena 被 flush 并归还
        assert_eq!(device.flushes().len(), 1);
        assert_eq!(provider.slots[0].upload.as_ref().map(|arena| arena.used()), Some(0));

        // 同一张 image 第二次被使用时从 PRESENT 开始
        for _ in 0..2 {
            let frame = provider.start_frame().unwrap();
            provider.end_frame(frame).unwrap();
        }
        let frame = provider.start_frame().unwrap();
        assert_eq!(frame.image_index, 0);
        assert_eq!(frame.present_usage, RgUsage::PRESENT);
        provider.end_frame(frame).unwrap();
    }

    #[test]
    fn test_out_of_date_acquire_keeps_fence_signaled() {
        let (device, mut provider) = setup(2);
        device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        let err = provider.start_frame().err();
        assert_eq!(err, Some(RgError::SurfaceOutOfDate));
        assert_eq!(device.fence_signaled(provider.slots[0].fence), Some(true));
        assert_eq!(provider.slot_states(), vec![RgFrameState::Idle, RgFrameState::Idle]);

        device.set_surface_extent(vk::Extent2D {
            width: 320,
            height: 240,
        });
        provider.on_swapchain_recreated().unwrap();
        let frame = provider.start_frame().unwrap();
        assert_eq!(frame.slot, 0);
        provider.end_frame(frame).unwrap();
    }

    #[test]
    fn test_failure_before_submit_releases_fence() {
        let (device, mut provider) = setup(2);
        let frame = provider.start_frame().unwrap();
        let fence = provider.slots[0].fence;
        let image_available = provider.slots[0].image_available;
        // 提前结束录制，end_frame 中的 end_command_buffer 失败
        device.end_command_buffer(frame.cmd).unwrap();
        assert_eq!(provider.end_frame(frame).err(), Some(RgError::Vulkan(vk::Result::ERROR_VALIDATION_FAILED_EXT)));

        assert_eq!(device.fence_signaled(fence), Some(true));
        assert_eq!(provider.slot_states(), vec![RgFrameState::Idle, RgFrameState::Idle]);
        assert_eq!(provider.current_slot(), 0);
        let submissions = device.submissions();
        let (empty_submit, submit_fence) = submissions.last().unwrap();
        assert!(empty_submit.command_buffers.is_empty());
        assert_eq!(empty_submit.wait_infos[0].semaphore, image_available);
        assert_eq!(*submit_fence, fence);

        // slot 可以继续使用
        for _ in 0..3 {
            let frame = provider.start_frame().unwrap();
            provider.end_frame(frame).unwrap();
        }
        assert_eq!(provider.frame_id(), 3);
    }

    #[test]
    fn test_present_status() {
        let (device, mut provider) = setup(2);

        device.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        let frame = provider.start_frame().unwrap();
        assert!(frame.suboptimal);
        assert_eq!(provider.end_frame(frame).unwrap(), RgPresentStatus::Suboptimal);

        device.push_present_result(vk::Result::SUBOPTIMAL_KHR);
        let frame = provider.start_frame().unwrap();
        assert_eq!(provider.end_frame(frame).unwrap(), RgPresentStatus::Suboptimal);

        device.push_present_result(vk::Result::ERROR_SURFACE_LOST_KHR);
        let frame = provider.start_frame().unwrap();
        assert_eq!(provider.end_frame(frame).err(), Some(RgError::SurfaceLost));
        // 已经提交，slot 依然轮转
        assert_eq!(provider.current_slot(), 1);
        assert_eq!(provider.frame_id(), 3);
    }

    #[test]
    fn test_start_frame_twice_is_rejected() {
        let (_device, mut provider) = setup(1);
        let frame = provider.start_frame().unwrap();
        assert!(matches!(provider.start_frame(), Err(RgError::InvalidFrameState { slot: 0, .. })));
        provider.end_frame(frame).unwrap();
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (device, mut provider) = setup(3);
        let frame = provider.start_frame().unwrap();
        provider.end_frame(frame).unwrap();
        provider.destroy();
        provider.destroy();
        drop(provider);

        for kind in [GfxObjectKind::CommandBuffer, GfxObjectKind::Fence, GfxObjectKind::Semaphore, GfxObjectKind::Buffer]
        {
            assert_eq!(device.live_count(kind), 0, "{:?}", kind);
        }
    }

    #[test]
    fn test_partial_creation_is_released() {
        let device = Rc::new(HeadlessDevice::new(vk::Extent2D {
            width: 64,
            height: 64,
        }));
        // 第一个 slot 的 fence 创建失败
        device.fail_next_create(GfxObjectKind::Fence, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let result = RgFrameProvider::new(device.clone(), RgFrameSettings::default());
        assert_eq!(result.err(), Some(RgError::OutOfDeviceMemory));
        for kind in [GfxObjectKind::CommandBuffer, GfxObjectKind::Fence, GfxObjectKind::Semaphore, GfxObjectKind::Buffer]
        {
            assert_eq!(device.live_count(kind), 0, "{:?}", kind);
        }
    }
}
