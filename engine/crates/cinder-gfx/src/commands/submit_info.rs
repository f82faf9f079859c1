use ash::vk;
use itertools::Itertools;

/// 一次 queue submit 的描述
///
/// 只保存 handle，真正的 `vk::SubmitInfo2` 在提交时由后端组装
#[derive(Clone, Debug, Default)]
pub struct GfxSubmitInfo {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    pub signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: commands.to_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_infos.push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore).stage_mask(stage));
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.signal_infos.push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore).stage_mask(stage));
        self
    }

    /// 组装 ash 需要的 command buffer 信息，生命周期由调用者持有
    #[inline]
    pub fn command_buffer_infos(&self) -> Vec<vk::CommandBufferSubmitInfo<'static>> {
        self.command_buffers
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            .collect_vec()
    }
}
