//! 每帧的线性上传区
//!
//! 一块持久映射的 host buffer，帧内按对齐线性分配，帧结束时 flush 并整体回收。

use std::cell::Cell;

use ash::vk;
use cinder_gfx::{device::GfxDeviceRef, resources::buffer::GfxHostBuffer};

use crate::{
    error::{RgError, RgResult},
    resource::{RgBuffer, RgResource},
};

/// upload arena 中的一段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgUploadAllocation {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl RgUploadAllocation {
    /// 作为 uniform / storage buffer 绑定
    #[inline]
    pub fn as_resource(&self) -> RgResource {
        RgResource::Buffer(RgBuffer {
            handle: self.buffer,
            offset: self.offset,
            size: self.size,
        })
    }
}

pub struct RgUploadArena {
    device: GfxDeviceRef,
    buffer: GfxHostBuffer,
    offset: Cell<vk::DeviceSize>,
}

impl RgUploadArena {
    pub fn new(device: GfxDeviceRef, size: vk::DeviceSize, name: &str) -> RgResult<Self> {
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC;
        let buffer = device.create_host_buffer(size, usage, name)?;
        Ok(Self {
            device,
            buffer,
            offset: Cell::new(0),
        })
    }

    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle
    }

    #[inline]
    pub fn capacity(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    #[inline]
    pub fn used(&self) -> vk::DeviceSize {
        self.offset.get()
    }

    /// `align` 必须是 2 的幂，0 视为 1
    pub fn alloc(&self, size: vk::DeviceSize, align: vk::DeviceSize) -> RgResult<RgUploadAllocation> {
        let align = align.max(1);
        if !align.is_power_of_two() {
            return Err(RgError::InvalidUploadAlignment { align });
        }
        let used = self.offset.get();
        let range = used
            .checked_next_multiple_of(align)
            .and_then(|offset| Some((offset, offset.checked_add(size)?)))
            .filter(|(_, end)| *end <= self.buffer.size);
        let Some((offset, end)) = range else {
            return Err(RgError::UploadArenaExhausted {
                requested: size,
                used,
                capacity: self.buffer.size,
            });
        };
        self.offset.set(end);
        Ok(RgUploadAllocation {
            buffer: self.buffer.handle,
            offset,
            size,
        })
    }

    pub fn write(&self, data: &[u8], align: vk::DeviceSize) -> RgResult<RgUploadAllocation> {
        let allocation = self.alloc(data.len() as vk::DeviceSize, align)?;
        self.device.write_host_buffer(allocation.buffer, allocation.offset, data)?;
        Ok(allocation)
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T, align: vk::DeviceSize) -> RgResult<RgUploadAllocation> {
        self.write(bytemuck::bytes_of(value), align)
    }

    /// 帧结束时调用：flush 已写入的范围并回收全部空间
    pub fn flush_and_reset(&self) -> RgResult<()> {
        let used = self.offset.get();
        if used > 0 {
            self.device.flush_host_buffer(self.buffer.handle, 0, used)?;
        }
        self.offset.set(0);
        Ok(())
    }
}

impl Drop for RgUploadArena {
    fn drop(&mut self) {
        self.device.destroy_host_buffer(self.buffer.handle);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use cinder_gfx::device::headless::{GfxObjectKind, HeadlessDevice};

    use super::*;

    fn arena(size: vk::DeviceSize) -> (Rc<HeadlessDevice>, RgUploadArena) {
        let device = Rc::new(HeadlessDevice::new(vk::Extent2D {
            width: 4,
            height: 4,
        }));
        let arena = RgUploadArena::new(device.clone(), size, "upload").unwrap();
        (device, arena)
    }

    #[test]
    fn test_alloc_respects_alignment() {
        let (_device, arena) = arena(1024);
        let a = arena.alloc(10, 4).unwrap();
        let b = arena.alloc(16, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(arena.used(), 272);
    }

    #[test]
    fn test_exhaustion() {
        let (_device, arena) = arena(64);
        arena.alloc(48, 1).unwrap();
        assert_eq!(
            arena.alloc(32, 1),
            Err(RgError::UploadArenaExhausted {
                requested: 32,
                used: 48,
                capacity: 64
            })
        );
        // 失败的分配不改变状态
        assert_eq!(arena.used(), 48);

        // 溢出同样视为耗尽
        assert!(matches!(arena.alloc(u64::MAX, 16), Err(RgError::UploadArenaExhausted { .. })));
        assert!(matches!(arena.alloc(1, 1 << 63), Err(RgError::UploadArenaExhausted { .. })));
        assert_eq!(arena.used(), 48);
    }

    #[test]
    fn test_invalid_alignment() {
        let (_device, arena) = arena(64);
        arena.alloc(3, 1).unwrap();
        assert_eq!(arena.alloc(4, 12), Err(RgError::InvalidUploadAlignment { align: 12 }));
        assert_eq!(arena.used(), 3);
        // 0 视为 1
        assert_eq!(arena.alloc(4, 0).unwrap().offset, 3);
    }

    #[test]
    fn test_write_flush_and_reset() {
        let (device, arena) = arena(256);
        let allocation = arena.write_pod(&[1.0f32, 2.0, 3.0, 4.0], 16).unwrap();
        arena.write(&[7u8; 3], 1).unwrap();

        let contents = device.buffer_contents(arena.buffer()).unwrap();
        let start = allocation.offset as usize;
        assert_eq!(&contents[start..start + 16], bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(&contents[16..19], &[7, 7, 7]);

        arena.flush_and_reset().unwrap();
        assert_eq!(arena.used(), 0);
        assert_eq!(device.flushes(), vec![(arena.buffer(), 0, 19)]);

        // 空的 arena 不 flush
        arena.flush_and_reset().unwrap();
        assert_eq!(device.flushes().len(), 1);
    }

    #[test]
    fn test_drop_releases_buffer() {
        let (device, arena) = arena(64);
        assert_eq!(device.live_count(GfxObjectKind::Buffer), 1);
        drop(arena);
        assert_eq!(device.live_count(GfxObjectKind::Buffer), 0);
    }
}
