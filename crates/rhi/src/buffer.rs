//! GPU buffers backed by upload-heap memory.
//!
//! Vertex and index data in this design is written once at startup and
//! never touched again, so buffers live in CPU-writable, GPU-readable
//! memory sized exactly to the payload. The allocator keeps the mapping for
//! the lifetime of the allocation and releases it with the allocation on
//! every exit path.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex data source for the input assembler.
    Vertex,
    /// Index data source for indexed draws.
    Index,
}

impl BufferKind {
    /// Vulkan usage flags for this kind.
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Vertex => "vertex",
            BufferKind::Index => "index",
        }
    }
}

/// Validates a write against the buffer bounds.
pub fn check_write_bounds(offset: u64, len: u64, size: u64) -> RhiResult<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| RhiError::InvalidState("buffer write range overflows".to_string()))?;
    if end > size {
        return Err(RhiError::InvalidState(format!(
            "write of {} byte(s) at offset {} exceeds buffer size {}",
            len, offset, size
        )));
    }
    Ok(())
}

/// A GPU buffer with its upload-heap allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    kind: BufferKind,
}

impl Buffer {
    /// Creates an upload-heap buffer of exactly `size` bytes.
    pub fn new(device: Arc<Device>, kind: BufferKind, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidState(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage_flags())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: kind.name(),
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("created {} buffer ({} byte(s))", kind.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            kind,
        })
    }

    /// Creates a buffer sized to `data` and uploads it.
    pub fn new_with_data(device: Arc<Device>, kind: BufferKind, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, kind, data.len() as vk::DeviceSize)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the buffer at `offset` through the persistent
    /// CPU-visible mapping, bounds-checked.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_write_bounds(offset, data.len() as u64, self.size)?;

        let allocation = self
            .allocation
            .as_ref()
            .ok_or_else(|| RhiError::InvalidState("buffer allocation gone".to_string()))?;
        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidState("buffer memory not mapped".to_string()))?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Returns the buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer kind.
    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("failed to free {} buffer allocation: {:?}", self.kind.name(), e);
            }
        }
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("destroyed {} buffer", self.kind.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_match_kind() {
        assert_eq!(
            BufferKind::Vertex.usage_flags(),
            vk::BufferUsageFlags::VERTEX_BUFFER
        );
        assert_eq!(
            BufferKind::Index.usage_flags(),
            vk::BufferUsageFlags::INDEX_BUFFER
        );
    }

    #[test]
    fn write_bounds_accept_exact_fit() {
        assert!(check_write_bounds(0, 64, 64).is_ok());
        assert!(check_write_bounds(16, 48, 64).is_ok());
    }

    #[test]
    fn write_bounds_reject_overrun() {
        assert!(check_write_bounds(0, 65, 64).is_err());
        assert!(check_write_bounds(60, 8, 64).is_err());
    }

    #[test]
    fn write_bounds_reject_overflowing_range() {
        assert!(check_write_bounds(u64::MAX, 2, 64).is_err());
    }
}
