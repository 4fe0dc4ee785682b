use std::sync::atomic::AtomicU32;

use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::errors::ShmqError;

/// Size in bytes of the fixed region header.
pub const HEADER_SIZE: usize = 80;
/// Size in bytes of one frame header (the u32 frame length).
pub const FRAME_HEADER_SIZE: usize = 4;
/// Max size in bytes for the region name, including padding.
pub const MAX_NAME_SIZE: usize = 64;
/// Upper bound for the whole region, matching the historical queue limit.
pub const MAX_REGION_SIZE: u32 = 2_000_000_000;
/// Frame length marking "no more frames before the end of the region".
pub const SENTINEL_FRAME_LEN: u32 = u32::MAX;

const OFFSET_HEAD: usize = 0;
const OFFSET_TAIL: usize = 4;
const OFFSET_REGION_SIZE: usize = 8;
const OFFSET_FRAME_MAX: usize = 12;
const OFFSET_NAME: usize = 16;

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ShmqConfig {
    /// Directory holding the file link to the shared region.
    pub data_dir: String,
    /// Region name, stored in the header. Must be shorter than `MAX_NAME_SIZE`.
    pub name: String,
    /// Usable circular-buffer capacity in bytes, header excluded.
    pub capacity: u32,
    /// Largest payload accepted by a single `push`.
    pub max_payload_size: u32,
}

impl ShmqConfig {
    pub fn link_path(&self) -> String {
        format!("{}/{}", self.data_dir, self.name)
    }
}

/// Creates the named shared region and returns the raw mapping.
///
/// Fails if the link already exists, if the name does not fit the header,
/// or if the capacity cannot hold one frame of `max_payload_size` bytes.
pub fn create_region(cfg: &ShmqConfig) -> Result<Shmem, ShmqError> {
    if cfg.name.len() >= MAX_NAME_SIZE {
        return Err(ShmqError::NameTooLong(cfg.name.clone()));
    }
    let required = cfg.max_payload_size + FRAME_HEADER_SIZE as u32;
    if cfg.max_payload_size == 0 || cfg.capacity < required {
        return Err(ShmqError::CapacityTooSmall {
            capacity: cfg.capacity,
            required,
        });
    }
    if cfg.capacity >= MAX_REGION_SIZE {
        return Err(ShmqError::Logic(format!(
            "capacity {} exceeds the region limit {}",
            cfg.capacity, MAX_REGION_SIZE
        )));
    }

    let size = HEADER_SIZE + cfg.capacity as usize;
    match ShmemConf::new().size(size).flink(cfg.link_path()).create() {
        Ok(mut shmem) => {
            // The region must outlive this handle; deletion is explicit
            // through RingBuffer::destroy only.
            shmem.set_owner(false);
            Ok(shmem)
        }
        Err(ShmemError::LinkExists) => Err(ShmqError::AlreadyExists(cfg.name.clone())),
        Err(e) => Err(ShmqError::SharedMemory(e)),
    }
}

/// Maps an existing region previously set up by `create_region`.
pub fn open_region(cfg: &ShmqConfig) -> Result<Shmem, ShmqError> {
    let shmem = ShmemConf::new().flink(cfg.link_path()).open()?;
    if shmem.len() < HEADER_SIZE {
        return Err(ShmqError::Logic(format!(
            "region {} is smaller than the fixed header ({} < {})",
            cfg.name,
            shmem.len(),
            HEADER_SIZE
        )));
    }
    Ok(shmem)
}

/// Accessor over the fixed-layout region header.
///
/// `head` and `tail` are the only mutable fields; each is written by
/// exactly one side of the queue and read through atomics so the writes
/// are visible across every mapping of the region.
pub(crate) struct Header {
    base: *mut u8,
}

impl Header {
    /// Safety: `base` must point to at least `HEADER_SIZE` bytes that stay
    /// mapped for the lifetime of the `Header`, 4-byte aligned.
    pub(crate) unsafe fn from_base(base: *mut u8) -> Header {
        Header { base }
    }

    pub(crate) fn init(&self, region_size: u32, frame_max: u32, name: &str) {
        debug_assert!(name.len() < MAX_NAME_SIZE);
        self.write_u32(OFFSET_REGION_SIZE, region_size);
        self.write_u32(OFFSET_FRAME_MAX, frame_max);
        unsafe {
            let dst = self.base.add(OFFSET_NAME);
            std::ptr::write_bytes(dst, 0, MAX_NAME_SIZE);
            std::ptr::copy_nonoverlapping(name.as_ptr(), dst, name.len());
        }
        self.head().store(HEADER_SIZE as u32, std::sync::atomic::Ordering::Release);
        self.tail().store(HEADER_SIZE as u32, std::sync::atomic::Ordering::Release);
    }

    #[inline]
    pub(crate) fn head(&self) -> &AtomicU32 {
        unsafe { &*(self.base.add(OFFSET_HEAD) as *const AtomicU32) }
    }

    #[inline]
    pub(crate) fn tail(&self) -> &AtomicU32 {
        unsafe { &*(self.base.add(OFFSET_TAIL) as *const AtomicU32) }
    }

    #[inline]
    pub(crate) fn region_size(&self) -> u32 {
        self.read_u32(OFFSET_REGION_SIZE)
    }

    #[inline]
    pub(crate) fn frame_max(&self) -> u32 {
        self.read_u32(OFFSET_FRAME_MAX)
    }

    pub(crate) fn name(&self) -> String {
        let bytes = unsafe { std::slice::from_raw_parts(self.base.add(OFFSET_NAME), MAX_NAME_SIZE) };
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_SIZE);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Reads the frame length stored at `offset`. Frame offsets are not
    /// aligned, so the read goes through `read_unaligned`.
    #[inline]
    pub(crate) fn frame_len_at(&self, offset: u32) -> u32 {
        let v = unsafe { std::ptr::read_unaligned(self.base.add(offset as usize) as *const u32) };
        u32::from_le(v)
    }

    #[inline]
    pub(crate) fn set_frame_len_at(&self, offset: u32, len: u32) {
        unsafe {
            std::ptr::write_unaligned(self.base.add(offset as usize) as *mut u32, len.to_le());
        }
    }

    #[inline]
    pub(crate) fn payload_ptr(&self, frame_offset: u32) -> *mut u8 {
        unsafe { self.base.add(frame_offset as usize + FRAME_HEADER_SIZE) }
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        let v = unsafe { std::ptr::read_unaligned(self.base.add(offset) as *const u32) };
        u32::from_le(v)
    }

    #[inline]
    fn write_u32(&self, offset: usize, value: u32) {
        unsafe {
            std::ptr::write_unaligned(self.base.add(offset) as *mut u32, value.to_le());
        }
    }
}
