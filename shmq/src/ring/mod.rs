//! Single-producer / single-consumer circular queue over a shared mapping.
//!
//! The queue stores length-prefixed frames back to back. When the tail
//! reaches a point where the next frame would not fit contiguously, the
//! producer writes a sentinel frame (length `u32::MAX`) and wraps to the
//! first byte after the header; the consumer performs the matching wrap
//! before reading. `head` is written only by the consumer and `tail` only
//! by the producer, so no lock is needed: cross-mapping visibility of the
//! two atomic offsets is the whole synchronization story.
//!
//! The contract is strictly one producer and one consumer, no matter
//! whether they live in the same thread, different threads or different
//! processes. Concurrent pushes from two handles (or concurrent pops) are
//! undefined behavior by design.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use shared_memory::Shmem;

use crate::core::{
    create_region, open_region, Header, ShmqConfig, FRAME_HEADER_SIZE, HEADER_SIZE,
    SENTINEL_FRAME_LEN,
};
use crate::errors::ShmqError;

/// Bounded busy-wait policy: `push` gives up after this many attempts
/// rather than blocking behind a lagging consumer.
const WAIT_RETRIES: u32 = 10;

#[cfg(unix)]
const WAIT_DELAY: Duration = Duration::from_micros(5);
#[cfg(not(unix))]
const WAIT_DELAY: Duration = Duration::from_millis(1);

pub struct RingBuffer {
    shmem: Shmem,
    header: Header,
}

// One RingBuffer handle is one side of the queue; push/pop take &mut self,
// so a handle can move to the thread that plays its role but can never be
// shared between two.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Allocates and initializes the named shared region.
    ///
    /// Fails if the name is already in use, too long for the header, or if
    /// `capacity` cannot hold one frame of `max_payload_size` bytes.
    pub fn create(cfg: &ShmqConfig) -> Result<RingBuffer, ShmqError> {
        let shmem = create_region(cfg)?;
        let header = unsafe { Header::from_base(shmem.as_ptr()) };
        header.init(
            (HEADER_SIZE + cfg.capacity as usize) as u32,
            cfg.max_payload_size + FRAME_HEADER_SIZE as u32,
            &cfg.name,
        );
        Ok(RingBuffer { shmem, header })
    }

    /// Maps a region previously set up by [`RingBuffer::create`].
    ///
    /// `create` must have completed before `attach` is called; attaching to
    /// a half-initialized region is a caller contract violation.
    pub fn attach(cfg: &ShmqConfig) -> Result<RingBuffer, ShmqError> {
        let shmem = open_region(cfg)?;
        let header = unsafe { Header::from_base(shmem.as_ptr()) };
        if header.name() != cfg.name {
            return Err(ShmqError::Logic(format!(
                "region at {} announces name '{}', expected '{}'",
                cfg.link_path(),
                header.name(),
                cfg.name
            )));
        }
        Ok(RingBuffer { shmem, header })
    }

    /// Unmaps the local view. The shared region stays in place and can be
    /// attached again.
    pub fn detach(self) {
        drop(self);
    }

    /// Removes the named region from the system and unmaps the local view.
    /// Later `attach` calls fail; a later `create` starts fresh. Exactly one
    /// handle should ever call this for a given name.
    pub fn destroy(mut self) {
        self.shmem.set_owner(true);
        drop(self);
    }

    /// Pushes one frame. Returns `false` when the queue cannot take
    /// `payload.len() + FRAME_HEADER_SIZE` contiguous bytes within the
    /// bounded retry window; that is backpressure, not a fault. The
    /// caller retries or drops.
    ///
    /// # Panics
    ///
    /// An empty payload, or one larger than `max_payload_size`, violates
    /// the caller contract.
    pub fn push(&mut self, payload: &[u8]) -> bool {
        assert!(
            !payload.is_empty() && payload.len() <= self.max_payload_size(),
            "payload of {} bytes outside contract (1..={})",
            payload.len(),
            self.max_payload_size()
        );

        let frame_len = (payload.len() + FRAME_HEADER_SIZE) as u32;
        if !self.align_tail(frame_len) {
            return false;
        }

        let tail = self.header.tail().load(Ordering::Acquire);
        self.header.set_frame_len_at(tail, frame_len);
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.header.payload_ptr(tail),
                payload.len(),
            );
        }
        self.header.tail().store(tail + frame_len, Ordering::Release);
        true
    }

    /// Pops one frame and returns a view straight into the shared region.
    ///
    /// The view stays valid until the next `pop` on this handle (the borrow
    /// enforces that); copy the bytes out to keep them longer. Returns
    /// `None` when the queue is empty.
    pub fn pop(&mut self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        self.align_head();
        // The alignment step may have consumed the only thing left (the
        // sentinel), so emptiness has to be re-checked.
        if self.is_empty() {
            return None;
        }

        let head = self.header.head().load(Ordering::Acquire);
        let frame_len = self.header.frame_len_at(head);
        debug_assert!(
            frame_len >= FRAME_HEADER_SIZE as u32 && frame_len <= self.header.frame_max(),
            "corrupt frame length {} at offset {}",
            frame_len,
            head
        );
        let payload_len = frame_len as usize - FRAME_HEADER_SIZE;
        let payload = self.header.payload_ptr(head);
        self.header.head().store(head + frame_len, Ordering::Release);
        // The producer's full-queue wait keeps a frame_max slack margin, so
        // this frame is not overwritten while the view is live.
        Some(unsafe { std::slice::from_raw_parts(payload, payload_len) })
    }

    pub fn is_empty(&self) -> bool {
        self.header.head().load(Ordering::Acquire) == self.header.tail().load(Ordering::Acquire)
    }

    /// Name stored in the region header.
    pub fn name(&self) -> String {
        self.header.name()
    }

    /// Largest payload a single `push` accepts.
    pub fn max_payload_size(&self) -> usize {
        self.header.frame_max() as usize - FRAME_HEADER_SIZE
    }

    /// Makes room for a frame of `frame_len` bytes at the tail, wrapping to
    /// the region start when the remaining contiguous space is too small.
    fn align_tail(&mut self, frame_len: u32) -> bool {
        let tail = self.header.tail().load(Ordering::Acquire);
        let surplus = self.header.region_size() - tail;
        if surplus >= frame_len {
            return self.push_wait(frame_len);
        }

        // Wrapping would run over the tail region; wait until the consumer
        // has moved past it.
        if !self.tail_align_wait() {
            return false;
        }
        if surplus >= FRAME_HEADER_SIZE as u32 {
            self.header.set_frame_len_at(tail, SENTINEL_FRAME_LEN);
        }
        self.header.tail().store(HEADER_SIZE as u32, Ordering::Release);
        self.push_wait(frame_len)
    }

    /// Waits until `frame_len` bytes at the tail no longer risk overwriting
    /// unread frames. The extra `frame_max` slack keeps the frame most
    /// recently handed out by `pop` intact while the consumer still holds
    /// the view.
    fn push_wait(&self, frame_len: u32) -> bool {
        let tail = self.header.tail().load(Ordering::Acquire);
        for _ in 0..WAIT_RETRIES {
            let head = self.header.head().load(Ordering::Acquire);
            let clear = tail as u64 + frame_len as u64 + self.header.frame_max() as u64;
            if head <= tail || head as u64 >= clear {
                return true;
            }
            thread::sleep(WAIT_DELAY);
        }
        false
    }

    /// Waits until the consumer has left the stretch between the region
    /// start and the tail, so the producer can wrap without overtaking it.
    fn tail_align_wait(&self) -> bool {
        let tail = self.header.tail().load(Ordering::Acquire);
        for _ in 0..WAIT_RETRIES {
            let head = self.header.head().load(Ordering::Acquire);
            if head > HEADER_SIZE as u32 && head <= tail {
                return true;
            }
            thread::sleep(WAIT_DELAY);
        }
        false
    }

    /// Wraps the head to the region start when it sits on a sentinel frame
    /// or in a leftover stretch too small for a frame header. Runs on every
    /// `pop`.
    fn align_head(&mut self) {
        let head = self.header.head().load(Ordering::Acquire);
        if head < self.header.tail().load(Ordering::Acquire) {
            return;
        }
        // Check the leftover size first: a stretch shorter than a frame
        // header holds no readable length field.
        if self.header.region_size() - head < FRAME_HEADER_SIZE as u32
            || self.header.frame_len_at(head) == SENTINEL_FRAME_LEN
        {
            self.header.head().store(HEADER_SIZE as u32, Ordering::Release);
        }
    }
}
