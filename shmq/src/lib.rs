pub mod core;
mod errors;
pub mod ring;

#[cfg(test)]
mod tests;

pub use crate::core::ShmqConfig;
pub use crate::errors::ShmqError;
pub use crate::ring::RingBuffer;

pub const FRAME_HEADER_SIZE: usize = core::FRAME_HEADER_SIZE;
pub const HEADER_SIZE: usize = core::HEADER_SIZE;
pub const MAX_NAME_SIZE: usize = core::MAX_NAME_SIZE;
