use std::{fmt, io};

#[derive(Debug)]
pub enum ShmqError {
    SharedMemory(shared_memory::ShmemError),
    Io(io::Error),
    /// `create` found an existing region with the same name.
    AlreadyExists(String),
    /// The region name does not fit the fixed header field.
    NameTooLong(String),
    /// The configured capacity cannot hold one frame of the maximum payload.
    CapacityTooSmall { capacity: u32, required: u32 },
    Logic(String),
}

impl fmt::Display for ShmqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmqError::SharedMemory(e) => write!(f, "shared memory error: {}", e),
            ShmqError::Io(e) => write!(f, "IO error: {}", e),
            ShmqError::AlreadyExists(name) => {
                write!(f, "shared region '{}' already exists", name)
            }
            ShmqError::NameTooLong(name) => write!(
                f,
                "region name '{}' is {} bytes, limit is {}",
                name,
                name.len(),
                crate::core::MAX_NAME_SIZE - 1
            ),
            ShmqError::CapacityTooSmall { capacity, required } => write!(
                f,
                "capacity {} cannot hold a single frame of {} bytes",
                capacity, required
            ),
            ShmqError::Logic(s) => write!(f, "logic error: {}", s),
        }
    }
}

impl std::error::Error for ShmqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShmqError::SharedMemory(e) => Some(e),
            ShmqError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shared_memory::ShmemError> for ShmqError {
    fn from(err: shared_memory::ShmemError) -> Self {
        ShmqError::SharedMemory(err)
    }
}

impl From<io::Error> for ShmqError {
    fn from(err: io::Error) -> Self {
        ShmqError::Io(err)
    }
}
