/// Recoverable memory-management failures.
///
/// Programming errors such as a double free are not represented here; they
/// panic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not found")]
    NotFound,
}
