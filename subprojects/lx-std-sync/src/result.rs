//! Result types for the lock wrappers.

/// Error returned by [`Mutex::try_lock`](crate::Mutex::try_lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryLockError {
    /// The lock could not be acquired at this time because the operation
    /// would otherwise block.
    #[error("try_lock failed because the operation would block")]
    WouldBlock,
}

/// A type alias for the result of a nonblocking locking method.
pub type TryLockResult<Guard> = Result<Guard, TryLockError>;
