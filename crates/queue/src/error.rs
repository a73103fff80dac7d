//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed: every consumer has exited")]
    Closed,
}
