pub mod error;
pub mod work;

pub use error::QueueError;
pub use work::{work_queue, WorkReceiver, WorkSender};
