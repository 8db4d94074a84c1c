pub mod ops;
pub mod pool;
mod request;
mod request_pool;
mod signal;
mod stats;

pub use ops::{operation_name, OperationKind, OPERATION_NAMES};
pub use pool::{PoolAllocator, PoolError, PoolHandle, PoolLimits};
pub use request::MemoryRequest;
pub use request_pool::{RefRelease, RequestHandle, RequestPool, REQUEST_SLAB_CAPACITY};
pub use signal::{CallbackSignal, Signal};
pub use stats::PoolStats;
