pub mod locks;
pub mod retry;
pub mod shutdown;

pub use locks::{KeyGuard, KeyedLocks};
pub use retry::{retry_with_backoff, RetryConfig};
pub use shutdown::{ShutdownCoordinator, ShutdownNotified, ShutdownSignal};
