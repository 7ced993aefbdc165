/*!
 * Allocation Module
 * The allocator capability, the system upstream, and the sentry allocator
 */

pub mod guard;
pub mod header;
pub mod sentry;
pub mod system;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use guard::{AllocGuard, AllocatorExt};
pub use sentry::SentryAllocator;
pub use system::{system_allocator, SystemAllocator};
pub use traits::Allocator;
pub use types::{AllocError, AllocResult, SentryStats};
