//! Rate limiting logic and state management.

mod decision;
mod limiter;
mod registry;
mod request_log;
mod window;

pub use decision::{Decision, Quota};
pub use limiter::{
    epoch_millis, AdmissionControl, CompactionPolicy, SlidingWindowLimiter,
    DEFAULT_MAX_TRACKED_IDENTITIES,
};
pub use registry::{NamedLimiter, Route, RoutePolicy, Selection};
pub use request_log::RequestLog;
pub use window::WindowConfig;
