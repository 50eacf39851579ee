pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod monitor;
pub mod state;

pub use config::{CoordinatorConfig, RetryPolicy};
pub use coordinator::{Coordinator, CANCELLED_REASON};
pub use error::CoordinatorError;
pub use forwarder::{run_forwarder, MergerClient};
pub use handlers::build_router;
pub use state::AppState;
