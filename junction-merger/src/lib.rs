pub mod assembly;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod merger;
pub mod rules;

pub use assembly::{merge_order, Assembly, AssemblyState, AssemblyView, Ingested};
pub use error::MergeError;
pub use handlers::build_router;
pub use merger::{Merger, CANCELLED_REASON};
pub use rules::{merge_parts, Part};

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:7750";
