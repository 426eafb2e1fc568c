pub mod service;
pub mod types;

pub use service::QueryService;
pub use types::{ArcInfo, GlobalStatistics, LineInfo};
