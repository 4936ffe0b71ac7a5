//! 内存时序存储
//!
//! 序列按 (指标名, 标签集合) 寻址，两级并发 map 组织，每条序列独立加锁。

pub mod matcher;
pub mod query;
pub mod retention;
pub mod series;
pub mod snapshot;
pub mod store;

pub use matcher::{LabelMatcher, MatchOp};
pub use query::{PointIter, QueryResult, SeriesView, TimeRange};
pub use retention::{PurgeStats, RetentionPolicy};
pub use series::Series;
pub use store::{SeriesInfo, TimeSeriesStore};
