pub mod collector;
pub mod sink;

pub use collector::PipelineMetrics;
