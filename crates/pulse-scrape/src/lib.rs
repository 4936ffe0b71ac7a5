//! 目标注册表、服务发现与抓取引擎

pub mod discovery;
pub mod engine;
pub mod error;
pub mod exposition;
pub mod fetcher;
pub mod registry;

pub use discovery::{DiscoveryManager, DiscoverySource, FileDiscovery, StaticDiscovery};
pub use engine::{ScrapeEngine, ScrapeReport};
pub use error::FetchError;
pub use exposition::{parse_exposition, ParsedPayload};
pub use fetcher::{Fetcher, HttpFetcher};
pub use registry::{RegistryDiff, TargetRegistry};
