pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{BangumiConfig, Config, RetryConfig, SchedulerConfig, SyncOptions, MAX_PAGE_SIZE};
pub use credentials::CredentialStore;
pub use paths::{PathManager, container_base_path};
