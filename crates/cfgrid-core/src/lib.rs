pub mod config;

pub use config::{
    CfgridConfig, ConfigError, NodeConfig, RepositoryConfig, RolloutConfig, StatusConfig,
    StoreConfig,
};
