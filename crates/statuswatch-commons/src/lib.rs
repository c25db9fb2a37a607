pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AppConfig,
    AppUrlConfig,
    DnsMode,
    ProbeConfig,
    TlsVerify,
};
pub use error::ConfigError;
