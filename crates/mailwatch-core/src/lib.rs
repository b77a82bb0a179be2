pub mod config;
pub mod convert;
pub mod credentials;
pub mod gmail;
pub mod loader;
pub mod telemetry;
pub mod watch;

pub use config::Config;
pub use convert::{ConvertError, ConvertedToken, convert_file};
pub use credentials::{ClientSecrets, CredentialCache, CredentialError};
pub use loader::{CredentialLoader, LoaderError};
pub use telemetry::{TelemetryError, init_logging};
pub use watch::{WatchError, WatchReport, WatchSettings, exit_code, log_failure, run_watch_check};
