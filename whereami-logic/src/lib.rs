mod authorization;
mod config;
mod platform;
mod result;
mod service;

pub use authorization::{
    AuthorizationLevel, AuthorizationMode, AuthorizationPlan, AuthorizationStatus, Diagnostic,
};
pub use config::UsageConfig;
pub use platform::{LocationPlatform, PlatformEvent, PlatformEventReceiver, PlatformEventSender};
pub use result::{LocationFailure, LocationResult, Position, UtcDT};
pub use service::{LocationService, PendingPolicy, ResultHandler};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
