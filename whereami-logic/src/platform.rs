use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    authorization::{AuthorizationLevel, AuthorizationStatus},
    prelude::*,
    result::Position,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Something the platform's location API reported back
pub enum PlatformEvent {
    /// New positions, oldest first
    LocationsUpdated(Vec<Position>),
    /// The app's authorization status changed (or was reported after a request)
    AuthorizationChanged(AuthorizationStatus),
    /// The platform failed to determine a location, contains its reason
    Failed(String),
}

pub type PlatformEventSender = mpsc::Sender<PlatformEvent>;
pub type PlatformEventReceiver = mpsc::Receiver<PlatformEvent>;

/// Binding to a platform's location API. Operations that produce a result don't return it,
/// implementors report it later as a [PlatformEvent] on their channel.
pub trait LocationPlatform: Send + Sync {
    /// Ask the OS for the given authorization level, may show a permission prompt
    fn request_authorization(
        &self,
        level: AuthorizationLevel,
    ) -> impl Future<Output = ()> + Send;
    /// Allow location updates to keep arriving while the app is backgrounded
    fn enable_background_updates(&self) -> impl Future<Output = ()> + Send;
    /// Request a single location fix
    fn request_location(&self) -> impl Future<Output = ()> + Send;
    /// Whether location services are turned on for the whole device
    fn location_services_enabled(&self) -> impl Future<Output = bool> + Send;
    /// Open the OS settings screen for this app
    fn open_app_settings(&self) -> impl Future<Output = Result> + Send;
}
