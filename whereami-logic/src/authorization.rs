use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::UsageConfig, result::LocationFailure};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
/// The level of access requested from the platform
pub enum AuthorizationLevel {
    /// Access while the app is in the foreground or background
    Always,
    /// Access only while the app is in use
    WhenInUse,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
/// Authorization status exactly as the platform reports it
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
/// Authorization state of the app, with denial split by whether location services are on
pub enum AuthorizationMode {
    Undetermined,
    Restricted,
    DeniedServiceOff,
    DeniedServiceOn,
    AlwaysAuthorized,
    WhenInUseAuthorized,
}

impl AuthorizationMode {
    /// `services_enabled` is only consulted for [AuthorizationStatus::Denied]
    pub fn derive(status: AuthorizationStatus, services_enabled: impl FnOnce() -> bool) -> Self {
        match status {
            AuthorizationStatus::NotDetermined => Self::Undetermined,
            AuthorizationStatus::Restricted => Self::Restricted,
            AuthorizationStatus::Denied if services_enabled() => Self::DeniedServiceOn,
            AuthorizationStatus::Denied => Self::DeniedServiceOff,
            AuthorizationStatus::AuthorizedAlways => Self::AlwaysAuthorized,
            AuthorizationStatus::AuthorizedWhenInUse => Self::WhenInUseAuthorized,
        }
    }

    /// The failure a pending request should receive in this mode, authorized modes have none
    pub fn failure(&self) -> Option<LocationFailure> {
        match self {
            Self::Undetermined => Some(LocationFailure::Undecided),
            Self::Restricted => Some(LocationFailure::Restricted),
            Self::DeniedServiceOn => Some(LocationFailure::Denied),
            Self::DeniedServiceOff => Some(LocationFailure::ServicesDisabled),
            Self::AlwaysAuthorized | Self::WhenInUseAuthorized => None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::AlwaysAuthorized | Self::WhenInUseAuthorized)
    }
}

impl fmt::Display for AuthorizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Undetermined => "undetermined",
            Self::Restricted => "restricted",
            Self::DeniedServiceOff => "denied (location services off)",
            Self::DeniedServiceOn => "denied",
            Self::AlwaysAuthorized => "authorized always",
            Self::WhenInUseAuthorized => "authorized when in use",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A configuration problem worth telling the integrator about
pub enum Diagnostic {
    /// When-in-use access without the background location capability
    MissingBackgroundCapability,
    /// Neither usage description is declared, so no authorization can be requested
    MissingUsageDescription,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBackgroundCapability => f.write_str(
                "Using when-in-use authorization without the \"location\" background mode, \
                 add it to UIBackgroundModes to keep receiving locations in the background",
            ),
            Self::MissingUsageDescription => f.write_str(
                "No location usage description declared, add \
                 NSLocationAlwaysUsageDescription or NSLocationWhenInUseUsageDescription \
                 to request location authorization",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What to ask the platform for before the first location request
pub struct AuthorizationPlan {
    /// Level to request, `None` when the config declares no usage description
    pub level: Option<AuthorizationLevel>,
    /// Whether to turn on background location updates
    pub background_updates: bool,
    pub diagnostic: Option<Diagnostic>,
}

impl AuthorizationPlan {
    /// Always wins over when-in-use if both descriptions are present
    pub fn from_config(config: &UsageConfig) -> Self {
        if config.has_always_usage() {
            Self {
                level: Some(AuthorizationLevel::Always),
                background_updates: false,
                diagnostic: None,
            }
        } else if config.has_when_in_use_usage() {
            let background_updates = config.has_background_location();
            Self {
                level: Some(AuthorizationLevel::WhenInUse),
                background_updates,
                diagnostic: (!background_updates).then_some(Diagnostic::MissingBackgroundCapability),
            }
        } else {
            Self {
                level: None,
                background_updates: false,
                diagnostic: Some(Diagnostic::MissingUsageDescription),
            }
        }
    }
}
