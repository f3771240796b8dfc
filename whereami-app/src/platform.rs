use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tauri::{AppHandle, plugin::PermissionState};
use tauri_plugin_geolocation::{
    GeolocationExt, PermissionType, Position as GeoPosition, PositionOptions,
};
use tauri_plugin_opener::OpenerExt;
use whereami_logic::{
    AuthorizationLevel, AuthorizationStatus, LocationPlatform, PlatformEvent, PlatformEventSender,
    Position, prelude::Result,
};

/// Opens this app's page in the system settings on iOS
const SETTINGS_URL: &str = "app-settings:";

const OPTIONS: PositionOptions = PositionOptions {
    enable_high_accuracy: true,
    timeout: 10000,
    // One-shot request, never hand back a cached fix
    maximum_age: 0,
};

/// [LocationPlatform] backed by the geolocation and opener plugins. Plugin calls block on
/// mobile so requests run on their own task and report back as [PlatformEvent]s.
pub struct TauriPlatform {
    app: AppHandle,
    events: PlatformEventSender,
}

impl TauriPlatform {
    pub fn new(app: AppHandle, events: PlatformEventSender) -> Self {
        Self { app, events }
    }
}

async fn emit(events: &PlatformEventSender, event: PlatformEvent) {
    if events.send(event).await.is_err() {
        warn!("Location service stopped listening for platform events");
    }
}

fn to_status(state: PermissionState, level: AuthorizationLevel) -> AuthorizationStatus {
    match state {
        PermissionState::Granted => match level {
            AuthorizationLevel::Always => AuthorizationStatus::AuthorizedAlways,
            AuthorizationLevel::WhenInUse => AuthorizationStatus::AuthorizedWhenInUse,
        },
        PermissionState::Denied => AuthorizationStatus::Denied,
        _ => AuthorizationStatus::NotDetermined,
    }
}

fn to_position(pos: GeoPosition) -> Position {
    let coords = pos.coords;
    Position {
        latitude: coords.latitude,
        longitude: coords.longitude,
        horizontal_accuracy: coords.accuracy,
        altitude: coords.altitude,
        timestamp: i64::try_from(pos.timestamp)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
    }
}

impl LocationPlatform for TauriPlatform {
    async fn request_authorization(&self, level: AuthorizationLevel) {
        let app = self.app.clone();
        let events = self.events.clone();
        // Resolves once the user answers the prompt, don't hold up the caller
        tauri::async_runtime::spawn(async move {
            let res = tauri::async_runtime::spawn_blocking(move || {
                app.geolocation()
                    .request_permissions(Some(vec![PermissionType::Location]))
            })
            .await;

            match res {
                Ok(Ok(status)) => {
                    let status = to_status(status.location, level);
                    emit(&events, PlatformEvent::AuthorizationChanged(status)).await;
                }
                Ok(Err(why)) => error!("Failed to request location permission: {why:?}"),
                Err(why) => error!("Location permission task failed: {why:?}"),
            }
        });
    }

    async fn enable_background_updates(&self) {
        info!("Background location updates enabled by the app's declared background mode");
    }

    async fn request_location(&self) {
        let app = self.app.clone();
        let events = self.events.clone();
        tauri::async_runtime::spawn(async move {
            let res = tauri::async_runtime::spawn_blocking(move || {
                app.geolocation().get_current_position(Some(OPTIONS))
            })
            .await;

            let event = match res {
                Ok(Ok(pos)) => PlatformEvent::LocationsUpdated(vec![to_position(pos)]),
                Ok(Err(why)) => PlatformEvent::Failed(why.to_string()),
                Err(why) => PlatformEvent::Failed(format!("Location task failed: {why:?}")),
            };

            emit(&events, event).await;
        });
    }

    async fn location_services_enabled(&self) -> bool {
        let app = self.app.clone();
        // The mobile plugin rejects permission checks while location services are off
        tauri::async_runtime::spawn_blocking(move || app.geolocation().check_permissions().is_ok())
            .await
            .unwrap_or(false)
    }

    async fn open_app_settings(&self) -> Result {
        self.app
            .opener()
            .open_url(SETTINGS_URL, None::<&str>)
            .context("Failed to open the app's settings")
    }
}
