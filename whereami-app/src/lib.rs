mod platform;

use std::sync::Arc;

use log::{LevelFilter, error, info};
use tauri::{Manager, State};
use tauri_specta::{ErrorHandlingMode, collect_commands};
use tokio::sync::mpsc;
use whereami_logic::{AuthorizationMode, LocationService, PendingPolicy, Position, UsageConfig};

use std::result::Result as StdResult;

use crate::platform::TauriPlatform;

type Result<T = (), E = String> = StdResult<T, E>;

pub type LocationHandle = Arc<LocationService<TauriPlatform>>;

/// Location usage keys, mirrors what's declared in the iOS Info.plist
const USAGE_CONFIG: &str = include_str!("../location-usage.json");

const EVENT_BUFFER: usize = 16;

#[tauri::command]
#[specta::specta]
/// Request the device's current position. Any earlier request that hasn't resolved yet is
/// dropped and returns an error.
async fn request_current_location(location: State<'_, LocationHandle>) -> Result<Position> {
    let res = location
        .current_location()
        .await
        .map_err(|err| err.to_string())?;

    match res {
        Ok(pos) => {
            info!("Current location: {pos}");
            Ok(pos)
        }
        Err(failure) => {
            info!("Couldn't get current location: {failure}");
            Err(failure.to_string())
        }
    }
}

#[tauri::command]
#[specta::specta]
/// The last authorization mode reported by the OS, `null` before the first request
async fn get_authorization_mode(
    location: State<'_, LocationHandle>,
) -> Result<Option<AuthorizationMode>> {
    Ok(location.authorization_mode().await)
}

pub fn mk_specta() -> tauri_specta::Builder {
    tauri_specta::Builder::<tauri::Wry>::new()
        .error_handling(ErrorHandlingMode::Throw)
        .commands(collect_commands![
            request_current_location,
            get_authorization_mode,
        ])
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let builder = mk_specta();

    tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(LevelFilter::Debug)
                .build(),
        )
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_geolocation::init())
        .invoke_handler(builder.invoke_handler())
        .setup(move |app| {
            builder.mount_events(app);

            let config = UsageConfig::from_json(USAGE_CONFIG).unwrap_or_else(|why| {
                error!("Bad location usage config, no authorization will be requested: {why:?}");
                UsageConfig::default()
            });

            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let platform = TauriPlatform::new(app.handle().clone(), tx);
            let location: LocationHandle = Arc::new(LocationService::new(
                platform,
                config,
                PendingPolicy::Replace,
            ));
            app.manage(location.clone());

            tauri::async_runtime::spawn(async move {
                location.main_loop(rx).await;
            });
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
