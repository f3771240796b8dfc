use std::{
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use whereami_logic::{
    AuthorizationLevel, AuthorizationStatus, LocationPlatform, PlatformEvent, PlatformEventSender,
    Position,
};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// How a simulated device answers location requests
pub struct Script {
    /// Status reported after an authorization request
    pub authorization: AuthorizationStatus,
    /// Whether location services are on for the device
    pub services_enabled: bool,
    /// Positions reported for every location request, last one is the newest
    pub fixes: Vec<Position>,
    /// Fail location requests with this reason instead of reporting fixes
    pub failure: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            authorization: AuthorizationStatus::AuthorizedWhenInUse,
            services_enabled: true,
            fixes: vec![],
            failure: None,
        }
    }
}

impl Script {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        serde_json::from_str(&raw).context("Failed to parse script")
    }
}

/// A [LocationPlatform] that replays a [Script] through its event channel.
/// While held, events queue up until [ScriptedPlatform::release] is called.
pub struct ScriptedPlatform {
    script: Script,
    events: PlatformEventSender,
    held: Mutex<Option<Vec<PlatformEvent>>>,
    location_requests: AtomicUsize,
    background_updates: AtomicBool,
    settings_opened: AtomicBool,
}

impl ScriptedPlatform {
    pub fn new(script: Script, events: PlatformEventSender) -> Self {
        Self {
            script,
            events,
            held: Mutex::new(None),
            location_requests: AtomicUsize::new(0),
            background_updates: AtomicBool::new(false),
            settings_opened: AtomicBool::new(false),
        }
    }

    /// Stop reporting events until [ScriptedPlatform::release]
    pub fn hold(&self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.get_or_insert_with(Vec::new);
    }

    /// Report everything queued while held, in order, and stop holding
    pub async fn release(&self) {
        let queued = self
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        for event in queued {
            self.send(event).await;
        }
    }

    pub fn location_requests(&self) -> usize {
        self.location_requests.load(Ordering::Relaxed)
    }

    pub fn background_updates(&self) -> bool {
        self.background_updates.load(Ordering::Relaxed)
    }

    pub fn settings_opened(&self) -> bool {
        self.settings_opened.load(Ordering::Relaxed)
    }

    async fn emit(&self, event: PlatformEvent) {
        {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(queue) = held.as_mut() {
                queue.push(event);
                return;
            }
        }
        self.send(event).await;
    }

    async fn send(&self, event: PlatformEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Location service stopped listening for events");
        }
    }
}

impl LocationPlatform for ScriptedPlatform {
    async fn request_authorization(&self, level: AuthorizationLevel) {
        info!("Simulated device asked for {level:?} authorization");
        self.emit(PlatformEvent::AuthorizationChanged(self.script.authorization))
            .await;
    }

    async fn enable_background_updates(&self) {
        self.background_updates.store(true, Ordering::Relaxed);
    }

    async fn request_location(&self) {
        self.location_requests.fetch_add(1, Ordering::Relaxed);
        let event = if let Some(reason) = &self.script.failure {
            PlatformEvent::Failed(reason.clone())
        } else {
            PlatformEvent::LocationsUpdated(self.script.fixes.clone())
        };
        self.emit(event).await;
    }

    async fn location_services_enabled(&self) -> bool {
        self.script.services_enabled
    }

    async fn open_app_settings(&self) -> Result {
        info!("Simulated device opened the app's settings");
        self.settings_opened.store(true, Ordering::Relaxed);
        Ok(())
    }
}
