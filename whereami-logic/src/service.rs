use anyhow::bail;
use log::{debug, info, warn};
use tokio::sync::{Mutex, OnceCell, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    authorization::{AuthorizationMode, AuthorizationPlan, AuthorizationStatus},
    config::UsageConfig,
    platform::{LocationPlatform, PlatformEvent, PlatformEventReceiver},
    prelude::*,
    result::{LocationFailure, LocationResult},
};

pub type ResultHandler = Box<dyn FnOnce(LocationResult) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// What to do with a new request while another one is still waiting for a result
pub enum PendingPolicy {
    /// Drop the waiting handler without calling it and wait for the new one instead
    #[default]
    Replace,
    /// Fail the new request and keep waiting on the old one
    Reject,
}

struct PendingRequest {
    id: Uuid,
    handler: ResultHandler,
}

/// Turns "give me the current location" into a one-shot request on a [LocationPlatform] and
/// routes whatever the platform reports back to the caller's handler.
///
/// Platform bindings report through [PlatformEvent]s, either by calling
/// [LocationService::handle_event] directly or by feeding [LocationService::main_loop].
pub struct LocationService<P: LocationPlatform> {
    platform: P,
    config: UsageConfig,
    policy: PendingPolicy,
    plan: OnceCell<AuthorizationPlan>,
    pending: Mutex<Option<PendingRequest>>,
    mode: Mutex<Option<AuthorizationMode>>,
    cancel: CancellationToken,
}

impl<P: LocationPlatform> LocationService<P> {
    pub fn new(platform: P, config: UsageConfig, policy: PendingPolicy) -> Self {
        Self {
            platform,
            config,
            policy,
            plan: OnceCell::new(),
            pending: Mutex::new(None),
            mode: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The plan applied on the first request, `None` before that
    pub fn authorization_plan(&self) -> Option<&AuthorizationPlan> {
        self.plan.get()
    }

    /// Last authorization mode the platform reported
    pub async fn authorization_mode(&self) -> Option<AuthorizationMode> {
        *self.mode.lock().await
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    async fn initialize(&self) -> &AuthorizationPlan {
        self.plan
            .get_or_init(|| async {
                let plan = AuthorizationPlan::from_config(&self.config);
                if let Some(level) = plan.level {
                    debug!("Requesting {level:?} location authorization");
                    self.platform.request_authorization(level).await;
                }
                if plan.background_updates {
                    self.platform.enable_background_updates().await;
                }
                if let Some(diagnostic) = plan.diagnostic {
                    warn!("{diagnostic}");
                }
                plan
            })
            .await
    }

    /// Start a one-shot location request, `on_result` is called once the platform answers.
    ///
    /// If a request is already pending, [PendingPolicy] decides what happens: with
    /// [PendingPolicy::Replace] the old handler is dropped without being called, with
    /// [PendingPolicy::Reject] this returns an error and nothing is requested.
    pub async fn request_current_location(
        &self,
        on_result: impl FnOnce(LocationResult) + Send + 'static,
    ) -> Result {
        let id = Uuid::new_v4();

        {
            let mut pending = self.pending.lock().await;
            if let Some(prev) = pending.as_ref() {
                match self.policy {
                    PendingPolicy::Reject => {
                        bail!("Location request {} is still pending", prev.id)
                    }
                    PendingPolicy::Replace => {
                        debug!("Location request {} superseded by {id}", prev.id)
                    }
                }
            }
            *pending = Some(PendingRequest {
                id,
                handler: Box::new(on_result),
            });
        }

        self.initialize().await;

        debug!("Requesting location ({id})");
        self.platform.request_location().await;

        Ok(())
    }

    /// Request the current location and wait for the result.
    /// Errors if the request is rejected or superseded by a newer one.
    pub async fn current_location(&self) -> Result<LocationResult> {
        let (tx, rx) = oneshot::channel();
        self.request_current_location(move |res| {
            tx.send(res).ok();
        })
        .await?;
        rx.await
            .context("Location request was superseded by a newer one")
    }

    /// Hand the result to the pending handler, returns whether there was one
    async fn deliver(&self, result: LocationResult) -> bool {
        let pending = self.pending.lock().await.take();
        if let Some(PendingRequest { id, handler }) = pending {
            debug!("Completing location request {id}");
            handler(result);
            true
        } else {
            debug!("No pending location request for {result:?}");
            false
        }
    }

    async fn authorization_changed(&self, status: AuthorizationStatus) {
        let services_enabled = match status {
            AuthorizationStatus::Denied => self.platform.location_services_enabled().await,
            _ => false,
        };
        let mode = AuthorizationMode::derive(status, || services_enabled);
        *self.mode.lock().await = Some(mode);

        let Some(failure) = mode.failure() else {
            info!("Location access {mode}");
            return;
        };

        let delivered = self.deliver(Err(failure)).await;

        // The OS won't prompt again once denied, send the user to settings instead
        if delivered && mode == AuthorizationMode::DeniedServiceOn {
            if let Err(why) = self.platform.open_app_settings().await {
                warn!("Couldn't open app settings: {why:?}");
            }
        }
    }

    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::LocationsUpdated(positions) => match positions.last() {
                None => {
                    self.deliver(Err(LocationFailure::NoLocation)).await;
                }
                Some(pos) if !pos.is_valid() => {
                    debug!("Discarding invalid fix {pos}");
                }
                Some(pos) => {
                    self.deliver(Ok(*pos)).await;
                }
            },
            PlatformEvent::AuthorizationChanged(status) => {
                self.authorization_changed(status).await;
            }
            PlatformEvent::Failed(why) => {
                debug!("Platform failed to get location: {why}");
                self.deliver(Err(LocationFailure::UnableToDetermine)).await;
            }
        }
    }

    /// Consume platform events until [LocationService::shutdown] is called or every sender
    /// is dropped.
    pub async fn main_loop(&self, mut events: PlatformEventReceiver) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                event = events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event).await;
                    } else {
                        debug!("Platform event channel closed");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        AuthorizationLevel, Diagnostic, Position,
        tests::{DelayedPlatform, MockPlatform, PlatformCall, collector, config},
    };
    use tokio::{sync::mpsc, task::yield_now, test, time::Instant};

    type TestService = LocationService<MockPlatform>;

    fn service(config: UsageConfig, policy: PendingPolicy) -> TestService {
        LocationService::new(MockPlatform::default(), config, policy)
    }

    fn when_in_use() -> TestService {
        service(config(false, true, true), PendingPolicy::Replace)
    }

    #[test]
    async fn authorization_requested_once_per_config() {
        let cases = [
            (
                config(false, false, false),
                None,
                Some(Diagnostic::MissingUsageDescription),
            ),
            (config(true, false, false), Some(AuthorizationLevel::Always), None),
            (
                config(false, true, false),
                Some(AuthorizationLevel::WhenInUse),
                Some(Diagnostic::MissingBackgroundCapability),
            ),
            (config(false, true, true), Some(AuthorizationLevel::WhenInUse), None),
            (config(true, true, false), Some(AuthorizationLevel::Always), None),
        ];

        for (cfg, expected, diagnostic) in cases {
            let service = service(cfg, PendingPolicy::Replace);
            assert!(service.authorization_plan().is_none());

            for _ in 0..3 {
                service.request_current_location(|_| {}).await.unwrap();
            }

            let requested = service
                .platform()
                .calls()
                .into_iter()
                .filter_map(|c| match c {
                    PlatformCall::RequestAuthorization(level) => Some(level),
                    _ => None,
                })
                .collect::<Vec<_>>();

            assert_eq!(requested, expected.into_iter().collect::<Vec<_>>());
            assert_eq!(service.platform().count(PlatformCall::RequestLocation), 3);

            let plan = service.authorization_plan().expect("Plan not applied");
            assert_eq!(plan.diagnostic, diagnostic);
        }
    }

    #[test]
    async fn background_updates_follow_capability() {
        let with = service(config(false, true, true), PendingPolicy::Replace);
        with.request_current_location(|_| {}).await.unwrap();
        assert_eq!(with.platform().count(PlatformCall::EnableBackgroundUpdates), 1);

        let without = service(config(false, true, false), PendingPolicy::Replace);
        without.request_current_location(|_| {}).await.unwrap();
        assert_eq!(
            without.platform().count(PlatformCall::EnableBackgroundUpdates),
            0
        );
        assert_eq!(
            without.authorization_plan().and_then(|p| p.diagnostic),
            Some(Diagnostic::MissingBackgroundCapability)
        );
    }

    #[test]
    async fn last_position_wins() {
        let service = when_in_use();
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        let p1 = Position::new(1.0, 1.0, -5.0);
        let p2 = Position::new(2.0, 2.0, 10.0);
        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![p1, p2]))
            .await;

        assert_eq!(results.take(), vec![Ok(p2)]);
        assert!(!service.has_pending().await);
    }

    #[test]
    async fn invalid_fix_is_dropped() {
        let service = when_in_use();
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        let bad = Position::new(1.0, 1.0, -1.0);
        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![bad]))
            .await;

        assert!(results.take().is_empty());
        assert!(service.has_pending().await);

        // A later good fix still reaches the same handler
        let good = Position::new(3.0, 4.0, 0.0);
        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![good]))
            .await;
        assert_eq!(results.take(), vec![Ok(good)]);
    }

    #[test]
    async fn empty_update_fails() {
        let service = when_in_use();
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![]))
            .await;

        assert_eq!(results.take(), vec![Err(LocationFailure::NoLocation)]);
        assert!(!service.has_pending().await);
    }

    #[test]
    async fn platform_failure() {
        let service = when_in_use();
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        service
            .handle_event(PlatformEvent::Failed("kCLErrorDomain 0".to_string()))
            .await;

        assert_eq!(results.take(), vec![Err(LocationFailure::UnableToDetermine)]);
    }

    #[test]
    async fn authorization_failures() {
        let cases = [
            (
                AuthorizationStatus::NotDetermined,
                true,
                LocationFailure::Undecided,
                AuthorizationMode::Undetermined,
            ),
            (
                AuthorizationStatus::Restricted,
                true,
                LocationFailure::Restricted,
                AuthorizationMode::Restricted,
            ),
            (
                AuthorizationStatus::Denied,
                true,
                LocationFailure::Denied,
                AuthorizationMode::DeniedServiceOn,
            ),
            (
                AuthorizationStatus::Denied,
                false,
                LocationFailure::ServicesDisabled,
                AuthorizationMode::DeniedServiceOff,
            ),
        ];

        for (status, services_enabled, failure, mode) in cases {
            let platform = MockPlatform::with_services_enabled(services_enabled);
            let service =
                LocationService::new(platform, config(true, false, false), PendingPolicy::Replace);
            let (results, handler) = collector();
            service.request_current_location(handler).await.unwrap();

            service
                .handle_event(PlatformEvent::AuthorizationChanged(status))
                .await;

            assert_eq!(results.take(), vec![Err(failure)], "{status:?}");
            assert_eq!(service.authorization_mode().await, Some(mode));

            let opened = service.platform().count(PlatformCall::OpenAppSettings);
            let expected = usize::from(mode == AuthorizationMode::DeniedServiceOn);
            assert_eq!(opened, expected, "{status:?}");
        }
    }

    #[test]
    async fn settings_failure_is_ignored() {
        let platform = MockPlatform::with_services_enabled(true).failing_settings();
        let service =
            LocationService::new(platform, config(true, false, false), PendingPolicy::Replace);
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        service
            .handle_event(PlatformEvent::AuthorizationChanged(
                AuthorizationStatus::Denied,
            ))
            .await;

        assert_eq!(results.take(), vec![Err(LocationFailure::Denied)]);
        assert_eq!(service.platform().count(PlatformCall::OpenAppSettings), 1);
    }

    #[test]
    async fn authorized_is_informational() {
        for status in [
            AuthorizationStatus::AuthorizedAlways,
            AuthorizationStatus::AuthorizedWhenInUse,
        ] {
            let service = when_in_use();
            let (results, handler) = collector();
            service.request_current_location(handler).await.unwrap();

            service
                .handle_event(PlatformEvent::AuthorizationChanged(status))
                .await;

            assert!(results.take().is_empty());
            assert!(service.has_pending().await);
            assert!(
                service
                    .authorization_mode()
                    .await
                    .is_some_and(|m| m.is_authorized())
            );
        }
    }

    #[test]
    async fn no_pending_means_no_settings() {
        let platform = MockPlatform::with_services_enabled(true);
        let service =
            LocationService::new(platform, config(true, false, false), PendingPolicy::Replace);

        service
            .handle_event(PlatformEvent::AuthorizationChanged(
                AuthorizationStatus::Denied,
            ))
            .await;

        assert_eq!(service.platform().count(PlatformCall::OpenAppSettings), 0);
        assert_eq!(
            service.authorization_mode().await,
            Some(AuthorizationMode::DeniedServiceOn)
        );
    }

    #[test]
    async fn replace_only_calls_newest_handler() {
        let service = when_in_use();
        let (first, handler1) = collector();
        let (second, handler2) = collector();

        service.request_current_location(handler1).await.unwrap();
        service.request_current_location(handler2).await.unwrap();

        let pos = Position::new(5.0, 6.0, 3.0);
        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![pos]))
            .await;

        assert!(first.take().is_empty());
        assert_eq!(second.take(), vec![Ok(pos)]);
    }

    #[test]
    async fn reject_keeps_first_handler() {
        let service = service(config(false, true, true), PendingPolicy::Reject);
        let (first, handler1) = collector();
        let (second, handler2) = collector();

        service.request_current_location(handler1).await.unwrap();
        assert!(service.request_current_location(handler2).await.is_err());
        assert_eq!(service.platform().count(PlatformCall::RequestLocation), 1);

        let pos = Position::new(5.0, 6.0, 3.0);
        service
            .handle_event(PlatformEvent::LocationsUpdated(vec![pos]))
            .await;

        assert_eq!(first.take(), vec![Ok(pos)]);
        assert!(second.take().is_empty());

        // Free again once the first one resolves
        assert!(service.request_current_location(|_| {}).await.is_ok());
    }

    #[test]
    async fn main_loop_resolves_futures() {
        let service = Arc::new(when_in_use());
        let (tx, rx) = mpsc::channel(4);

        let loop_service = service.clone();
        let handle = tokio::spawn(async move { loop_service.main_loop(rx).await });

        let req_service = service.clone();
        let first = tokio::spawn(async move { req_service.current_location().await });
        while !service.has_pending().await {
            yield_now().await;
        }

        let req_service = service.clone();
        let second = tokio::spawn(async move { req_service.current_location().await });
        while service.platform().count(PlatformCall::RequestLocation) < 2 {
            yield_now().await;
        }

        let pos = Position::new(7.0, 8.0, 1.0);
        tx.send(PlatformEvent::LocationsUpdated(vec![pos]))
            .await
            .unwrap();

        assert!(first.await.unwrap().is_err(), "First request wasn't superseded");
        assert_eq!(second.await.unwrap().unwrap(), Ok(pos));

        service.shutdown();
        handle.await.unwrap();
    }

    const FETCH_TIME: Duration = Duration::from_secs(10);

    fn delayed(fix: Position) -> (Arc<LocationService<DelayedPlatform>>, PlatformEventReceiver) {
        tokio::time::pause();
        let (tx, rx) = mpsc::channel(4);
        let service = Arc::new(LocationService::new(
            DelayedPlatform::new(tx, FETCH_TIME, fix),
            config(false, true, true),
            PendingPolicy::Replace,
        ));
        (service, rx)
    }

    #[test]
    async fn request_returns_before_fix_arrives() {
        let fix = Position::new(9.0, 10.0, 2.0);
        let (service, rx) = delayed(fix);
        let loop_service = service.clone();
        let handle = tokio::spawn(async move { loop_service.main_loop(rx).await });

        let start = Instant::now();
        let (results, handler) = collector();
        service.request_current_location(handler).await.unwrap();

        assert!(start.elapsed() < FETCH_TIME);
        assert!(results.take().is_empty());
        assert!(service.has_pending().await);

        tokio::time::sleep(FETCH_TIME + Duration::from_secs(1)).await;
        assert_eq!(results.take(), vec![Ok(fix)]);

        service.shutdown();
        handle.await.unwrap();
    }

    #[test]
    async fn second_tap_resolves_with_first_fix() {
        let fix = Position::new(9.0, 10.0, 2.0);
        let (service, rx) = delayed(fix);
        let loop_service = service.clone();
        let handle = tokio::spawn(async move { loop_service.main_loop(rx).await });

        let start = Instant::now();
        let first_service = service.clone();
        let first = tokio::spawn(async move { first_service.current_location().await });

        tokio::time::sleep(FETCH_TIME / 2).await;

        let second_service = service.clone();
        let second = tokio::spawn(async move {
            let res = second_service.current_location().await;
            (res, Instant::now())
        });

        let (res, resolved_at) = second.await.unwrap();
        assert_eq!(res.unwrap(), Ok(fix));
        // The first fetch's fix lands on the second handler, no need to wait for the second fetch
        assert!(resolved_at - start < FETCH_TIME + FETCH_TIME / 2);
        assert!(first.await.unwrap().is_err(), "First request wasn't superseded");

        service.shutdown();
        handle.await.unwrap();
    }

    #[test]
    async fn main_loop_ends_when_senders_drop() {
        let service = when_in_use();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        service.main_loop(rx).await;
    }
}
