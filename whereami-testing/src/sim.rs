use std::{path::PathBuf, sync::Arc};

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use whereami_logic::{
    AuthorizationStatus, LocationService, PendingPolicy, Position, UsageConfig,
};
use whereami_test_shared::{Script, ScriptedPlatform, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum StatusValue {
    NotDetermined,
    Restricted,
    Denied,
    Always,
    WhenInUse,
}

impl From<StatusValue> for AuthorizationStatus {
    fn from(value: StatusValue) -> Self {
        match value {
            StatusValue::NotDetermined => AuthorizationStatus::NotDetermined,
            StatusValue::Restricted => AuthorizationStatus::Restricted,
            StatusValue::Denied => AuthorizationStatus::Denied,
            StatusValue::Always => AuthorizationStatus::AuthorizedAlways,
            StatusValue::WhenInUse => AuthorizationStatus::AuthorizedWhenInUse,
        }
    }
}

/// Request the current location from a simulated device and print it
#[derive(Parser)]
struct Cli {
    /// JSON file with the app's location usage keys (Info.plist key names)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON script describing the device, overrides the device flags below
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Authorization status the device reports
    #[arg(long, value_enum, default_value_t = StatusValue::WhenInUse)]
    status: StatusValue,

    /// Simulate location services being off for the whole device
    #[arg(long)]
    services_disabled: bool,

    /// Latitude of the simulated fix
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude of the simulated fix
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    long: f64,

    /// Horizontal accuracy of the simulated fix, negative for an invalid fix
    #[arg(long, default_value_t = 5.0, allow_hyphen_values = true)]
    accuracy: f64,

    /// Make the location request fail with this reason
    #[arg(long)]
    fail: Option<String>,

    /// Number of requests to make before the device answers, only the last one gets a result
    #[arg(long, default_value_t = 1)]
    requests: u32,
}

impl Cli {
    fn script(&self) -> Result<Script> {
        if let Some(path) = &self.script {
            return Script::from_file(path);
        }
        Ok(Script {
            authorization: self.status.into(),
            services_enabled: !self.services_disabled,
            fixes: vec![Position::new(self.lat, self.long, self.accuracy)],
            failure: self.fail.clone(),
        })
    }

    fn usage_config(&self) -> Result<UsageConfig> {
        if let Some(path) = &self.config {
            UsageConfig::from_file(path)
        } else {
            Ok(UsageConfig {
                when_in_use_usage_description: Some("Print where you are".to_string()),
                ..Default::default()
            })
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let script = cli.script()?;
    let config = cli.usage_config()?;

    if cli.requests == 0 {
        bail!("Need to make at least one request");
    }

    let (tx, rx) = mpsc::channel(16);
    let service = Arc::new(LocationService::new(
        ScriptedPlatform::new(script, tx),
        config,
        PendingPolicy::Replace,
    ));

    let loop_service = service.clone();
    let event_loop = tokio::spawn(async move { loop_service.main_loop(rx).await });

    // Register every request before the device answers any of them
    service.platform().hold();
    let mut requests = Vec::with_capacity(cli.requests as usize);
    for _ in 0..cli.requests {
        let service = service.clone();
        requests.push(tokio::spawn(async move { service.current_location().await }));
    }
    while service.platform().location_requests() < cli.requests as usize {
        tokio::task::yield_now().await;
    }
    service.platform().release().await;

    let mut answered = false;
    for (i, request) in requests.into_iter().enumerate() {
        let res = tokio::time::timeout(std::time::Duration::from_secs(2), request)
            .await
            .ok()
            .map(|joined| joined.context("Request task panicked"))
            .transpose()?;

        match res {
            Some(Ok(Ok(pos))) => {
                answered = true;
                println!("Request {i}: {pos}");
            }
            Some(Ok(Err(failure))) => {
                answered = true;
                println!("Request {i}: failed, {failure}");
            }
            Some(Err(why)) => println!("Request {i}: {why}"),
            None => println!("Request {i}: no answer from the device"),
        }
    }

    if let Some(mode) = service.authorization_mode().await {
        println!("Authorization: {mode}");
    }

    service.shutdown();
    event_loop.await.context("Event loop panicked")?;

    if !answered {
        bail!("No request received a result");
    }

    Ok(())
}
