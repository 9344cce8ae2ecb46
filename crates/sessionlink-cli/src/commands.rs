//! Subcommand implementations.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sessionlink_core::config::PathsConfig;
use sessionlink_core::{FixtureFactory, LeaseManager, LeaseStatus, LinkConfig, Operation, Role, SessionLink};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Lines on stdout that other processes (and tests) wait for.
fn announce(role: Role, instance_id: &str) {
    println!("ROLE={} INSTANCE={}", role, instance_id);
}

pub async fn serve(root: &Path, fixture: &Path, watch: bool) -> Result<()> {
    let config = LinkConfig {
        watch_requests: watch,
        ..LinkConfig::default()
    };
    let standby_interval = config.lease_renew_interval;

    let link = SessionLink::builder(root)
        .auto_create_dirs(true)
        .config(config)
        .session_factory(FixtureFactory::new(fixture))
        .build()
        .await?;

    let mut role = link.role().await;
    announce(role, link.instance_id());
    info!("Serving {} as {} from {}", fixture.display(), role, root.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut standby = tokio::time::interval(standby_interval);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutdown signal received, exiting");
                break;
            }
            _ = standby.tick() => {
                if role == Role::Proxy && link.reelect().await == Role::Primary {
                    role = Role::Primary;
                    announce(role, link.instance_id());
                }
            }
        }
    }

    link.shutdown().await;
    Ok(())
}

pub async fn call(root: &Path, operation: &str, params: &str, timeout_ms: Option<u64>) -> Result<()> {
    let operation: Operation = operation.parse()?;
    let params: Value = serde_json::from_str(params).context("params must be valid JSON")?;

    let mut config = LinkConfig::default();
    if let Some(ms) = timeout_ms {
        config.default_call_timeout = Duration::from_millis(ms);
        config.bulk_call_timeout = Duration::from_millis(ms);
    }

    let link = SessionLink::builder(root)
        .auto_create_dirs(true)
        .config(config)
        .build()
        .await?;
    let result = link.call(operation, params).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn status(root: &Path) -> Result<()> {
    let link = SessionLink::builder(root).auto_create_dirs(true).build().await?;
    let status = link.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub fn lease(root: &Path) -> Result<()> {
    let manager = LeaseManager::new(
        root.join(PathsConfig::LEASE_FILENAME),
        "inspector",
        LinkConfig::default().lease_freshness,
    );

    let report = match manager.inspect() {
        LeaseStatus::Absent => json!({ "state": "absent" }),
        LeaseStatus::Fresh(record) => json!({ "state": "fresh", "lease": record }),
        LeaseStatus::Stale(record, reason) => json!({
            "state": "stale",
            "reason": reason.to_string(),
            "lease": record,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
