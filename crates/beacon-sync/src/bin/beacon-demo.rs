//! beacon-demo: drive the notification engine against the in-memory backend.
//!
//! Seeds a history for one user, signs in, streams live notifications, then
//! exercises the mutation gateway and prints the resulting state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use beacon_sync::{
    ConnectionState, CurrentUser, EngineBuilder, InMemoryBackend, ListFilter, Notification,
    NotificationKind, NotificationSnapshot, SyncConfig, TracingAlerts,
};

#[derive(Parser, Debug)]
#[command(name = "beacon-demo", about = "Real-time notification sync demo")]
struct Args {
    /// User to sign in as (random when omitted)
    #[arg(long, env = "BEACON_DEMO_USER")]
    user: Option<Uuid>,

    /// Historical notifications seeded before sign-in
    #[arg(long, default_value_t = 5)]
    history: usize,

    /// Live notifications delivered after the subscription is up
    #[arg(long, default_value_t = 3)]
    live: usize,

    /// Delay between live notifications in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Print the final snapshot as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "beacon_sync=info,beacon_demo=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn history(user_id: Uuid, count: usize) -> Vec<Notification> {
    (0..count)
        .map(|i| {
            let kind = NotificationKind::ALL[i % NotificationKind::ALL.len()];
            Notification::new(
                user_id,
                kind,
                format!("{} update", kind),
                format!("Historical notification #{}", i + 1),
            )
            .with_created_at(Utc::now() - chrono::Duration::hours(i as i64 + 1))
            .with_read(i % 2 == 1)
        })
        .collect()
}

async fn wait_until(
    state: &mut watch::Receiver<NotificationSnapshot>,
    ready: impl Fn(&NotificationSnapshot) -> bool,
) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| ready(s)))
        .await
        .context("timed out waiting for engine state")?
        .context("engine stopped")?;
    Ok(())
}

fn print_snapshot(snapshot: &NotificationSnapshot) {
    println!(
        "connection={} unread={} badge={}",
        snapshot.connection,
        snapshot.unread_count,
        snapshot.badge_label().unwrap_or_default()
    );
    for n in &snapshot.notifications {
        println!(
            "  {} {} [{}] {} - {}",
            if n.read { " " } else { "*" },
            n.display_icon(),
            n.kind,
            n.display_title(),
            n.message
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = SyncConfig::from_env();
    config.validate()?;
    let fetch_limit = usize::try_from(config.fetch_limit).unwrap_or(usize::MAX);
    let user_id = args.user.unwrap_or_else(Uuid::new_v4);

    let backend = InMemoryBackend::new();
    backend.seed_rows(history(user_id, args.history));

    let (identity_tx, identity_rx) = watch::channel(None);
    let handle = EngineBuilder::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        identity_rx,
    )
    .with_config(config)
    .with_alerts(TracingAlerts)
    .build()
    .start();

    let mut state = handle.watch();
    identity_tx
        .send(Some(CurrentUser::new(user_id)))
        .context("engine dropped the identity channel")?;
    wait_until(&mut state, |s| {
        s.seeded && s.connection == ConnectionState::Connected
    })
    .await?;
    info!(user_id = %user_id, unread = state.borrow().unread_count, "Signed in");

    for i in 0..args.live {
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        backend.insert(Notification::new(
            user_id,
            NotificationKind::Social,
            "New follower",
            format!("Someone new is following your progress ({})", i + 1),
        ));
    }
    let expected = args.history.min(fetch_limit) + args.live;
    wait_until(&mut state, |s| s.notifications.len() == expected).await?;

    let gateway = handle.gateway();
    let newest = handle.snapshot().notifications.first().map(|n| n.id);
    if let Some(id) = newest {
        gateway.mark_as_read(id).await?;
    }
    gateway.delete_all_read().await?;
    gateway.mark_all_as_read().await?;

    let snapshot = handle.snapshot();
    info!(
        remaining = snapshot.notifications.len(),
        unread = snapshot.unread_count,
        "Mutations applied"
    );
    if args.json {
        let rows: Vec<&Notification> = snapshot.filtered(ListFilter::All);
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_snapshot(&snapshot);
    }

    identity_tx.send(None).ok();
    handle.shutdown().await?;
    Ok(())
}
