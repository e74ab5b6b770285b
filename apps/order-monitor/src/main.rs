//! Terminal tail of live order events for one venue.
//!
//! Logs in against the Tably backend, opens the realtime channel, joins the
//! configured venue room, and prints every order event until Ctrl-C.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tably_client::realtime::events::{EventType, RoomType};
use tably_client::session::state::{LoginOutcome, SessionEvent};
use tably_client::storage::MemoryStore;
use tably_client::{ClientConfig, EventRouter, SessionManager};

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    let email = required_var("TABLY_EMAIL");
    let password = required_var("TABLY_PASSWORD");
    let venue_id = required_var("TABLY_VENUE_ID");

    let session = Arc::new(
        SessionManager::new(&config, Arc::new(MemoryStore::new())).expect("client setup failed"),
    );

    match session.login(&email, &password).await {
        Some(LoginOutcome::Authenticated) => {}
        Some(LoginOutcome::OtpRequired) => {
            let code = prompt("One-time code sent to your email: ");
            if !session.verify_otp(&email, code.trim()).await {
                tracing::error!(error = ?session.snapshot().error, "one-time code rejected");
                std::process::exit(1);
            }
        }
        None => {
            tracing::error!(error = ?session.snapshot().error, "login failed");
            std::process::exit(1);
        }
    }
    tracing::info!(user = %session.snapshot().user.map(|u| u.email).unwrap_or_default(), "signed in");

    let router = Arc::new(EventRouter::new(config, session.api().bearer_slot()));
    router.connect();

    for event in [
        EventType::NewOrder,
        EventType::OrderUpdated,
        EventType::OrderItemUpdated,
    ] {
        router.add_listener(event, move |e| {
            let order = e.order_id.as_deref().unwrap_or(&e.id);
            tracing::info!(event = event.name(), order, status = ?e.status, "{}", e.message);
        });
    }

    if let Err(err) = router.join_room(RoomType::Venue, &venue_id).await {
        tracing::error!(%err, venue = %venue_id, "failed to join venue room");
        std::process::exit(1);
    }

    // A sign-out or suspension from any surface also tears down the feed.
    let mut events = session.subscribe();
    let feed = router.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(
                event,
                SessionEvent::SignedOut { .. } | SessionEvent::AccountSuspended
            ) {
                feed.disconnect();
                break;
            }
        }
    });

    tracing::info!(venue = %venue_id, "watching live orders; Ctrl-C to exit");
    tokio::signal::ctrl_c().await.expect("signal handler");

    session.logout().await;
    router.disconnect();
}

fn prompt(message: &str) -> String {
    print!("{message}");
    std::io::stdout().flush().expect("stdout");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).expect("stdin");
    line
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
