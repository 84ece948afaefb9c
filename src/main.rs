//! `chatwire-tail`: follows a user's chat traffic from the terminal.
//!
//! Authenticates with `CHAT_TOKEN` (or `CHAT_EMAIL` / `CHAT_PASSWORD`),
//! subscribes to the notification queue and to every conversation id given
//! on the command line, and logs each event until Ctrl-C or until the
//! session ends.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chatwire::ChatClient;
use chatwire::config::ClientConfig;
use chatwire::events::SessionEvent;
use chatwire::transport::Payload;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = ClientConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    tracing::info!(
        endpoint = %config.connection.endpoint,
        api = %config.request.base_url,
        "starting chatwire-tail"
    );
    let conversations: Vec<String> = std::env::args().skip(1).collect();

    let client = ChatClient::new(config);
    authenticate(&client).await?;

    // Lifecycle events
    let _connected = client.events().on_connect(|event| {
        tracing::info!(event = %serde_json::to_string(event)?, "connected");
        Ok(())
    });
    let _disconnected = client.events().on_disconnect(|event| {
        tracing::warn!(event = %serde_json::to_string(event)?, "disconnected");
        Ok(())
    });
    let _errors = client.events().on_error(|event| {
        tracing::error!(event = %serde_json::to_string(event)?, "connection error");
        Ok(())
    });

    client.subscribe_to_notifications(|payload| log_payload("notification", payload));
    for conversation in &conversations {
        let id = conversation.clone();
        client.subscribe_to_conversation(conversation, move |payload| {
            log_payload(&id, payload);
        });
    }

    if let Err(err) = client.connect().await {
        tracing::warn!(error = %err, "initial connect failed; retrying in background");
    }

    let mut session = client.session_bus().subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            tracing::info!("interrupted");
        }
        event = session.recv() => {
            if let Ok(SessionEvent::Ended { reason, .. }) = event {
                tracing::warn!(?reason, "session ended");
            }
        }
    }

    client.shutdown();
    Ok(())
}

async fn authenticate(client: &ChatClient) -> anyhow::Result<()> {
    if let Ok(token) = std::env::var("CHAT_TOKEN") {
        let refresh = std::env::var("CHAT_REFRESH_TOKEN").ok();
        let user = std::env::var("CHAT_USER_ID").ok();
        client
            .credentials()
            .store(&token, refresh.as_deref(), user.as_deref());
        return Ok(());
    }
    let email = std::env::var("CHAT_EMAIL").context("set CHAT_TOKEN or CHAT_EMAIL")?;
    let password = std::env::var("CHAT_PASSWORD").context("CHAT_PASSWORD is required with CHAT_EMAIL")?;
    client.api().login(&email, &password).await?;
    Ok(())
}

fn log_payload(source: &str, payload: &Payload) {
    match payload {
        Payload::Json(value) => tracing::info!(source, %value, "message"),
        Payload::Unparsed { raw, error } => {
            tracing::warn!(source, raw, error, "unparsed message");
        }
    }
}
