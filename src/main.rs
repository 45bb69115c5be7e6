use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use chat_relay::api::HttpChatApi;
use chat_relay::auth::{CredentialStore, StaticCredentials};
use chat_relay::chat::{ChatClient, ChatMessage, Delivery};
use chat_relay::config::Settings;
use chat_relay::connection_manager::{ConnectionManager, ManagerConfig};
use chat_relay::metrics::encode_metrics;
use chat_relay::telemetry::init_tracing;
use chat_relay::websocket::{ServerFrame, TungsteniteTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.log)?;
    tracing::info!("Configuration loaded");

    let room_id = settings
        .chat
        .room_id
        .context("no room selected, set CHAT__CHAT__ROOM_ID")?;

    let credentials = Arc::new(StaticCredentials::from_config(&settings.auth));
    if credentials.token().is_none() {
        tracing::warn!("No auth token configured, the stream will not connect");
    }

    let manager = ConnectionManager::start(
        ManagerConfig::from_settings(&settings),
        TungsteniteTransport::new(),
        credentials.clone(),
    );
    let api = HttpChatApi::new(&settings.server.api_url, credentials)?;
    let client = ChatClient::new(manager.clone(), Arc::new(api), settings.chat.history_limit);

    let _on_message = manager.on_message(|frame| match frame {
        ServerFrame::Message(message) => print_message(message),
        ServerFrame::Delivered { message_id } => {
            tracing::debug!(?message_id, "Message delivered");
        }
        ServerFrame::Pong => {}
        ServerFrame::Other(value) => tracing::debug!(%value, "Unrecognized frame"),
    });
    let _on_connect = manager.on_connect(|room_id| {
        tracing::info!(room_id, "Connected to chat room");
    });
    let _on_disconnect = manager.on_disconnect(|event| {
        tracing::warn!(code = event.code, reason = %event.reason, "Disconnected from chat room");
    });
    let _on_error = manager.on_error(|e| {
        tracing::error!(error = %e, "Chat connection error");
    });

    match client.open_room(room_id).await {
        Ok(history) => history.iter().for_each(print_message),
        Err(e) => tracing::warn!(error = %e, "Could not load message history"),
    }

    let shutdown = shutdown_signal_handler();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read input");
                        break;
                    }
                };

                match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    "/metrics" => match encode_metrics() {
                        Ok(text) => print!("{text}"),
                        Err(e) => tracing::error!(error = %e, "Failed to encode metrics"),
                    },
                    "/reconnect" => {
                        if let Err(e) = client.reconnect().await {
                            tracing::error!(error = %e, "Reconnect failed");
                        }
                    }
                    content => match client.send(content).await {
                        Ok(Delivery::Streamed) => {}
                        Ok(Delivery::Stored(message)) => {
                            tracing::info!(message_id = message.id, "Message stored over HTTP");
                            print_message(&message);
                        }
                        Err(e) => tracing::error!(error = %e, "Message not sent"),
                    },
                }
            }
        }
    }

    client.leave();
    manager.stop().await;

    tracing::info!("Chat client stopped");
    Ok(())
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] #{}: {}",
        message.sent_at.format("%H:%M"),
        message.sender_id,
        message.content
    );
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}
