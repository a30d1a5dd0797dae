//! `parley chat`: stdin lines out as `data.message.send`, events in as JSON.

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use parley::config::ClientConfig;
use parley::{ClientEvent, RealtimeClient};
use parley_protocol::MessageType;

use super::print_event;

pub async fn run(config: &ClientConfig, conversation: Option<String>) -> Result<()> {
    let client = RealtimeClient::new(config)?;
    let mut events = client.subscribe();

    let target = client
        .open_conversation(conversation.as_deref())
        .await
        .context("Failed to open conversation")?;
    info!(conversation_id = %target.conversation_id, url = %target.url, "joining conversation");
    client.connect(target).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event)?;
                    if matches!(event, ClientEvent::SessionExpired { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = client
                        .send(MessageType::MessageSend, json!({ "content": line }))
                        .await
                    {
                        warn!(code = e.error_code(), "message not sent: {}", e);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}
