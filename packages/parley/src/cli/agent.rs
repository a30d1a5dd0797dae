//! `parley agent <type>`: run one agent session to completion.

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use parley::agents::AgentType;
use parley::backend::SessionOptions;
use parley::config::ClientConfig;
use parley::{ClientEvent, RealtimeClient};

use super::print_event;

pub async fn run(
    config: &ClientConfig,
    agent_type: AgentType,
    message: Option<String>,
) -> Result<()> {
    let client = RealtimeClient::new(config)?;
    let mut events = client.subscribe();

    let agent = client
        .switch_to_agent(agent_type)
        .await
        .with_context(|| format!("Failed to switch to {agent_type}"))?;
    let session = client
        .start_session(SessionOptions {
            initial_message: message,
            ..Default::default()
        })
        .await
        .context("Failed to start session")?;
    info!(agent_id = %agent.id(), session_id = %session.id, "session running");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event)?;
                    match &event {
                        ClientEvent::SessionCompleted { agent_id, .. }
                        | ClientEvent::StreamLost { agent_id, .. }
                            if agent_id == agent.id() => break,
                        ClientEvent::SessionExpired { .. } => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = client.terminate_session(agent.id(), Some("interrupted")).await {
                    warn!(code = e.error_code(), "could not end session: {}", e);
                }
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
