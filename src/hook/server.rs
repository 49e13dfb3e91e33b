//! Unix Domain Socket server for receiving hook messages

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;

use super::protocol::HookMessage;

/// Largest hook message accepted
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// How long one client may take to deliver its message
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the hook listener
///
/// Accepts connections on a Unix domain socket, reads one length-prefixed
/// message per connection and forwards it to `tx`. Connections are handled one
/// at a time so messages reach `tx` in arrival order. Returns once `tx` is
/// closed.
///
/// # Arguments
/// * `socket_path` - Path to the Unix domain socket
/// * `tx` - Channel sender for decoded messages
pub async fn run_listener(socket_path: &Path, tx: mpsc::Sender<HookMessage>) -> Result<()> {
    // Remove existing socket if present
    if socket_path.exists() {
        std::fs::remove_file(socket_path).context("Failed to remove existing socket")?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind to socket: {}", socket_path.display()))?;

    tracing::info!("Hook listener started at: {}", socket_path.display());

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let message = match tokio::time::timeout(READ_TIMEOUT, read_message(stream)).await {
                        Ok(Ok(message)) => message,
                        Ok(Err(e)) => {
                            tracing::warn!("Error handling hook connection: {:#}", e);
                            continue;
                        }
                        Err(_) => {
                            tracing::warn!("Hook client timed out");
                            continue;
                        }
                    };
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to accept hook connection: {}", e);
                }
            }
        }
    }

    tracing::debug!("Hook listener stopped");
    Ok(())
}

async fn read_message(mut stream: tokio::net::UnixStream) -> Result<HookMessage> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes", len);
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .context("Failed to read message body")?;

    let message: HookMessage = serde_json::from_slice(&buf).context("Failed to parse message")?;
    tracing::debug!(key = %message.key(), "Hook message received");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::client::send_hook_message;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    async fn wait_for_socket(path: &Path) {
        for _ in 0..100 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("socket never appeared: {}", path.display());
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("hook.sock");
        let (tx, mut rx) = mpsc::channel(8);

        let listener_path = socket_path.clone();
        let listener = tokio::spawn(async move { run_listener(&listener_path, tx).await });
        wait_for_socket(&socket_path).await;

        let posted = HookMessage::Posted {
            key: "n1".to_string(),
            package: "com.whatsapp".to_string(),
            app_label: None,
            sender: Some("Alice".to_string()),
            content: Some("Hi".to_string()),
            icon_path: None,
            reply_handle: Some("action-1".to_string()),
        };
        let removed = HookMessage::Removed {
            key: "n1".to_string(),
        };

        let path = socket_path.clone();
        let (first, second) = (posted.clone(), removed.clone());
        tokio::task::spawn_blocking(move || {
            send_hook_message(&path, &first).unwrap();
            send_hook_message(&path, &second).unwrap();
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), posted);
        assert_eq!(rx.recv().await.unwrap(), removed);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_back_to_back_clients_keep_their_order() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("hook.sock");
        let (tx, mut rx) = mpsc::channel(8);

        let listener_path = socket_path.clone();
        tokio::spawn(async move { run_listener(&listener_path, tx).await });
        wait_for_socket(&socket_path).await;

        let messages: Vec<HookMessage> = (0..40)
            .map(|i| {
                let key = format!("n{}", i / 2);
                if i % 2 == 0 {
                    HookMessage::Posted {
                        key,
                        package: "org.telegram.messenger".to_string(),
                        app_label: None,
                        sender: None,
                        content: Some(format!("message {}", i)),
                        icon_path: None,
                        reply_handle: None,
                    }
                } else {
                    HookMessage::Removed { key }
                }
            })
            .collect();

        let path = socket_path.clone();
        let outgoing = messages.clone();
        let sender = tokio::task::spawn_blocking(move || {
            for message in &outgoing {
                send_hook_message(&path, message).unwrap();
            }
        });

        let mut received = Vec::new();
        while received.len() < messages.len() {
            let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(message);
        }
        sender.await.unwrap();
        assert_eq!(received, messages);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("hook.sock");
        let (tx, mut rx) = mpsc::channel(8);

        let listener_path = socket_path.clone();
        tokio::spawn(async move { run_listener(&listener_path, tx).await });
        wait_for_socket(&socket_path).await;

        let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        stream.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        drop(stream);

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(received.is_err(), "oversized message must not be forwarded");
    }
}
