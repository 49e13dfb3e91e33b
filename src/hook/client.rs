//! Client used by the platform hook to deliver notification events

use anyhow::{Context, Result};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use super::protocol::HookMessage;

/// Send one hook message to a running relay
///
/// # Arguments
/// * `socket_path` - Path to the relay's hook socket
/// * `message` - The message to deliver
pub fn send_hook_message(socket_path: &Path, message: &HookMessage) -> Result<()> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to socket: {}", socket_path.display()))?;

    stream
        .set_write_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set write timeout")?;

    send_message(&stream, message)
}

fn send_message(mut stream: &UnixStream, message: &HookMessage) -> Result<()> {
    let json = serde_json::to_vec(message).context("Failed to serialize message")?;

    let len = json.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .context("Failed to write message")?;
    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    #[test]
    fn test_send_hook_message() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let listener = UnixListener::bind(&socket_path).unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len_buf = [0u8; 4];
            std::io::Read::read_exact(&mut stream, &mut len_buf).unwrap();
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            std::io::Read::read_exact(&mut stream, &mut buf).unwrap();
            String::from_utf8(buf).unwrap()
        });

        let msg = HookMessage::Removed {
            key: "n1".to_string(),
        };
        send_hook_message(&socket_path, &msg).unwrap();

        let received = handle.join().unwrap();
        assert_eq!(received, r#"{"type":"removed","key":"n1"}"#);
    }

    #[test]
    fn test_missing_socket_is_reported() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("absent.sock");
        let msg = HookMessage::Removed {
            key: "n1".to_string(),
        };

        let err = send_hook_message(&socket_path, &msg).unwrap_err();
        assert!(err.to_string().contains("absent.sock"));
    }
}
