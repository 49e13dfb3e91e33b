//! Desktop side of the relay
//!
//! Connects to a listening device, prints every notification it relays and
//! sends replies typed as `<key> <reply text>` lines.

use anyhow::{Context, Result};
use base64::Engine;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::{NotificationCodec, ReplyMessage, WireNotification};
use crate::transport::BoxedChannel;

/// Parse `<key> <reply text>`; the text keeps its inner whitespace
pub fn parse_reply_line(line: &str) -> Option<ReplyMessage> {
    let (key, reply) = line.trim().split_once(char::is_whitespace)?;
    let reply = reply.trim();
    if reply.is_empty() {
        return None;
    }
    Some(ReplyMessage::new(key, reply))
}

/// One printable line per notification
pub fn format_notification(notification: &WireNotification) -> String {
    let mut line = format!("[{}] ", notification.app_name);
    if let Some(sender) = &notification.sender {
        line.push_str(sender);
        line.push_str(": ");
    }
    line.push_str(&notification.content);
    if let Some(icon) = &notification.icon_base64 {
        match base64::engine::general_purpose::STANDARD.decode(icon) {
            Ok(bytes) => line.push_str(&format!(" (icon {} bytes)", bytes.len())),
            Err(_) => line.push_str(" (icon unreadable)"),
        }
    }
    line.push_str(&format!(" <{}>", notification.key));
    line
}

/// Run until the device closes the channel.
///
/// Replies are read from `input` until it ends; notifications are written to
/// `output` one per line.
pub async fn run_peer<R, W>(
    channel: BoxedChannel,
    codec: &NotificationCodec,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(channel);
    let mut decoder = codec.frame_decoder();
    let mut lines = input.lines();
    let mut input_open = true;
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read.context("Failed to read from device")?;
                if n == 0 {
                    tracing::info!("Device closed the channel");
                    break;
                }
                decoder.extend(&buf[..n]);
                while let Some(frame) = decoder.next_frame()? {
                    match codec.decode_notification(&frame) {
                        Ok(notification) => {
                            let line = format_notification(&notification);
                            output.write_all(line.as_bytes()).await?;
                            output.write_all(b"\n").await?;
                            output.flush().await?;
                        }
                        Err(e) => tracing::warn!("Ignoring frame from device: {}", e),
                    }
                }
            }
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read reply input")? {
                    Some(line) => match parse_reply_line(&line) {
                        Some(reply) => {
                            let frame = codec.frame(&codec.encode_reply(&reply)?)?;
                            writer.write_all(&frame).await.context("Failed to send reply")?;
                            writer.flush().await?;
                            tracing::debug!(key = %reply.key, "Reply sent");
                        }
                        None if line.trim().is_empty() => {}
                        None => tracing::warn!("Expected `<key> <reply text>`, got: {}", line),
                    },
                    None => input_open = false,
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{DecodeOutcome, NotificationEvent};

    #[test]
    fn test_parse_reply_line() {
        assert_eq!(
            parse_reply_line("n1   see you  at 8 "),
            Some(ReplyMessage::new("n1", "see you  at 8"))
        );
        assert_eq!(parse_reply_line("n1"), None);
        assert_eq!(parse_reply_line("   "), None);
    }

    #[test]
    fn test_format_notification() {
        let notification = WireNotification {
            app_name: "WhatsApp".to_string(),
            sender: Some("Alice".to_string()),
            content: "Hi".to_string(),
            icon_base64: Some("AAEC".to_string()),
            key: "n1".to_string(),
        };
        assert_eq!(
            format_notification(&notification),
            "[WhatsApp] Alice: Hi (icon 3 bytes) <n1>"
        );
    }

    #[tokio::test]
    async fn test_peer_prints_notifications_and_sends_replies() {
        let codec = NotificationCodec::default();
        let (peer_end, mut device) = tokio::io::duplex(4096);
        let mut output = Vec::new();

        let device_codec = codec.clone();
        let device_task = tokio::spawn(async move {
            let event = NotificationEvent::new("Signal", "Lunch?", "n7").with_sender("Bob");
            device
                .write_all(&device_codec.encode_frame(&event).unwrap())
                .await
                .unwrap();

            let mut decoder = device_codec.frame_decoder();
            let mut buf = [0u8; 256];
            let frame = loop {
                if let Some(frame) = decoder.next_frame().unwrap() {
                    break frame;
                }
                let n = device.read(&mut buf).await.unwrap();
                assert!(n > 0);
                decoder.extend(&buf[..n]);
            };
            device_codec.decode(&frame)
        });

        let input: &[u8] = b"n7 sure\n";
        let device_closed = async {
            run_peer(Box::new(peer_end), &codec, input, &mut output)
                .await
                .unwrap();
        };
        let (decoded, ()) = tokio::join!(device_task, device_closed);

        assert_eq!(
            decoded.unwrap(),
            DecodeOutcome::Reply(ReplyMessage::new("n7", "sure"))
        );
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "[Signal] Bob: Lunch? <n7>\n"
        );
    }
}
