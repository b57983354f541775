//! Control-channel framing: every message is a 4-byte big-endian length
//! followed by that many bytes of UTF-8 text.

use crate::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::MAX_MSG_SIZE;

/// Send one text message over the control stream
pub async fn send_msg<W>(send: &mut W, msg: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = msg.len();
    if len > MAX_MSG_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_MSG_SIZE,
        });
    }
    send.write_all(&(len as u32).to_be_bytes()).await?;
    send.write_all(msg.as_bytes()).await?;
    Ok(())
}

/// Receive one text message from the control stream
pub async fn recv_msg<R>(recv: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MSG_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_MSG_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_keep_their_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        send_msg(&mut client, "2").await.unwrap();
        send_msg(&mut client, "first name.zim").await.unwrap();
        send_msg(&mut client, "").await.unwrap();

        assert_eq!(recv_msg(&mut server).await.unwrap(), "2");
        assert_eq!(recv_msg(&mut server).await.unwrap(), "first name.zim");
        assert_eq!(recv_msg(&mut server).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let bad_len = (MAX_MSG_SIZE + 1000) as u32;
        client.write_all(&bad_len.to_be_bytes()).await.unwrap();

        let err = recv_msg(&mut server).await.unwrap_err();
        assert!(
            err.to_string().contains("Message too large"),
            "Error should be about message size: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            recv_msg(&mut server).await,
            Err(FrameError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&2u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xff, 0xfe]).await.unwrap();

        assert!(matches!(
            recv_msg(&mut server).await,
            Err(FrameError::InvalidText(_))
        ));
    }
}
