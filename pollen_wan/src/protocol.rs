use anyhow::{Result, anyhow};
use bytes::Bytes;

/// ALPN protocol identifier for pollen peers
pub const ALPN: &[u8] = b"pollen-p2p/1";

/// Largest frame accepted from a peer (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Prefix `payload` with its length (u32, big-endian)
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "Frame too large: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_SIZE
        ));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Validate a received length prefix
pub fn frame_len(prefix: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "Frame too large: {} bytes (max {})",
            len,
            MAX_FRAME_SIZE
        ));
    }
    Ok(len)
}

/// Write one frame to an iroh send stream
pub async fn send_frame(send: &mut iroh::endpoint::SendStream, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(payload)?;
    send.write_all(&frame).await?;
    Ok(())
}

/// Read one frame from an iroh receive stream
pub async fn recv_frame(recv: &mut iroh::endpoint::RecvStream) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = frame_len(len_buf)?;

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
