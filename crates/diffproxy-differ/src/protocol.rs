use diffproxy_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length-prefixed JSON framing used on the worker's stdin/stdout pipe:
/// a 4-byte big-endian length followed by that many bytes of JSON. Framing
/// (rather than newline-delimited JSON) avoids ambiguity if a diff ever
/// contains embedded newlines in a way that leaks past `serde_json`'s
/// escaping, and keeps reads/writes a fixed two-step shape.
pub async fn write_framed<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to encode worker frame: {e}")))?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::WorkerPoolBroken("worker frame too large to encode".to_string()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to write worker frame: {e}")))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to write worker frame: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to flush worker frame: {e}")))?;
    Ok(())
}

/// Reads one frame written by `write_framed`. Returns `Ok(None)` on a clean
/// EOF before any bytes of the next length prefix arrive (the worker
/// process exited); any other IO failure or malformed payload is treated as
/// pool corruption by the caller.
pub async fn read_framed<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::WorkerPoolBroken(format!(
                "failed to read worker frame length: {e}"
            )))
        }
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to read worker frame body: {e}")))?;
    let value = serde_json::from_slice(&body)
        .map_err(|e| Error::WorkerPoolBroken(format!("failed to decode worker frame: {e}")))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
        msg: String,
    }

    #[tokio::test]
    async fn round_trips_a_value_through_a_buffer() {
        let mut buf = Vec::new();
        write_framed(&mut buf, &Ping { n: 7, msg: "hi".to_string() })
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let got: Ping = read_framed(&mut cursor).await.unwrap().unwrap();
        assert_eq!(got, Ping { n: 7, msg: "hi".to_string() });
    }

    #[tokio::test]
    async fn empty_stream_reads_as_clean_eof() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let got: Option<Ping> = read_framed(&mut cursor).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_worker_pool_broken() {
        let mut buf = Vec::new();
        write_framed(&mut buf, &Ping { n: 1, msg: "x".to_string() })
            .await
            .unwrap();
        buf.truncate(buf.len() - 1);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_framed::<_, Ping>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::WorkerPoolBroken(_)));
    }

    #[tokio::test]
    async fn multiple_frames_read_back_in_order() {
        let mut buf = Vec::new();
        write_framed(&mut buf, &Ping { n: 1, msg: "a".to_string() })
            .await
            .unwrap();
        write_framed(&mut buf, &Ping { n: 2, msg: "b".to_string() })
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first: Ping = read_framed(&mut cursor).await.unwrap().unwrap();
        let second: Ping = read_framed(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.n, 1);
        assert_eq!(second.n, 2);
    }
}
