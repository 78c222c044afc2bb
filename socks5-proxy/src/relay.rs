//! Full-duplex byte pump between the client and the upstream connection.

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// High-water mark for a single in-flight buffer. Because a direction never reads
/// again until its previous read has been fully flushed downstream, this single
/// buffer size is the entire backpressure mechanism: there is no separate low-water
/// mark to track.
const BUFFER_SIZE: usize = 64 * 1024;

/// Pumps bytes between `client` and `upstream` until either side reaches EOF or
/// errors. The first direction to stop wins: the other is dropped immediately,
/// closing its socket rather than waiting for an independent half-close.
pub async fn relay(client: TcpStream, upstream: TcpStream) -> io::Result<()> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let client_to_upstream = pump(&mut client_read, &mut upstream_write);
    let upstream_to_client = pump(&mut upstream_read, &mut client_write);

    tokio::select! {
        result = client_to_upstream => result,
        result = upstream_to_client => result,
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = async { listener.accept().await.unwrap().0 };
        let (a, b) = tokio::join!(connect, accept);
        (a.unwrap(), b)
    }

    #[tokio::test]
    async fn bytes_written_by_one_side_are_pumped_to_the_other_in_order() {
        let (client_a, client_b) = loopback_pair().await;
        let (upstream_a, upstream_b) = loopback_pair().await;

        tokio::spawn(relay(client_b, upstream_b));

        let mut client_a = client_a;
        let mut upstream_a = upstream_a;

        client_a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        upstream_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        upstream_a.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn eof_on_one_side_ends_the_relay() {
        let (client_a, client_b) = loopback_pair().await;
        let (upstream_a, upstream_b) = loopback_pair().await;

        let relay_task = tokio::spawn(relay(client_b, upstream_b));

        drop(client_a);
        drop(upstream_a);

        relay_task.await.unwrap().unwrap();
    }
}
