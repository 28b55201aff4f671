//! A framed binary bearer over TCP.

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{error, trace};

use quorus_codec::framing::{self, FrameHeader, HEADER_LENGTH, PROTOCOL_VERSION};

const BUFFER_LEN: usize = 1024 * 10;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no data available in bearer to complete frame")]
    EmptyBearer,

    #[error("bearer I/O error")]
    BearerIo(#[source] tokio::io::Error),

    #[error("malformed frame")]
    Framing(#[source] framing::Error),
}

pub struct Bearer(TcpStream);

impl Bearer {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, tokio::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self(stream))
    }

    pub async fn accept(listener: &TcpListener) -> tokio::io::Result<(Self, std::net::SocketAddr)> {
        let (stream, addr) = listener.accept().await?;
        Ok((Self(stream), addr))
    }

    pub async fn readable(&self) -> tokio::io::Result<()> {
        self.0.readable().await
    }

    fn try_read(&mut self, buf: &mut [u8]) -> tokio::io::Result<usize> {
        self.0.try_read(buf)
    }

    async fn write_all(&mut self, buf: &[u8]) -> tokio::io::Result<()> {
        self.0.write_all(buf).await
    }

    async fn flush(&mut self) -> tokio::io::Result<()> {
        self.0.flush().await
    }
}

/// Buffered frame reads and writes on top of a [`Bearer`].
pub struct FrameBuffer(Bearer, Vec<u8>);

impl FrameBuffer {
    pub fn new(bearer: Bearer) -> Self {
        Self(bearer, Vec::with_capacity(BUFFER_LEN))
    }

    /// Cancel-safe loop that reads from the bearer until a certain len
    async fn cancellable_read(&mut self, required: usize) -> Result<(), Error> {
        loop {
            if self.1.len() >= required {
                break Ok(());
            }

            self.0.readable().await.map_err(Error::BearerIo)?;
            trace!("bearer is readable");

            let remaining = required - self.1.len();
            let mut buf = vec![0u8; remaining];

            match self.0.try_read(&mut buf) {
                Ok(0) => {
                    trace!("empty bearer");
                    break Err(Error::EmptyBearer);
                }
                Ok(n) => {
                    trace!(n, "found data on bearer");
                    self.1.extend_from_slice(&buf[0..n]);
                }
                Err(ref e) if e.kind() == tokio::io::ErrorKind::WouldBlock => {
                    trace!("reading from bearer would block");
                    continue;
                }
                Err(err) => {
                    error!(?err, "bearer IO error");
                    break Err(Error::BearerIo(err));
                }
            }
        }
    }

    /// Peek the available data in search for a frame header
    async fn peek_header(&mut self) -> Result<FrameHeader, Error> {
        trace!("waiting for header buf");
        self.cancellable_read(HEADER_LENGTH).await?;

        let header = FrameHeader::from(&self.1[..HEADER_LENGTH]);

        if header.version != PROTOCOL_VERSION {
            return Err(Error::Framing(framing::Error::VersionMismatch(
                header.version,
            )));
        }

        if (header.size as usize) < HEADER_LENGTH {
            return Err(Error::Framing(framing::Error::SizeBelowHeader(header.size)));
        }

        Ok(header)
    }

    /// Cancel-safe read of a full frame from the bearer. Returns the
    /// request kind and the payload.
    pub async fn read_frame(&mut self) -> Result<(u16, Vec<u8>), Error> {
        let header = self.peek_header().await?;

        trace!("waiting for full frame buf");
        let frame_size = header.size as usize;

        self.cancellable_read(frame_size).await?;

        trace!("draining frame buffer");
        let frame = self.1.drain(..frame_size);
        let payload = frame.skip(HEADER_LENGTH).collect();

        Ok((header.kind, payload))
    }

    /// Write an already built frame to the bearer.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), std::io::Error> {
        self.0.write_all(frame).await?;
        self.0.flush().await?;

        if tracing::event_enabled!(tracing::Level::TRACE) {
            trace!(data = hex::encode(frame), "write to bearer");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorus_codec::framing::build_frame;

    #[tokio::test]
    async fn frames_roundtrip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (bearer, _) = Bearer::accept(&listener).await.unwrap();
            let mut buffer = FrameBuffer::new(bearer);

            let (kind, payload) = buffer.read_frame().await.unwrap();
            assert_eq!(kind, framing::EXCHANGE_PUBLIC_PEERS);
            assert_eq!(payload, vec![1, 2, 3, 4]);

            buffer
                .write_frame(&build_frame(framing::BROADCAST_TRANSFER, &[7; 144]))
                .await
                .unwrap();
        });

        let bearer = Bearer::connect(addr).await.unwrap();
        let mut buffer = FrameBuffer::new(bearer);

        buffer
            .write_frame(&build_frame(framing::EXCHANGE_PUBLIC_PEERS, &[1, 2, 3, 4]))
            .await
            .unwrap();

        let (kind, payload) = buffer.read_frame().await.unwrap();
        assert_eq!(kind, framing::BROADCAST_TRANSFER);
        assert_eq!(payload, vec![7; 144]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn concatenated_frames_are_read_one_by_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (bearer, _) = Bearer::accept(&listener).await.unwrap();
            let mut buffer = FrameBuffer::new(bearer);

            // both frames land in one write
            let mut bytes = build_frame(framing::SUB_TYPED, &[1; 16]);
            bytes.extend(build_frame(framing::SUB_TYPED, &[2; 16]));
            buffer.write_frame(&bytes).await.unwrap();
        });

        let bearer = Bearer::connect(addr).await.unwrap();
        let mut buffer = FrameBuffer::new(bearer);

        let (_, first) = buffer.read_frame().await.unwrap();
        let (_, second) = buffer.read_frame().await.unwrap();

        assert_eq!(first, vec![1; 16]);
        assert_eq!(second, vec![2; 16]);

        server.await.unwrap();
    }
}
