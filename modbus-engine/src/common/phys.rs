use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, Instant};

use crate::decode::{format_bytes, PhysDecodeLevel};

trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Byte stream underneath the framing layer
///
/// Every transport is driven through the same boxed stream. Serial lines also carry a
/// [`LinePacing`] that holds back writes until the line has been silent long enough.
pub(crate) struct PhysLayer {
    name: &'static str,
    stream: Box<dyn Stream>,
    pacing: Option<LinePacing>,
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

impl PhysLayer {
    fn new<S>(name: &'static str, stream: S, pacing: Option<LinePacing>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            name,
            stream: Box::new(stream),
            pacing,
        }
    }

    pub(crate) fn new_tcp(socket: tokio::net::TcpStream) -> Self {
        Self::new("Tcp", socket, None)
    }

    #[cfg(feature = "serial")]
    pub(crate) fn new_serial(stream: tokio_serial::SerialStream, baud_rate: u32) -> Self {
        Self::new("Serial", stream, Some(LinePacing::for_baud_rate(baud_rate)))
    }

    #[cfg(test)]
    pub(crate) fn new_mock(stream: tokio::io::DuplexStream) -> Self {
        Self::new("Mock", stream, None)
    }

    #[cfg(test)]
    pub(crate) fn with_pacing(mut self, pacing: LinePacing) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = self.stream.read(buffer).await?;
        if let Some(pacing) = &mut self.pacing {
            pacing.mark();
        }

        if level.enabled() {
            if let Some(x) = buffer.get(..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(level, x));
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if let Some(pacing) = &self.pacing {
            pacing.wait().await;
        }

        if level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(level, data));
        }

        let result = self.stream.write_all(data).await;
        if let Some(pacing) = &mut self.pacing {
            pacing.mark();
        }
        result
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        self.stream.shutdown().await
    }
}

/// Silent interval of 3.5 character times required between RTU frames
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct LinePacing {
    silence: Duration,
    last_activity: Option<Instant>,
}

impl LinePacing {
    // 1 start bit, 8 data bits, 1 parity or stop bit, 1 stop bit
    const BITS_PER_CHARACTER: u64 = 11;
    // above this rate the interval is fixed
    const MAX_TIMED_BAUD_RATE: u32 = 19200;
    const MIN_SILENCE: Duration = Duration::from_micros(1750);

    pub(crate) fn for_baud_rate(baud_rate: u32) -> Self {
        let silence = match baud_rate {
            1..=Self::MAX_TIMED_BAUD_RATE => {
                let character = Duration::from_secs(Self::BITS_PER_CHARACTER) / baud_rate;
                character * 35 / 10
            }
            _ => Self::MIN_SILENCE,
        };
        Self {
            silence,
            last_activity: None,
        }
    }

    async fn wait(&self) {
        if let Some(last) = self.last_activity {
            tokio::time::sleep_until(last + self.silence).await;
        }
    }

    fn mark(&mut self) {
        self.last_activity = Some(Instant::now());
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}
