use crate::common::frame::FrameType;
use crate::common::phys::PhysLayer;

/// Knows how to open the transport of a channel
///
/// Opening consumes a clone so that the pending attempt does not borrow the task.
#[derive(Clone)]
pub(crate) enum Connector {
    Tcp {
        host: String,
        port: u16,
    },
    #[cfg(feature = "serial")]
    Serial {
        path: String,
        settings: crate::serial::SerialSettings,
    },
    #[cfg(test)]
    Mock(
        std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<tokio::io::DuplexStream>>>,
        FrameType,
    ),
    /// an attempt that never completes on its own
    #[cfg(test)]
    Stalled(FrameType),
}

impl Connector {
    pub(crate) fn frame_type(&self) -> FrameType {
        match self {
            Connector::Tcp { .. } => FrameType::Tcp,
            #[cfg(feature = "serial")]
            Connector::Serial { .. } => FrameType::Rtu,
            #[cfg(test)]
            Connector::Mock(_, frame_type) => *frame_type,
            #[cfg(test)]
            Connector::Stalled(frame_type) => *frame_type,
        }
    }

    pub(crate) async fn open(self) -> Result<PhysLayer, std::io::Error> {
        match self {
            Connector::Tcp { host, port } => {
                let socket = tokio::net::TcpStream::connect((host.as_str(), port)).await?;
                if let Err(err) = socket.set_nodelay(true) {
                    tracing::warn!("unable to enable TCP_NODELAY: {}", err);
                }
                Ok(PhysLayer::new_tcp(socket))
            }
            #[cfg(feature = "serial")]
            Connector::Serial { path, settings } => {
                let stream = crate::serial::open(path.as_str(), settings)?;
                Ok(PhysLayer::new_serial(stream, settings.baud_rate))
            }
            #[cfg(test)]
            Connector::Mock(streams, _) => {
                let next = streams.lock().ok().and_then(|mut x| x.pop_front());
                match next {
                    Some(stream) => Ok(PhysLayer::new_mock(stream)),
                    None => Err(std::io::Error::from(
                        std::io::ErrorKind::ConnectionRefused,
                    )),
                }
            }
            #[cfg(test)]
            Connector::Stalled(_) => std::future::pending().await,
        }
    }
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::Tcp { host, port } => write!(f, "{host}:{port}"),
            #[cfg(feature = "serial")]
            Connector::Serial { path, settings } => {
                write!(f, "{path} ({} baud)", settings.baud_rate)
            }
            #[cfg(test)]
            Connector::Mock(_, _) => f.write_str("mock"),
            #[cfg(test)]
            Connector::Stalled(_) => f.write_str("stalled"),
        }
    }
}
