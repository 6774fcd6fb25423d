use crate::error::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use futures_util::future;
use futures_util::sink::{Sink, SinkExt};
use futures_util::stream::{BoxStream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;

/// A data frame on the duplex channel. Control frames never surface here.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RuntimeError> + Send>>;
pub type FrameStream = BoxStream<'static, RuntimeResult<Frame>>;

/// Opens one connection. The stream ends, or yields an error, when the
/// connection closes for any reason.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> RuntimeResult<(FrameSink, FrameStream)>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> RuntimeResult<(FrameSink, FrameStream)> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RuntimeError::Channel(e.to_string()))?;

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| RuntimeError::Channel(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, RuntimeError>(Message::from(frame))));

        let stream = ws_stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => Some(Err(RuntimeError::Channel(format!(
                    "closed by server: {:?}",
                    frame
                )))),
                Ok(_) => None,
                Err(e) => Some(Err(RuntimeError::Channel(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_message() {
        assert_eq!(
            Message::from(Frame::Text("hi".to_string())),
            Message::Text("hi".into())
        );
        assert_eq!(
            Message::from(Frame::Binary(vec![1, 2])),
            Message::Binary(vec![1u8, 2].into())
        );
    }

    #[tokio::test]
    async fn test_ws_connect_refused() {
        let connector = WsConnector::new("ws://127.0.0.1:1/ws/chat");
        assert!(matches!(
            connector.connect().await,
            Err(RuntimeError::Channel(_))
        ));
    }
}
