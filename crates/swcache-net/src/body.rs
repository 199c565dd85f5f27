//! Single-read request and response bodies.
//!
//! Reading a body consumes it. A component that needs to both forward and
//! inspect a body must call [`Body::try_clone`] first and read the copy.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::NetError;

/// Chunk sender feeding a streaming [`Body`].
pub type BodySender = mpsc::UnboundedSender<Result<Bytes, NetError>>;

/// Request or response body.
#[derive(Debug, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Fully buffered body.
    Full(Bytes),
    /// Body still arriving in chunks.
    Stream(mpsc::UnboundedReceiver<Result<Bytes, NetError>>),
}

impl Body {
    /// Create a streaming body and the sender that feeds it.
    pub fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Body::Stream(rx))
    }

    /// Whether the body is known to be empty without reading it.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(bytes) => bytes.is_empty(),
            Body::Stream(_) => false,
        }
    }

    /// Produce an independent readable copy of this body.
    ///
    /// Buffered bodies are shared. A streaming body is teed: `self` is
    /// replaced with one branch and the other is returned, each receiving
    /// every chunk. Teeing a stream requires a tokio runtime.
    pub fn try_clone(&mut self) -> Result<Body, NetError> {
        let runtime = match self {
            Body::Empty => return Ok(Body::Empty),
            Body::Full(bytes) => return Ok(Body::Full(bytes.clone())),
            Body::Stream(_) => tokio::runtime::Handle::try_current()
                .map_err(|e| NetError::BodyUnavailable(format!("cannot tee stream: {}", e)))?,
        };

        let mut source = match std::mem::take(self) {
            Body::Stream(rx) => rx,
            other => {
                *self = other;
                return Err(NetError::BodyUnavailable("body changed while cloning".into()));
            }
        };

        let (left_tx, left) = Body::channel();
        let (right_tx, right) = Body::channel();

        runtime.spawn(async move {
            while let Some(chunk) = source.recv().await {
                let copy = match &chunk {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(e) => Err(e.duplicate()),
                };
                let left_gone = left_tx.send(chunk).is_err();
                let right_gone = right_tx.send(copy).is_err();
                if left_gone && right_gone {
                    break;
                }
            }
        });

        *self = left;
        Ok(right)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Read the whole body as text, replacing invalid UTF-8 sequences.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Full(bytes)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_body_clone_reads_twice() {
        let mut body = Body::from("hello");
        let copy = body.try_clone().unwrap();

        assert_eq!(copy.text().await.unwrap(), "hello");
        assert_eq!(body.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_stream_tee_delivers_every_chunk_to_both() {
        let (tx, mut body) = Body::channel();
        let copy = body.try_clone().unwrap();

        tx.send(Ok(Bytes::from_static(b"ab"))).unwrap();
        tx.send(Ok(Bytes::from_static(b"cd"))).unwrap();
        drop(tx);

        assert_eq!(copy.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn test_stream_tee_survives_dropped_branch() {
        let (tx, mut body) = Body::channel();
        drop(body.try_clone().unwrap());

        tx.send(Ok(Bytes::from_static(b"x"))).unwrap();
        drop(tx);

        assert_eq!(body.text().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_stream_error_reaches_both_branches() {
        let (tx, mut body) = Body::channel();
        let copy = body.try_clone().unwrap();

        tx.send(Err(NetError::RequestFailed("reset".into()))).unwrap();
        drop(tx);

        assert!(copy.bytes().await.is_err());
        assert!(body.bytes().await.is_err());
    }

    #[test]
    fn test_empty_conversions() {
        assert!(Body::from(String::new()).is_empty());
        assert!(matches!(Body::from(Vec::new()), Body::Empty));
        assert!(!Body::from("x").is_empty());
    }
}
