use crate::extractor::{Extraction, Extractor};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the pipeline to the engine thread.
enum EngineRequest {
    Extract {
        image_path: PathBuf,
        /// Fired when the engine thread picks the request up.
        started: oneshot::Sender<()>,
        reply: oneshot::Sender<Extraction>,
    },
}

/// Receivers for one queued request.
struct Pending {
    started: oneshot::Receiver<()>,
    reply: oneshot::Receiver<Extraction>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn submit(&self, image_path: PathBuf) -> Result<Pending, EngineError> {
        let (started_tx, started_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image_path,
                started: started_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(Pending {
            started: started_rx,
            reply: reply_rx,
        })
    }

    /// Decode and analyze one image on the engine thread.
    pub async fn extract(&self, image_path: PathBuf) -> Result<Extraction, EngineError> {
        let pending = self.submit(image_path).await?;
        pending.reply.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Like [`extract`](Self::extract), but gives up after `limit`.
    ///
    /// The clock starts when the engine thread begins this request, so time
    /// spent queued behind an abandoned request does not count against it.
    /// A timed-out record is reported as [`Extraction::DecodeFailed`].
    pub async fn extract_within(
        &self,
        image_path: PathBuf,
        limit: Option<Duration>,
    ) -> Result<Extraction, EngineError> {
        let Some(limit) = limit else {
            return self.extract(image_path).await;
        };
        let pending = self.submit(image_path).await?;
        pending.started.await.map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(limit, pending.reply).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed),
            Err(_) => Ok(Extraction::DecodeFailed(format!(
                "timed out after {:.1}s",
                limit.as_secs_f32()
            ))),
        }
    }
}

/// Move the extractor onto a dedicated OS thread and return a handle to it.
///
/// Model sessions need `&mut` access and block for the whole inference, so
/// they live on their own thread instead of the async runtime. The thread
/// exits when every handle has been dropped.
pub fn spawn_engine(mut extractor: Extractor) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facebank-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract {
                        image_path,
                        started,
                        reply,
                    } => {
                        let _ = started.send(());
                        let result = extractor.extract(&image_path);
                        // The caller may have timed out and dropped the receiver.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SelectionPolicy;
    use facebank_core::{
        AnalyzerError, BoundingBox, DecodeError, DetectedFace, Embedding, FaceAnalyzer,
        ImageDecoder,
    };
    use image::RgbImage;
    use std::path::Path;

    struct BlankDecoder;

    impl ImageDecoder for BlankDecoder {
        fn decode(&self, _path: &Path) -> Result<RgbImage, DecodeError> {
            Ok(RgbImage::new(2, 2))
        }
    }

    /// Sleeps `delays[n]` on its n-th call, nothing once the list runs out.
    struct SlowAnalyzer {
        delays: Vec<Duration>,
        calls: usize,
    }

    impl FaceAnalyzer for SlowAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            if let Some(delay) = self.delays.get(self.calls) {
                std::thread::sleep(*delay);
            }
            self.calls += 1;
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 0.9,
                    landmarks: None,
                },
                embedding: Embedding::from_values(vec![1.0, 0.0]),
            }])
        }
    }

    fn engine(delays: &[Duration]) -> EngineHandle {
        let analyzer = SlowAnalyzer {
            delays: delays.to_vec(),
            calls: 0,
        };
        let extractor = Extractor::new(
            Box::new(BlankDecoder),
            Box::new(analyzer),
            SelectionPolicy::FirstDetected,
            2,
        );
        spawn_engine(extractor).unwrap()
    }

    #[tokio::test]
    async fn test_extract_round_trips_through_thread() {
        let handle = engine(&[]);
        let result = handle.extract(PathBuf::from("a.jpg")).await.unwrap();
        assert_eq!(result, Extraction::Embedded(Embedding::from_values(vec![1.0, 0.0])));
    }

    #[tokio::test]
    async fn test_timeout_is_a_decode_failure() {
        let handle = engine(&[Duration::from_millis(400)]);
        let result = handle
            .extract_within(PathBuf::from("a.jpg"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(matches!(result, Extraction::DecodeFailed(r) if r.contains("timed out")));

        // Engine keeps serving after an abandoned request.
        let next = handle.extract_within(PathBuf::from("b.jpg"), None).await.unwrap();
        assert!(matches!(next, Extraction::Embedded(_)));
    }

    #[tokio::test]
    async fn test_queue_wait_does_not_count_against_next_record() {
        let handle = engine(&[Duration::from_millis(700)]);
        let limit = Some(Duration::from_millis(250));

        let slow = handle.extract_within(PathBuf::from("slow.jpg"), limit).await.unwrap();
        assert!(matches!(slow, Extraction::DecodeFailed(_)));

        // Queued behind the abandoned request for ~450ms, then analyzed instantly.
        let fast = handle.extract_within(PathBuf::from("fast.jpg"), limit).await.unwrap();
        assert!(matches!(fast, Extraction::Embedded(_)), "{fast:?}");
    }
}
