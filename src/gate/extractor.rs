//! Client for the face-analysis sidecar.
//!
//! Model inference does not run in-process; a sidecar service accepts raw
//! image bytes and returns the detected faces with their embeddings and
//! bounding boxes. Extraction can be expensive, so every call is bounded by
//! a configurable deadline.

use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::gate::biometric::{Embedding, EmbeddingExtractor};
use crate::APP_USER_AGENT;

/// Default deadline for one extraction call, in seconds.
pub const DEFAULT_EXTRACTION_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extractor returned status {0}")]
    Status(StatusCode),
    #[error("biometric extraction timeout")]
    Timeout,
}

#[derive(Debug, Deserialize)]
struct FaceAnalysis {
    faces: Vec<DetectedFace>,
}

#[derive(Debug, Deserialize)]
struct DetectedFace {
    embedding: Vec<f32>,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

impl DetectedFace {
    fn bbox_area(&self) -> f32 {
        self.bbox.map_or(0.0, |[x1, y1, x2, y2]| {
            (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
        })
    }
}

/// When several faces are in frame, the largest bounding box wins; ties keep
/// the sidecar's detection order.
fn pick_face(faces: Vec<DetectedFace>) -> Option<DetectedFace> {
    let mut best: Option<DetectedFace> = None;
    for face in faces {
        match &best {
            Some(current) if face.bbox_area() <= current.bbox_area() => {}
            _ => best = Some(face),
        }
    }
    best
}

/// HTTP embedding extractor talking to the face-analysis sidecar.
#[derive(Debug, Clone)]
pub struct RemoteExtractor {
    client: Client,
    url: String,
    deadline: Duration,
}

impl RemoteExtractor {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, deadline: Duration) -> Result<Self, ExtractorError> {
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            client,
            url,
            deadline,
        })
    }

    async fn request(&self, image: &[u8]) -> Result<Option<Embedding>, ExtractorError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractorError::Status(response.status()));
        }

        let analysis: FaceAnalysis = response.json().await?;
        debug!("Sidecar detected {} face(s)", analysis.faces.len());

        Ok(pick_face(analysis.faces).map(|face| face.embedding))
    }
}

impl EmbeddingExtractor for RemoteExtractor {
    fn extract<'a>(
        &'a self,
        image: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<Embedding>, ExtractorError>> + Send + 'a>> {
        Box::pin(async move {
            match timeout(self.deadline, self.request(image)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractorError::Timeout),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn face(embedding: Vec<f32>, bbox: Option<[f32; 4]>) -> DetectedFace {
        DetectedFace { embedding, bbox }
    }

    #[test]
    fn no_faces_yields_none() {
        assert!(pick_face(vec![]).is_none());
    }

    #[test]
    fn largest_bbox_wins() {
        let picked = pick_face(vec![
            face(vec![1.0], Some([0.0, 0.0, 10.0, 10.0])),
            face(vec![2.0], Some([0.0, 0.0, 50.0, 50.0])),
            face(vec![3.0], Some([0.0, 0.0, 20.0, 20.0])),
        ]);
        assert_eq!(picked.map(|f| f.embedding), Some(vec![2.0]));
    }

    #[test]
    fn ties_keep_detection_order() {
        let picked = pick_face(vec![
            face(vec![1.0], Some([0.0, 0.0, 10.0, 10.0])),
            face(vec![2.0], Some([0.0, 0.0, 10.0, 10.0])),
        ]);
        assert_eq!(picked.map(|f| f.embedding), Some(vec![1.0]));
    }

    #[test]
    fn missing_bbox_counts_as_zero_area() {
        let picked = pick_face(vec![
            face(vec![1.0], None),
            face(vec![2.0], Some([0.0, 0.0, 1.0, 1.0])),
        ]);
        assert_eq!(picked.map(|f| f.embedding), Some(vec![2.0]));
    }

    #[test]
    fn analysis_payload_deserializes() -> Result<(), serde_json::Error> {
        let analysis: FaceAnalysis = serde_json::from_str(
            r#"{"faces": [{"embedding": [0.1, -0.2], "bbox": [1.0, 2.0, 3.0, 4.0]}]}"#,
        )?;
        assert_eq!(analysis.faces.len(), 1);
        assert_eq!(analysis.faces[0].embedding, vec![0.1, -0.2]);
        Ok(())
    }

    #[test]
    fn bbox_is_optional_in_payload() -> Result<(), serde_json::Error> {
        let analysis: FaceAnalysis =
            serde_json::from_str(r#"{"faces": [{"embedding": [0.5]}]}"#)?;
        assert!(analysis.faces[0].bbox.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_sidecar_is_a_transport_error() {
        let extractor = RemoteExtractor::new(
            "http://127.0.0.1:1/analyze".to_string(),
            Duration::from_secs(5),
        )
        .expect("client builds");

        let result = extractor.extract(b"jpeg bytes").await;
        assert!(matches!(result, Err(ExtractorError::Transport(_))));
    }

    #[tokio::test]
    async fn silent_sidecar_times_out() {
        // Accept the connection and never answer.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut sink = [0u8; 1024];
                while let Ok(n) = socket.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        let extractor = RemoteExtractor::new(
            format!("http://{addr}/analyze"),
            Duration::from_millis(200),
        )
        .expect("client builds");

        let result = extractor.extract(b"jpeg bytes").await;
        assert!(matches!(result, Err(ExtractorError::Timeout)));
    }
}
