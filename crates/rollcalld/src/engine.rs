use crate::preview::PreviewPublisher;
use rollcall_core::face::crop_face;
use rollcall_core::{
    AttendanceLedger, BoundingBox, DimensionMismatch, Embedding, EmbeddingStore, EuclideanMatcher,
    FaceDetector, FaceEmbedder, LedgerError, Matcher,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What happened to one detected face.
#[derive(Debug, Clone, Serialize)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    /// Matched identity or "Unknown".
    pub name: String,
    /// Minimum distance; `None` when the store is empty.
    pub distance: Option<f32>,
    pub matched: bool,
    /// A new ledger row was appended for this face.
    pub recorded: bool,
    /// Matching or ledger failure for this face only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of processing one submitted image.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    /// Detected regions dropped because cropping or embedding failed.
    pub skipped: usize,
}

/// Result of matching and recording one externally computed embedding.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub name: String,
    pub distance: Option<f32>,
    pub matched: bool,
    pub recorded: bool,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    SubmitImage {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<FrameReport, EngineError>>,
    },
    SubmitEmbedding {
        values: Vec<f32>,
        reply: oneshot::Sender<Result<Observation, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect, embed, match, and record every face in an encoded image.
    pub async fn submit_image(&self, image: Vec<u8>) -> Result<FrameReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SubmitImage { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Match and record an embedding computed by an external pipeline.
    pub async fn submit_embedding(&self, values: Vec<f32>) -> Result<Observation, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SubmitEmbedding { values, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Recognition state owned by the engine thread.
///
/// The store is shared read-only with the D-Bus side; the ledger is shared
/// for reads and locks internally around check-then-append.
pub struct Engine<D, E> {
    detector: D,
    embedder: E,
    store: Arc<EmbeddingStore>,
    threshold: f32,
    ledger: Arc<AttendanceLedger>,
    preview: Option<PreviewPublisher>,
}

impl<D: FaceDetector, E: FaceEmbedder> Engine<D, E> {
    pub fn new(
        detector: D,
        embedder: E,
        store: Arc<EmbeddingStore>,
        threshold: f32,
        ledger: Arc<AttendanceLedger>,
    ) -> Self {
        Self {
            detector,
            embedder,
            store,
            threshold,
            ledger,
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: PreviewPublisher) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Match one embedding and record the identity if it is new today.
    pub fn observe(&self, probe: &Embedding) -> Result<Observation, EngineError> {
        let result = EuclideanMatcher.compare(probe, &self.store, self.threshold)?;
        let recorded = self.ledger.record(result.label())?;
        tracing::debug!(
            name = result.label(),
            distance = result.distance,
            recorded,
            "observation"
        );
        Ok(Observation {
            name: result.label().to_string(),
            distance: finite(result.distance),
            matched: result.is_match(),
            recorded,
        })
    }

    /// Match and record one detected face. Failures land in the report.
    fn face_report(&self, bbox: BoundingBox, embedding: &Embedding) -> FaceReport {
        let result = match EuclideanMatcher.compare(embedding, &self.store, self.threshold) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "could not match face");
                return FaceReport {
                    bbox,
                    name: rollcall_core::UNKNOWN.to_string(),
                    distance: None,
                    matched: false,
                    recorded: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let (recorded, error) = match self.ledger.record(result.label()) {
            Ok(recorded) => (recorded, None),
            Err(e) => {
                tracing::warn!(name = result.label(), error = %e, "could not record attendance");
                (false, Some(e.to_string()))
            }
        };

        FaceReport {
            bbox,
            name: result.label().to_string(),
            distance: finite(result.distance),
            matched: result.is_match(),
            recorded,
            error,
        }
    }

    /// Process one encoded image.
    ///
    /// Per-face problems (bad crop, embedder failure, ledger error) never
    /// abort the frame; only an undecodable image is an error.
    pub fn process_image(&mut self, bytes: &[u8]) -> Result<FrameReport, EngineError> {
        let frame = image::load_from_memory(bytes)?.to_rgb8();

        let regions = match self.detector.detect(&frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; treating frame as faceless");
                Vec::new()
            }
        };

        let mut faces = Vec::with_capacity(regions.len());
        let mut skipped = 0;

        for bbox in regions {
            let Some(crop) = crop_face(&frame, &bbox) else {
                skipped += 1;
                continue;
            };
            let embedding = match self.embedder.embed(&crop) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed; skipping face");
                    skipped += 1;
                    continue;
                }
            };

            faces.push(self.face_report(bbox, &embedding));
        }

        tracing::info!(
            faces = faces.len(),
            skipped,
            recorded = faces.iter().filter(|f| f.recorded).count(),
            "frame processed"
        );

        if let Some(preview) = &self.preview {
            preview.publish(frame, &faces);
        }

        Ok(FrameReport { faces, skipped })
    }
}

/// `None` stands in for the +inf distance of an empty store, which JSON cannot carry.
fn finite(distance: f32) -> Option<f32> {
    distance.is_finite().then_some(distance)
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time, which also serializes all ledger
/// writes coming from D-Bus clients.
pub fn spawn_engine<D, E>(mut engine: Engine<D, E>, queue_depth: usize) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
    E: FaceEmbedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::SubmitImage { image, reply } => {
                        let _ = reply.send(engine.process_image(&image));
                    }
                    EngineRequest::SubmitEmbedding { values, reply } => {
                        let _ = reply.send(engine.observe(&Embedding::new(values)));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
