use rollcall_core::{EncodeError, Embedding, FaceEncoder};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image and embed every face in it.
    pub async fn encode(&self, image: Vec<u8>) -> Result<Vec<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Inference sessions need exclusive access, so the encoder lives on one
/// thread and requests queue on a bounded channel.
pub fn spawn_engine(
    mut encoder: Box<dyn FaceEncoder>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(dimension = encoder.dimension(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { image, reply } => {
                        let result = run_encode(encoder.as_mut(), &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_encode(encoder: &mut dyn FaceEncoder, bytes: &[u8]) -> Result<Vec<Embedding>, EngineError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| EngineError::InvalidImage(e.to_string()))?
        .to_rgb8();

    let embeddings = encoder.encode(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = embeddings.len(),
        "encoded image"
    );
    Ok(embeddings)
}
