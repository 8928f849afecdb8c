use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use super::{CameraConstraints, CameraDevice, CameraError, VideoStream};

/// Requests the bridge sends to the front-end, which owns the media device.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeSignal {
    #[serde(rename_all = "camelCase")]
    Open {
        request_id: u64,
        constraints: CameraConstraints,
    },
    Release,
}

type Notifier = Box<dyn Fn(BridgeSignal) + Send + Sync>;

struct PendingOpen {
    request_id: u64,
    reply: oneshot::Sender<Result<(), CameraError>>,
}

struct BridgeInner {
    notifier: Notifier,
    next_request: AtomicU64,
    pending: Mutex<Option<PendingOpen>>,
    frames: watch::Sender<Option<Arc<RgbImage>>>,
}

impl BridgeInner {
    fn notify(&self, signal: BridgeSignal) {
        (self.notifier)(signal);
    }
}

/// Camera whose stream lives in the webview. `open` asks the front-end for a
/// stream and waits for `resolve_request`; frames are pushed in with
/// `push_frame` and the latest one is what `grab_frame` returns.
#[derive(Clone)]
pub struct BridgeCamera {
    inner: Arc<BridgeInner>,
}

impl BridgeCamera {
    pub fn new(notifier: impl Fn(BridgeSignal) + Send + Sync + 'static) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            inner: Arc::new(BridgeInner {
                notifier: Box::new(notifier),
                next_request: AtomicU64::new(1),
                pending: Mutex::new(None),
                frames,
            }),
        }
    }

    /// Completes the open request `request_id`. Returns false when no such
    /// request is waiting (stale id, or the requester gave up).
    pub fn resolve_request(&self, request_id: u64, outcome: Result<(), CameraError>) -> bool {
        let pending = {
            let mut guard = match self.inner.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.take() {
                Some(pending) if pending.request_id == request_id => Some(pending),
                other => {
                    *guard = other;
                    None
                }
            }
        };

        let granted = outcome.is_ok();
        let delivered = match pending {
            Some(pending) => pending.reply.send(outcome).is_ok(),
            None => false,
        };

        if !delivered && granted {
            // Nobody will own this stream; let the front-end shut it down.
            warn!("camera request {request_id} resolved after it was abandoned");
            self.inner.notify(BridgeSignal::Release);
        }
        delivered
    }

    pub fn push_frame(&self, frame: RgbImage) {
        self.inner.frames.send_replace(Some(Arc::new(frame)));
    }

    /// Decodes an encoded still (JPEG/PNG/WebP as produced by a canvas).
    pub fn push_encoded_frame(&self, bytes: &[u8]) -> Result<()> {
        let frame = image::load_from_memory(bytes)
            .context("failed to decode camera frame")?
            .to_rgb8();
        debug!("received {}x{} camera frame", frame.width(), frame.height());
        self.push_frame(frame);
        Ok(())
    }
}

#[async_trait]
impl CameraDevice for BridgeCamera {
    async fn open(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        let request_id = self.inner.next_request.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();

        let superseded = {
            let mut guard = match self.inner.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.replace(PendingOpen {
                request_id,
                reply: reply_tx,
            })
        };
        if let Some(previous) = superseded {
            let _ = previous.reply.send(Err(CameraError::Other(
                "superseded by a newer camera request".into(),
            )));
        }

        self.inner.frames.send_replace(None);
        self.inner.notify(BridgeSignal::Open {
            request_id,
            constraints: *constraints,
        });

        match reply_rx.await {
            Ok(Ok(())) => Ok(Box::new(BridgeStream {
                inner: self.inner.clone(),
                frames: self.inner.frames.subscribe(),
                active: true,
            })),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CameraError::Other("camera request abandoned".into())),
        }
    }
}

struct BridgeStream {
    inner: Arc<BridgeInner>,
    frames: watch::Receiver<Option<Arc<RgbImage>>>,
    active: bool,
}

impl VideoStream for BridgeStream {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError> {
        if !self.active {
            return Err(CameraError::Other("camera stream stopped".into()));
        }
        let latest = self.frames.borrow();
        match latest.as_ref() {
            Some(frame) => Ok(RgbImage::clone(frame)),
            None => Err(CameraError::Other(
                "no frame received from the camera yet".into(),
            )),
        }
    }

    fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.inner.notify(BridgeSignal::Release);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for BridgeStream {
    fn drop(&mut self) {
        self.stop();
    }
}
