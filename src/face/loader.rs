use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, info};
use tokio::sync::watch;

use super::{DetectorConfig, DetectorFactory, FaceError, ModelHandle};

type InitOutcome = Option<Result<ModelHandle, FaceError>>;

enum LoaderSlot {
    Empty,
    Loading(watch::Receiver<InitOutcome>),
    Ready(ModelHandle),
}

struct LoaderInner {
    factory: Arc<dyn DetectorFactory>,
    config: DetectorConfig,
    slot: Mutex<LoaderSlot>,
}

impl LoaderInner {
    fn lock_slot(&self) -> MutexGuard<'_, LoaderSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Lazily constructs the face detector once and hands out the cached handle.
///
/// Callers arriving while a construction is in flight wait for that same
/// attempt and get its outcome, success or failure. A failed attempt leaves
/// the loader empty; the next `initialize` call starts over. Nothing retries
/// on its own.
#[derive(Clone)]
pub struct ModelLoader {
    inner: Arc<LoaderInner>,
}

impl ModelLoader {
    pub fn new(factory: Arc<dyn DetectorFactory>, config: DetectorConfig) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                factory,
                config,
                slot: Mutex::new(LoaderSlot::Empty),
            }),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    pub fn handle(&self) -> Option<ModelHandle> {
        match &*self.inner.lock_slot() {
            LoaderSlot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(&*self.inner.lock_slot(), LoaderSlot::Loading(_))
    }

    pub async fn initialize(&self) -> Result<ModelHandle, FaceError> {
        let mut outcome_rx = {
            let mut slot = self.inner.lock_slot();
            match &*slot {
                LoaderSlot::Ready(handle) => return Ok(handle.clone()),
                LoaderSlot::Loading(rx) => rx.clone(),
                LoaderSlot::Empty => {
                    let (tx, rx) = watch::channel(None);
                    *slot = LoaderSlot::Loading(rx.clone());
                    self.spawn_construction(tx);
                    rx
                }
            }
        };

        let waited = outcome_rx.wait_for(Option::is_some).await;
        match waited {
            Ok(outcome) => match outcome.as_ref() {
                Some(result) => result.clone(),
                None => Err(FaceError::DetectorInit("no construction outcome".into())),
            },
            Err(_) => {
                // The construction task died without reporting back.
                let mut slot = self.inner.lock_slot();
                if matches!(&*slot, LoaderSlot::Loading(_)) {
                    *slot = LoaderSlot::Empty;
                }
                Err(FaceError::DetectorInit(
                    "detector construction was aborted".into(),
                ))
            }
        }
    }

    // Construction runs on its own task so that a caller giving up does not
    // strand the others waiting on the same attempt.
    fn spawn_construction(&self, outcome_tx: watch::Sender<InitOutcome>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            info!(
                "Loading face detector from {}",
                inner.config.model_path.display()
            );

            let result = inner
                .factory
                .construct(&inner.config)
                .await
                .map_err(|err| FaceError::DetectorInit(format!("{err:#}")));

            {
                let mut slot = inner.lock_slot();
                *slot = match &result {
                    Ok(handle) => LoaderSlot::Ready(handle.clone()),
                    Err(_) => LoaderSlot::Empty,
                };
            }

            match &result {
                Ok(_) => info!("Face detector ready"),
                Err(err) => error!("{err}"),
            }

            outcome_tx.send_replace(Some(result));
        });
    }
}
