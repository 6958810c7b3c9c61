//! Application state shared across request handlers.

use std::sync::Arc;

use crate::conductor::Conductor;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    conductor: Arc<Conductor>,
}

impl AppState {
    pub fn new(conductor: Arc<Conductor>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { conductor }),
        }
    }

    pub fn conductor(&self) -> &Conductor {
        &self.inner.conductor
    }
}
