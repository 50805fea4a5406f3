//! Process-wide stream registry
//!
//! A [`Context`] owns the host handle and bounds how many streams may be
//! open at once on host versions that cannot run more than a handful
//! concurrently.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::constants::BACKEND_ID;
use crate::error::StreamError;
use crate::host::AudioHost;

/// Shared handle to an audio session
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    host: Arc<dyn AudioHost>,
    registry: Mutex<Registry>,
    config: EngineConfig,
}

struct Registry {
    active: usize,
    /// `None` when the host runs any number of streams
    limit: Option<usize>,
}

impl Context {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    pub fn with_config(host: Arc<dyn AudioHost>, config: EngineConfig) -> Self {
        let limited = config
            .context
            .limit_streams
            .unwrap_or_else(|| host.limits_concurrent_streams());
        let limit = limited.then_some(config.context.max_streams);

        tracing::debug!("Audio context created (stream limit: {:?})", limit);

        Self {
            inner: Arc::new(ContextInner {
                host,
                registry: Mutex::new(Registry { active: 0, limit }),
                config,
            }),
        }
    }

    pub fn backend_id(&self) -> &'static str {
        BACKEND_ID
    }

    pub fn host(&self) -> &Arc<dyn AudioHost> {
        &self.inner.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of streams currently holding a slot
    pub fn active_streams(&self) -> usize {
        self.inner.registry.lock().active
    }

    pub fn stream_limit(&self) -> Option<usize> {
        self.inner.registry.lock().limit
    }

    /// Reserve room for one more stream. The slot is returned when the
    /// [`StreamSlot`] drops.
    pub fn acquire_slot(&self) -> Result<StreamSlot, StreamError> {
        let mut registry = self.inner.registry.lock();
        if let Some(limit) = registry.limit {
            if registry.active >= limit {
                tracing::warn!("Refusing stream: {} of {} already open", registry.active, limit);
                return Err(StreamError::ResourceLimitExceeded { limit });
            }
        }
        registry.active += 1;

        Ok(StreamSlot {
            context: Arc::clone(&self.inner),
        })
    }
}

/// One counted entry in the context registry
pub struct StreamSlot {
    context: Arc<ContextInner>,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        let mut registry = self.context.registry.lock();
        debug_assert!(registry.active > 0);
        registry.active = registry.active.saturating_sub(1);
    }
}
