//! Shared compression contexts.
//!
//! Connections that negotiated no-context-takeover in both directions have
//! no dictionary state between messages, so their contexts are fungible and
//! can be lent out per message instead of living one-per-connection.
//! Takeover connections must never use this pool; their dictionaries are
//! connection-scoped.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::connection::Role;
use crate::deflate::{CompressionContext, DeflateParams};
use crate::error::{Error, Result};

const DEFAULT_MAX_CACHED: usize = 16;

struct PoolShared {
    contexts: Mutex<Vec<CompressionContext>>,
    params: DeflateParams,
    role: Role,
    max_cached: usize,
}

/// Pool of interchangeable no-context-takeover compression contexts.
#[derive(Clone)]
pub struct ContextPool {
    shared: Arc<PoolShared>,
}

impl ContextPool {
    /// Create a pool for the given negotiated parameters.
    ///
    /// # Errors
    ///
    /// `Error::NegotiationFailed` if either direction keeps its dictionary
    /// across messages; such contexts cannot be shared.
    pub fn new(params: DeflateParams, role: Role) -> Result<Self> {
        if !params.server_no_context_takeover || !params.client_no_context_takeover {
            return Err(Error::NegotiationFailed(
                "context takeover connections need dedicated contexts".into(),
            ));
        }
        Ok(Self {
            shared: Arc::new(PoolShared {
                contexts: Mutex::new(Vec::new()),
                params,
                role,
                max_cached: DEFAULT_MAX_CACHED,
            }),
        })
    }

    /// Borrow a context for one message. The handle returns it on drop.
    #[must_use]
    pub fn acquire(&self) -> PooledContext {
        let recycled = match self.shared.contexts.lock() {
            Ok(mut contexts) => contexts.pop(),
            Err(_) => None,
        };
        let ctx =
            recycled.unwrap_or_else(|| CompressionContext::new(&self.shared.params, self.shared.role));
        PooledContext {
            ctx: Some(ctx),
            shared: Arc::clone(&self.shared),
        }
    }

    /// The negotiated parameters every pooled context uses.
    #[must_use]
    pub fn params(&self) -> DeflateParams {
        self.shared.params
    }

    /// Contexts currently idle in the pool.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.shared.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Borrowed pool context; derefs to [`CompressionContext`].
pub struct PooledContext {
    ctx: Option<CompressionContext>,
    shared: Arc<PoolShared>,
}

impl Deref for PooledContext {
    type Target = CompressionContext;

    fn deref(&self) -> &CompressionContext {
        match &self.ctx {
            Some(ctx) => ctx,
            None => unreachable!(),
        }
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut CompressionContext {
        match &mut self.ctx {
            Some(ctx) => ctx,
            None => unreachable!(),
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            if let Ok(mut contexts) = self.shared.contexts.lock() {
                if contexts.len() < self.shared.max_cached {
                    contexts.push(ctx);
                }
            }
        }
    }
}
