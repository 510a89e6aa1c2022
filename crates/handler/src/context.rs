//! Per-endpoint shared mutable context
//!
//! Holds the fault injection flags of one endpoint. Request handlers read the
//! flags on every request while the admin API may rewrite them at any time, so
//! the flags sit behind a single mutex. Readers take a copy and release the
//! lock before doing any I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Runtime-togglable behaviour switches of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultFlags {
    /// Answer every request with a 500.
    pub always_bork: bool,
    /// Answer every request with a 307 to `redirect_target`.
    pub always_redirect: bool,
    pub redirect_target: String,
}

/// Returned when a redirect is enabled without anywhere to redirect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("enabling always_redirect requires a non-empty target")]
pub struct MissingRedirectTarget;

/// Shared state of one mock endpoint.
///
/// `endpoint_id` is fixed at construction and can be read without locking.
#[derive(Debug)]
pub struct EndpointContext {
    endpoint_id: String,
    initial: FaultFlags,
    flags: Mutex<FaultFlags>,
}

impl EndpointContext {
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self::with_flags(endpoint_id, FaultFlags::default())
    }

    /// Create a context whose flags start at (and reset to) `flags`.
    pub fn with_flags(endpoint_id: impl Into<String>, flags: FaultFlags) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            initial: flags.clone(),
            flags: Mutex::new(flags),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Copy of the current flags. The lock is released before returning.
    pub async fn snapshot(&self) -> FaultFlags {
        self.flags.lock().await.clone()
    }

    pub async fn set_always_bork(&self, enabled: bool) {
        self.flags.lock().await.always_bork = enabled;
    }

    /// Toggle the forced redirect and return the resulting flags.
    ///
    /// A `target` replaces the stored one; `None` keeps whatever target was set
    /// before. Enabling with no non-empty target to fall back on fails and
    /// leaves the flags untouched. Check and update happen under one lock.
    pub async fn try_set_always_redirect(
        &self,
        enabled: bool,
        target: Option<String>,
    ) -> Result<FaultFlags, MissingRedirectTarget> {
        let mut flags = self.flags.lock().await;
        let target = target.unwrap_or_else(|| flags.redirect_target.clone());
        if enabled && target.is_empty() {
            return Err(MissingRedirectTarget);
        }
        flags.always_redirect = enabled;
        flags.redirect_target = target;
        Ok(flags.clone())
    }

    /// Restore the flags the context was created with.
    pub async fn reset(&self) {
        *self.flags.lock().await = self.initial.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn new_context_has_all_flags_off() {
        let ctx = EndpointContext::new("ep-1");
        assert_eq!(ctx.endpoint_id(), "ep-1");
        assert_eq!(ctx.snapshot().await, FaultFlags::default());
    }

    #[tokio::test]
    async fn redirect_without_target_keeps_previous_target() {
        let ctx = EndpointContext::new("ep-1");
        ctx.try_set_always_redirect(true, Some("http://example.test/x".into()))
            .await
            .unwrap();
        let returned = ctx.try_set_always_redirect(false, None).await.unwrap();

        let flags = ctx.snapshot().await;
        assert_eq!(returned, flags);
        assert!(!flags.always_redirect);
        assert_eq!(flags.redirect_target, "http://example.test/x");
    }

    #[tokio::test]
    async fn enabling_redirect_needs_a_target() {
        let ctx = EndpointContext::new("ep-1");

        assert_eq!(
            ctx.try_set_always_redirect(true, None).await,
            Err(MissingRedirectTarget)
        );
        assert_eq!(
            ctx.try_set_always_redirect(true, Some(String::new())).await,
            Err(MissingRedirectTarget)
        );
        assert_eq!(ctx.snapshot().await, FaultFlags::default());

        // Disabling never needs a target
        assert!(ctx.try_set_always_redirect(false, None).await.is_ok());
    }

    #[tokio::test]
    async fn redirect_racing_reset_never_enables_an_empty_target() {
        let ctx = Arc::new(EndpointContext::new("ep-1"));
        ctx.try_set_always_redirect(false, Some("http://example.test/x".into()))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..64 {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ctx.reset().await;
                } else {
                    let _ = ctx.try_set_always_redirect(true, None).await;
                }
                let flags = ctx.snapshot().await;
                assert!(!flags.always_redirect || !flags.redirect_target.is_empty());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reset_restores_configured_flags() {
        let configured = FaultFlags {
            always_bork: false,
            always_redirect: true,
            redirect_target: "http://example.test/start".into(),
        };
        let ctx = EndpointContext::with_flags("ep-1", configured.clone());

        ctx.set_always_bork(true).await;
        ctx.try_set_always_redirect(false, Some("http://other.test/".into()))
            .await
            .unwrap();
        ctx.reset().await;

        assert_eq!(ctx.snapshot().await, configured);
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers_see_consistent_flags() {
        let ctx = Arc::new(EndpointContext::new("ep-1"));
        let mut tasks = Vec::new();
        for i in 0..32 {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ctx.set_always_bork(true).await;
                } else {
                    let _ = ctx.snapshot().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(ctx.snapshot().await.always_bork);
    }
}
