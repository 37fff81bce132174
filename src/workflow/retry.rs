use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Whether repeating a remote call can duplicate an outward side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Ticket fetch, file fetch, model call.
    ReadOnly,
    /// Push, pull-request creation.
    SideEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn once(backoff: Duration) -> Self {
        Self {
            max_retries: 1,
            backoff,
        }
    }

    /// | call kind  | error      | retries left | action      |
    /// |------------|------------|--------------|-------------|
    /// | read-only  | transient  | yes          | retry after |
    /// | read-only  | transient  | no           | give up     |
    /// | read-only  | other      | any          | give up     |
    /// | side effect| any        | any          | give up     |
    pub fn decide(&self, kind: CallKind, error: &AppError, retries_so_far: u32) -> RetryDecision {
        match (kind, error.is_transient(), retries_so_far < self.max_retries) {
            (CallKind::ReadOnly, true, true) => RetryDecision::RetryAfter(self.backoff),
            _ => RetryDecision::GiveUp,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, kind: CallKind, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match self.decide(kind, &error, retries) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(operation, error = %error, ?delay, "transient failure; retrying once");
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}

/// Bounds a remote call; running out of time counts as a transient failure.
pub async fn within<T, Fut>(service: &'static str, limit: Duration, call: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| AppError::TransientRemote {
            service,
            message: format!("no response within {}ms", limit.as_millis()),
        })?
}
