use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;

/// Budget for a handler's poll-until-ready loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(2),
        }
    }
}

/// Per-call context threaded into every handler operation.
///
/// Carries cancellation, an optional overall deadline, the wait budget for
/// asynchronous convergence, and the ownership marker handlers stamp on
/// objects they create.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    wait: WaitPolicy,
    owner: String,
}

impl Default for OpContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            wait: WaitPolicy::default(),
            owner: "stratus".to_string(),
        }
    }
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// Dropping `fut` stops waiting on it; a remote mutation already in
    /// flight may still complete on the backend.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, HandlerError>
    where
        F: Future<Output = Result<T, HandlerError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        let started = Instant::now();

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(HandlerError::Cancelled),

            _ = deadline => Err(HandlerError::Timeout {
                what: "operation deadline".to_string(),
                waited: started.elapsed(),
            }),

            result = fut => result,
        }
    }
}

/// Call `poll` until it yields a value, within the context's wait budget.
///
/// Handlers for backends that converge asynchronously call this from
/// create/update/delete so they only return once the object is settled.
pub async fn wait_for<T, F, Fut>(ctx: &OpContext, what: &str, mut poll: F) -> Result<T, HandlerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, HandlerError>>,
{
    let policy = ctx.wait_policy();
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if let Some(value) = ctx.run(poll()).await? {
            tracing::debug!(what, attempt, "wait condition met");
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited + policy.interval > policy.timeout {
            return Err(HandlerError::Timeout {
                what: what.to_string(),
                waited,
            });
        }

        tracing::debug!(what, attempt, "not ready yet, polling again");
        attempt += 1;

        tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => return Err(HandlerError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
