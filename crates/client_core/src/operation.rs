use std::future::Future;

use shared::error::FetchError;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    pub success_message: Option<String>,
    /// Used when the failure carries no message of its own.
    pub error_message: Option<String>,
    pub notify_success: bool,
    pub notify_failure: bool,
}

impl OperationOptions {
    pub fn with_messages(success: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            success_message: Some(success.into()),
            error_message: Some(failure.into()),
            notify_success: true,
            notify_failure: true,
        }
    }
}

/// Per-call overrides for [`AsyncOperation::execute_with`]. Unset fields keep the
/// operation's configured value.
#[derive(Debug, Clone, Default)]
pub struct OperationOverrides {
    pub success_message: Option<String>,
    pub error_message: Option<String>,
    pub notify_success: Option<bool>,
    pub notify_failure: Option<bool>,
}

impl OperationOverrides {
    fn apply(self, base: &OperationOptions) -> OperationOptions {
        OperationOptions {
            success_message: self.success_message.or_else(|| base.success_message.clone()),
            error_message: self.error_message.or_else(|| base.error_message.clone()),
            notify_success: self.notify_success.unwrap_or(base.notify_success),
            notify_failure: self.notify_failure.unwrap_or(base.notify_failure),
        }
    }
}

/// User-facing notification produced by an [`AsyncOperation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Failure(String),
}

#[derive(Default)]
struct OperationState {
    loading: bool,
    last_error: Option<FetchError>,
}

/// Runs one-off backend mutations (delete, status change, ...) with loading and error
/// tracking, publishing a [`Notice`] for each outcome.
pub struct AsyncOperation {
    options: OperationOptions,
    state: Mutex<OperationState>,
    notices: broadcast::Sender<Notice>,
}

impl AsyncOperation {
    pub fn new(options: OperationOptions) -> Self {
        let (notices, _) = broadcast::channel(16);
        Self {
            options,
            state: Mutex::new(OperationState::default()),
            notices,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.loading
    }

    pub async fn last_error(&self) -> Option<FetchError> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn clear_error(&self) {
        self.state.lock().await.last_error = None;
    }

    pub async fn execute<R, F>(&self, operation: F) -> Result<R, FetchError>
    where
        F: Future<Output = Result<R, FetchError>>,
    {
        self.run(&self.options, operation).await
    }

    /// Like [`execute`](Self::execute) with messages and notification switches overridden
    /// for this call only.
    pub async fn execute_with<R, F>(
        &self,
        overrides: OperationOverrides,
        operation: F,
    ) -> Result<R, FetchError>
    where
        F: Future<Output = Result<R, FetchError>>,
    {
        let options = overrides.apply(&self.options);
        self.run(&options, operation).await
    }

    async fn run<R, F>(&self, options: &OperationOptions, operation: F) -> Result<R, FetchError>
    where
        F: Future<Output = Result<R, FetchError>>,
    {
        {
            let mut state = self.state.lock().await;
            state.loading = true;
            state.last_error = None;
        }

        let result = operation.await;

        let mut state = self.state.lock().await;
        state.loading = false;
        match &result {
            Ok(_) => {
                if options.notify_success {
                    if let Some(message) = &options.success_message {
                        let _ = self.notices.send(Notice::Success(message.clone()));
                    }
                }
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                let message = error.user_message(options.error_message.as_deref());
                warn!(%error, "operation failed");
                if options.notify_failure {
                    let _ = self.notices.send(Notice::Failure(message));
                }
            }
        }
        result
    }
}
