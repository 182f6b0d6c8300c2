//! Fail-fast supervision for the solve pipeline's tasks.
//!
//! A [`TaskGroup`] owns a set of spawned tasks and one shared cancellation
//! token. The first task to fail cancels the token; cooperating tasks watch
//! it and wind down, and [`TaskGroup::join`] returns that first error once
//! every task has finished. Panics in tasks are resumed on the joining task
//! rather than swallowed.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A group of tasks that fail and cancel together.
pub struct TaskGroup<E> {
    tasks: JoinSet<Result<(), E>>,
    cancel: CancellationToken,
}

impl<E: Send + 'static> TaskGroup<E> {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the group's cancellation token.
    ///
    /// Tasks that block on external events should `select!` against
    /// `token.cancelled()` so a sibling failure releases them.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns a task into the group.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Waits for every task and returns the first failure, if any.
    ///
    /// The first error cancels the group token; errors from tasks that fail
    /// afterwards are dropped. A panicking task is resumed here.
    pub async fn join(mut self) -> Result<(), E> {
        let mut first_error = None;

        while let Some(join_result) = self.tasks.join_next().await {
            match join_result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        self.cancel.cancel();
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_panic() {
                        std::panic::resume_unwind(join_err.into_panic());
                    }
                    // Not a panic: the task was aborted. Nothing aborts
                    // tasks in this group, so treat it as finished.
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<E: Send + 'static> Default for TaskGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_join_succeeds_when_all_tasks_succeed() {
        let mut group: TaskGroup<String> = TaskGroup::new();
        group.spawn(async { Ok(()) });
        group.spawn(async { Ok(()) });
        assert!(group.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_cancels_waiting_siblings() {
        let mut group: TaskGroup<String> = TaskGroup::new();
        let token = group.cancellation_token();

        group.spawn(async move {
            token.cancelled().await;
            Ok(())
        });
        group.spawn(async { Err("solve failed".to_string()) });

        // Bounded wait: if cancellation does not propagate, this times out.
        let result = tokio::time::timeout(Duration::from_secs(5), group.join())
            .await
            .expect("join deadlocked");
        assert_eq!(result.unwrap_err(), "solve failed");
    }

    #[tokio::test]
    async fn test_later_errors_are_dropped() {
        let mut group: TaskGroup<&'static str> = TaskGroup::new();
        let token = group.cancellation_token();

        group.spawn(async { Err("first") });
        group.spawn(async move {
            token.cancelled().await;
            Err("second")
        });

        let result = tokio::time::timeout(Duration::from_secs(5), group.join())
            .await
            .expect("join deadlocked");
        assert_eq!(result.unwrap_err(), "first");
    }

    #[tokio::test]
    #[should_panic(expected = "task exploded")]
    async fn test_task_panic_is_resumed() {
        let mut group: TaskGroup<String> = TaskGroup::new();
        group.spawn(async { panic!("task exploded") });
        let _ = group.join().await;
    }
}
