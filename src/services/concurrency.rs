//! Bounded-concurrency task runner.
//!
//! A fixed pool of workers pulls task indices from a shared queue until it is
//! exhausted, so at most `limit` tasks are in flight and no task starts twice.
//! Every task reports through its own [`TaskHandle`], which resolves as soon
//! as that task finishes regardless of the others.
//!
//! Failures are values: a task returning `Err` yields that error at its own
//! index, and a task that panics yields [`Error::TaskDropped`]. Nothing a
//! single task does can fail the batch.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Mutex, oneshot};
use tracing::warn;

/// Per-task result future returned by [`start_with_concurrency`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    index: usize,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Position of the task in the input list.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::TaskDropped(format!("task {index}"))))
        })
    }
}

type Queued<F, T> = (usize, F, oneshot::Sender<Result<T>>);

/// Starts `tasks` with at most `limit` running at once and returns one
/// handle per task, in input order.
///
/// Must be called from within a Tokio runtime. A `limit` of zero is treated
/// as one; a limit above the task count runs everything at once.
///
/// # Example
///
/// ```rust,ignore
/// let handles = start_with_concurrency(sessions.into_iter().map(|s| move || analyze(s)), 3);
/// for handle in handles {
///     // Consumed in order while later tasks keep running.
///     let outcome = handle.await;
/// }
/// ```
pub fn start_with_concurrency<I, F, Fut, T>(tasks: I, limit: usize) -> Vec<TaskHandle<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut queue: VecDeque<Queued<F, T>> = VecDeque::new();
    let mut handles = Vec::new();
    for (index, task) in tasks.into_iter().enumerate() {
        let (sender, receiver) = oneshot::channel();
        queue.push_back((index, task, sender));
        handles.push(TaskHandle { index, receiver });
    }

    let workers = limit.max(1).min(queue.len());
    let queue = Arc::new(Mutex::new(queue));

    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            loop {
                let next = queue.lock().await.pop_front();
                let Some((index, task, sender)) = next else {
                    break;
                };
                let outcome = match tokio::spawn(async move { task().await }).await {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        warn!(task = index, error = %join_error, "task did not complete");
                        Err(Error::TaskDropped(format!("task {index}: {join_error}")))
                    },
                };
                // The caller may have stopped listening; the outcome is discarded then.
                let _ = sender.send(outcome);
            }
        });
    }

    handles
}

/// Runs `tasks` with at most `limit` running at once and collects every
/// outcome in input order.
pub async fn run_with_concurrency<I, F, Fut, T>(tasks: I, limit: usize) -> Vec<Result<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut outcomes = Vec::new();
    for handle in start_with_concurrency(tasks, limit) {
        outcomes.push(handle.await);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let delays = [50_u64, 0, 20];
        let outcomes = run_with_concurrency(
            delays.into_iter().enumerate().map(|(i, delay)| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(format!("task{i}"))
                }
            }),
            3,
        )
        .await;

        let values: Vec<String> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec!["task0", "task1", "task2"]);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));

        let outcomes = run_with_concurrency(
            (0..8).map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let started = Arc::clone(&started);
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            }),
            3,
        )
        .await;

        assert_eq!(outcomes.len(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(started.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_values() {
        let outcomes = run_with_concurrency(
            (0..3).map(|i| {
                move || async move {
                    match i {
                        1 => Err(Error::InvalidInput("bad session".to_string())),
                        2 => panic!("boom"),
                        _ => Ok(i),
                    }
                }
            }),
            2,
        )
        .await;

        assert_eq!(outcomes[0].as_ref().unwrap(), &0);
        assert!(matches!(outcomes[1], Err(Error::InvalidInput(_))));
        assert!(matches!(outcomes[2], Err(Error::TaskDropped(_))));
    }

    #[tokio::test]
    async fn test_handles_resolve_independently() {
        let handles = start_with_concurrency(
            [40_u64, 0].into_iter().map(|delay| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(delay)
                }
            }),
            5,
        );
        let mut handles = handles.into_iter();
        let slow = handles.next().unwrap();
        let fast = handles.next().unwrap();
        assert_eq!(fast.index(), 1);
        assert_eq!(fast.await.unwrap(), 0);
        assert_eq!(slow.await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_empty_and_zero_limit() {
        let none: Vec<Result<u8>> = run_with_concurrency(
            Vec::<fn() -> std::future::Ready<Result<u8>>>::new(),
            3,
        )
        .await;
        assert!(none.is_empty());

        let outcomes = run_with_concurrency((0..2).map(|i| move || async move { Ok(i) }), 0).await;
        assert_eq!(outcomes.len(), 2);
    }
}
