use futures::{FutureExt, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::sleep;

/// A stream that yields exponentially increasing backoff durations, capped at a maximum.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    /// Current number of retries.
    retry_count: usize,
    /// Maximum number of retries before closing the stream.
    /// If `None`, the stream will retry indefinitely.
    max_retries: Option<usize>,
    /// The current backoff duration.
    backoff: Duration,
    /// Upper bound for the backoff duration.
    max_backoff: Duration,
    /// The current backoff timeout, if any.
    /// We need the timeout to be pinned (`Sleep` is not `Unpin`)
    timeout: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff stream with the given initial duration, cap and max
    /// retries.
    pub(crate) fn new(initial: Duration, max_backoff: Duration, max_retries: Option<usize>) -> Self {
        Self { retry_count: 0, max_retries, backoff: initial, max_backoff, timeout: None }
    }

    /// (Re)-set the timeout to the current backoff duration.
    fn reset_timeout(&mut self) {
        self.timeout = Some(Box::pin(sleep(self.backoff)));
    }
}

impl Stream for ExponentialBackoff {
    type Item = Duration;

    /// Polls the exponential backoff stream. Returns `Poll::Ready` with the current backoff
    /// duration if the backoff timeout has elapsed, otherwise returns `Poll::Pending`.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let Some(ref mut timeout) = this.timeout else {
                // Set the initial timeout
                this.reset_timeout();
                continue;
            };

            if timeout.poll_unpin(cx).is_pending() {
                return Poll::Pending;
            }

            let elapsed = this.backoff;
            this.retry_count += 1;

            // Close the stream
            if let Some(max_retries) = this.max_retries {
                if this.retry_count > max_retries {
                    return Poll::Ready(None);
                }
            }

            this.backoff = (this.backoff * 2).min(this.max_backoff);
            this.timeout = None;

            return Poll::Ready(Some(elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn doubles_up_to_the_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(300), None);

        assert_eq!(backoff.next().await, Some(Duration::from_millis(100)));
        assert_eq!(backoff.next().await, Some(Duration::from_millis(200)));
        assert_eq!(backoff.next().await, Some(Duration::from_millis(300)));
        assert_eq!(backoff.next().await, Some(Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn ends_after_max_retries() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), Some(2));

        assert!(backoff.next().await.is_some());
        assert!(backoff.next().await.is_some());
        assert!(backoff.next().await.is_none());
    }
}
