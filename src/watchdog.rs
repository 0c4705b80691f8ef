use std::fmt;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::ClientError;

/// Which budget governed a read that expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    /// Nothing had arrived yet: the agent never started answering.
    FirstEvent,
    /// The agent went quiet mid-generation.
    BetweenEvents,
}

impl fmt::Display for IdlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdlePhase::FirstEvent => write!(f, "waiting for the first event"),
            IdlePhase::BetweenEvents => write!(f, "waiting between events"),
        }
    }
}

/// Read budgets before and after the first `data:` line. `None` disables the check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleBudgets {
    pub first_event: Option<Duration>,
    pub between_events: Option<Duration>,
}

impl IdleBudgets {
    pub fn new(first_event: Option<Duration>, between_events: Option<Duration>) -> Self {
        Self {
            first_event,
            between_events,
        }
    }
}

/// Tracks the active budget for one stream. Switches phase once, on the first event.
#[derive(Debug)]
pub struct IdleWatchdog {
    budgets: IdleBudgets,
    phase: IdlePhase,
}

impl IdleWatchdog {
    pub fn new(budgets: IdleBudgets) -> Self {
        Self {
            budgets,
            phase: IdlePhase::FirstEvent,
        }
    }

    pub fn phase(&self) -> IdlePhase {
        self.phase
    }

    pub fn active_budget(&self) -> Option<Duration> {
        match self.phase {
            IdlePhase::FirstEvent => self.budgets.first_event,
            IdlePhase::BetweenEvents => self.budgets.between_events,
        }
    }

    pub fn observe_event(&mut self) {
        if self.phase == IdlePhase::FirstEvent {
            tracing::trace!("first stream event observed");
            self.phase = IdlePhase::BetweenEvents;
        }
    }

    /// Pulls the next item, failing with `IdleTimeout` if the active budget runs out.
    ///
    /// The timer lives inside the `timeout` future, so it is released on every
    /// path, and the abandoned `next()` holds no state of its own.
    pub async fn next<S>(&self, stream: &mut S) -> Result<Option<S::Item>, ClientError>
    where
        S: Stream + Unpin,
    {
        match self.active_budget() {
            Some(budget) => tokio::time::timeout(budget, stream.next())
                .await
                .map_err(|_| ClientError::IdleTimeout {
                    phase: self.phase(),
                    budget,
                }),
            None => Ok(stream.next().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test(start_paused = true)]
    async fn pending_reader_times_out_with_first_event_phase() {
        let watchdog = IdleWatchdog::new(IdleBudgets::new(Some(Duration::from_millis(100)), None));
        let mut reader = stream::pending::<u8>();

        let err = watchdog.next(&mut reader).await.unwrap_err();
        match err {
            ClientError::IdleTimeout { phase, budget } => {
                assert_eq!(phase, IdlePhase::FirstEvent);
                assert_eq!(budget, Duration::from_millis(100));
            }
            other => panic!("expected idle timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_budget_never_times_out() {
        let watchdog = IdleWatchdog::new(IdleBudgets::default());
        let mut reader = stream::once(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            7u8
        })
        .boxed();

        assert_eq!(watchdog.next(&mut reader).await.unwrap(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn first_event_switches_to_between_events_budget() {
        let mut watchdog = IdleWatchdog::new(IdleBudgets::new(
            Some(Duration::from_millis(50)),
            Some(Duration::from_millis(500)),
        ));
        assert_eq!(watchdog.active_budget(), Some(Duration::from_millis(50)));

        watchdog.observe_event();
        watchdog.observe_event();
        assert_eq!(watchdog.phase(), IdlePhase::BetweenEvents);

        // Slower than the first-event budget but inside the between-events one.
        let mut reader = stream::once(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            1u8
        })
        .boxed();
        assert_eq!(watchdog.next(&mut reader).await.unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn between_events_expiry_reports_its_phase() {
        let mut watchdog =
            IdleWatchdog::new(IdleBudgets::new(None, Some(Duration::from_millis(30))));
        watchdog.observe_event();
        let mut reader = stream::pending::<u8>();

        let err = watchdog.next(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::IdleTimeout {
                phase: IdlePhase::BetweenEvents,
                ..
            }
        ));
    }
}
