//! Waiting for the link.
//!
//! Both helpers poll the binding's state on the configured interval rather
//! than subscribing to transitions, so they work with any [`Transport`](crate::Transport).

use crate::connection::ChatConnection;
use gearshare_core::ConnectionState;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

impl ChatConnection {
    /// Wait until the link is connected or `timeout` elapses.
    ///
    /// Initialises the connection if needed; the first connect counts against
    /// `timeout` too. Returns `false` on timeout or when no binding could be
    /// built; never errors.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let connected = tokio::time::timeout(timeout, async {
            if let Err(e) = self.ensure_initialized().await {
                tracing::debug!("Waiting for chat hub despite init failure: {}", e);
                if self.current_binding().await.is_none() {
                    return false;
                }
            }
            self.poll_state(ConnectionState::is_connected).await;
            true
        })
        .await
        .unwrap_or(false);

        if !connected {
            tracing::debug!("Chat hub not connected after {:?}", timeout);
        }
        connected
    }

    /// Poll the state until `done` accepts it. Runs until cancelled otherwise.
    pub(crate) async fn poll_state(&self, done: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            poll.tick().await;
            let state = self.connection_state().await;
            if done(state) {
                return state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::StaticToken;
    use crate::error::TransportError;
    use crate::testing::{MockFactory, connection, connection_with_token};
    use gearshare_core::ConnectionState;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn returns_true_once_connected() {
        let factory = MockFactory::new();
        let conn = connection(&factory);

        assert!(conn.wait_for_connection(Duration::from_millis(500)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_a_later_recovery() {
        let factory = MockFactory::new();
        let conn = connection(&factory);
        conn.ensure_initialized().await.unwrap();
        factory.transport.set_state(ConnectionState::Reconnecting);

        let transport = factory.transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            transport.set_state(ConnectionState::Connected);
        });

        let start = Instant::now();
        assert!(conn.wait_for_connection(Duration::from_secs(2)).await);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_hub_times_out_with_false() {
        let factory = MockFactory::new();
        factory.transport.script_connect([Err(TransportError::Connect(
            "network unreachable".into(),
        ))]);
        let conn = connection(&factory);

        let start = Instant::now();
        assert!(!conn.wait_for_connection(Duration::from_millis(500)).await);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_first_connect_counts_against_the_timeout() {
        let factory = MockFactory::new();
        factory.transport.delay_connect(Duration::from_secs(30));
        let conn = connection(&factory);

        let start = Instant::now();
        assert!(!conn.wait_for_connection(Duration::from_millis(500)).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");

        // The abandoned first round is not published.
        assert!(conn.current_binding().await.is_none());
        assert_eq!(conn.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_returns_false_immediately() {
        let factory = MockFactory::new();
        let conn = connection_with_token(&factory, StaticToken::new(""));

        assert!(!conn.wait_for_connection(Duration::from_secs(5)).await);
        assert_eq!(factory.created(), 0);
    }
}
