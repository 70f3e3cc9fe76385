//! Owns the lifecycle of one upstream connection: connect, subscribe, reconnect-with-backoff,
//! and republishing every frame onto the [`crate::bus::EventBus`].

use crate::bus::{EventBus, StreamDataEvent};
use crate::stream::client::{RawFrame, StreamClient, SubscriptionRequest};
use curvestream_integration::error::{classify_upstream_message, StreamError, UpstreamErrorClass};
use curvestream_integration::rate_limit::{Priority, RateLimiter};
use curvestream_integration::reconnect::{BackoffPolicy, ReconnectState, ReconnectWait};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Minimum spacing between two outbound subscription writes on the same connection.
const SUBSCRIPTION_WRITE_SPACING: Duration = Duration::from_secs(2);

/// Fixed wait imposed on `RESOURCE_EXHAUSTED`, bypassing the exponential schedule.
const RATE_LIMIT_FIXED_WAIT: Duration = Duration::from_secs(60);

/// Fixed wait imposed on permission-denied/connection-limit errors.
const FATAL_AUTH_FIXED_WAIT: Duration = Duration::from_secs(300);

/// Subscription filters this connection currently holds, keyed by the caller-chosen name. A
/// second call under a name already present replaces its filter set instead of adding one
/// - the upstream only ever sees the merged result.
#[derive(Debug, Default)]
struct SubscriptionTable {
    by_name: HashMap<String, SubscriptionRequest>,
}

impl SubscriptionTable {
    fn merge(&mut self, request: SubscriptionRequest) -> SubscriptionRequest {
        self.by_name.insert(request.name.clone(), request.clone());
        request
    }
}

pub struct StreamManager<C: StreamClient> {
    client: Arc<C>,
    bus: Arc<EventBus>,
    connection_id: u32,
    rate_limiter: RateLimiter,
    reconnect: Mutex<ReconnectState>,
    subscriptions: Mutex<SubscriptionTable>,
}

impl<C: StreamClient> StreamManager<C> {
    pub fn new(connection_id: u32, client: Arc<C>, bus: Arc<EventBus>, policy: BackoffPolicy) -> Self {
        Self {
            client,
            bus,
            connection_id,
            rate_limiter: RateLimiter::new(1, SUBSCRIPTION_WRITE_SPACING),
            reconnect: Mutex::new(ReconnectState::new(policy)),
            subscriptions: Mutex::new(SubscriptionTable::default()),
        }
    }

    /// Register or replace a named subscription and push it upstream, rate limited so repeated
    /// calls never hammer the connection with writes closer than [`SUBSCRIPTION_WRITE_SPACING`]
    /// apart.
    pub async fn subscribe_to(&self, request: SubscriptionRequest) -> Result<(), StreamError> {
        let merged = {
            let mut table = self.subscriptions.lock().await;
            table.merge(request)
        };
        self.rate_limiter.acquire(Priority::Normal).await;
        self.client.subscribe(merged).await
    }

    /// Replay every currently held subscription onto a freshly (re)established connection.
    async fn resubscribe_all(&self) -> Result<(), StreamError> {
        let requests: Vec<SubscriptionRequest> = {
            let table = self.subscriptions.lock().await;
            table.by_name.values().cloned().collect()
        };
        for request in requests {
            self.rate_limiter.acquire(Priority::High).await;
            self.client.subscribe(request).await?;
        }
        Ok(())
    }

    /// Drive the connect -> stream -> reconnect loop until `stop` is requested. Each successfully
    /// processed frame resets the reconnect schedule, so a connection that runs healthily for a
    /// while does not inherit backoff state from an earlier flaky period.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }

            if let Err(err) = self.client.connect().await {
                self.handle_connect_failure(err).await;
                continue;
            }

            if let Err(err) = self.resubscribe_all().await {
                self.handle_connect_failure(err).await;
                continue;
            }

            {
                let mut reconnect = self.reconnect.lock().await;
                reconnect.reset();
            }

            loop {
                if *stop.borrow() {
                    self.client.disconnect().await;
                    return;
                }
                match self.client.next_frame().await {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Ok(None) => {
                        warn!(connection_id = self.connection_id, "upstream closed connection, reconnecting");
                        break;
                    }
                    Err(err) => {
                        if matches!(classify_upstream_message(&err.to_string()), UpstreamErrorClass::PrematureClose) {
                            warn!(connection_id = self.connection_id, "premature close, continuing");
                            continue;
                        }
                        self.handle_connect_failure(err).await;
                        break;
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: RawFrame) {
        self.bus.stream_data.emit(StreamDataEvent {
            connection_id: self.connection_id,
            frame,
        });
    }

    /// Decide how long to wait before the next connect attempt. `RESOURCE_EXHAUSTED` and
    /// permission/connection-limit errors bypass the exponential schedule entirely with a fixed
    /// wait; everything else advances the normal backoff.
    async fn handle_connect_failure(&self, err: StreamError) {
        let class = classify_upstream_message(&err.to_string());
        let wait = match class {
            UpstreamErrorClass::RateLimited => ReconnectWait::Fixed(RATE_LIMIT_FIXED_WAIT),
            UpstreamErrorClass::FatalAuth => ReconnectWait::Fixed(FATAL_AUTH_FIXED_WAIT),
            UpstreamErrorClass::Transient | UpstreamErrorClass::PrematureClose => ReconnectWait::Backoff,
        };
        let attempt = {
            let mut reconnect = self.reconnect.lock().await;
            let attempt = reconnect.attempt();
            reconnect.wait(wait).await;
            attempt
        };
        warn!(connection_id = self.connection_id, attempt, error = %err, "reconnecting after upstream failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::client::TransactionFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    struct FixtureClient {
        frames: Mutex<Vec<RawFrame>>,
        connects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StreamClient for FixtureClient {
        async fn connect(&self) -> Result<(), StreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(&self, _request: SubscriptionRequest) -> Result<(), StreamError> {
            Ok(())
        }

        async fn next_frame(&self) -> Result<Option<RawFrame>, StreamError> {
            Ok(self.frames.lock().await.pop())
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test]
    async fn resubscribing_under_the_same_name_replaces_the_previous_filter() {
        let bus = Arc::new(EventBus::new());
        let client = Arc::new(FixtureClient {
            frames: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        });
        let manager = StreamManager::new(1, client, bus, BackoffPolicy::default());

        manager
            .subscribe_to(SubscriptionRequest {
                name: "bc".into(),
                account_include: vec!["ProgramA".into()],
                account_owner: vec![],
                memcmp_offset: None,
                memcmp_bytes: None,
            })
            .await
            .unwrap();
        manager
            .subscribe_to(SubscriptionRequest {
                name: "bc".into(),
                account_include: vec!["ProgramB".into()],
                account_owner: vec![],
                memcmp_offset: None,
                memcmp_bytes: None,
            })
            .await
            .unwrap();

        let table = manager.subscriptions.lock().await;
        assert_eq!(table.by_name.len(), 1);
        assert_eq!(table.by_name["bc"].account_include, vec!["ProgramB".to_string()]);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_run_loop() {
        let bus = Arc::new(EventBus::new());
        let client = Arc::new(FixtureClient {
            frames: Mutex::new(vec![RawFrame::Ping]),
            connects: AtomicUsize::new(0),
        });
        let manager = Arc::new(StreamManager::new(1, client, bus, BackoffPolicy::default()));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), manager.run(rx))
            .await
            .expect("run loop must return promptly once stop is set");
    }

    #[allow(dead_code)]
    fn assert_frame_variant(frame: &RawFrame) -> bool {
        matches!(frame, RawFrame::Transaction(TransactionFrame { .. }))
    }
}
