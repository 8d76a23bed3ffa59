use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_core::auth::AuthenticationManager;
use gantry_core::config::{Config, SystemConfig};
use gantry_core::queue::{MessageQueue, QueuedMessage, RetryDisposition, RetryPolicy};
use gantry_core::rate_limit::{Quota, RateLimiter};
use gantry_core::transform::{DataTransformer, FieldMappings};
use gantry_core::types::{Direction, SystemStatus, TransportKind, TransportStatus};
use gantry_core::validate::{MessageValidator, ValidateError};
use gantry_transport::{HttpTransport, Transport, TransportError, WebSocketTransport};

use crate::metrics::BridgeMetrics;
use crate::shutdown::{ShutdownGuard, ShutdownSignal};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Construction-time failures.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(#[from] gantry_core::config::ConfigError),
    #[error("auth error: {0}")]
    Auth(#[from] gantry_core::auth::AuthError),
    #[error("schema error: {0}")]
    Validate(#[from] ValidateError),
}

/// Why a send or receive was refused. `is_ok()` on the call's result is the
/// caller-facing boolean; the variant exists for logs and metrics.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("unknown system `{0}`")]
    SystemUnknown(String),

    #[error("system `{0}` is not authenticated")]
    NotAuthenticated(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidateError),

    #[error("rate limit exceeded for system `{0}`")]
    RateLimited(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// The integration facade.
///
/// `send_message` authenticates, validates, rate-limits, and queues; a single
/// background dispatch loop (started at construction) drains the queue
/// through per-system transports with exponential-backoff retries. Producers
/// only ever append, the loop is the only consumer, and every shared
/// structure sits behind its own lock, so no component can head-of-line
/// block another.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    systems: AHashMap<String, SystemConfig>,
    auth: AuthenticationManager,
    validator: MessageValidator,
    limiter: RateLimiter,
    transformer: DataTransformer,
    queue: MessageQueue,
    /// Lazily created, one per system; exclusively driven by the dispatch
    /// loop once created, torn down only by `close()`.
    transports: AsyncMutex<AHashMap<String, Box<dyn Transport>>>,
    metrics: Arc<BridgeMetrics>,
    shutdown: ShutdownSignal,
    idle_interval: Duration,
    rate_limit_defer: Option<Duration>,
}

impl Bridge {
    /// Build the bridge from configuration and start its dispatch loop.
    ///
    /// Must be called from within a tokio runtime. Raw credential material
    /// is digested and zeroized before this returns.
    pub fn new(config: Config) -> Result<Self, BridgeError> {
        config.validate()?;

        let mut systems = config.systems;

        let validator =
            MessageValidator::new(systems.iter().map(|(id, s)| (id.clone(), &s.schema)))?;

        let default_quota = Quota::new(
            config.rate_limit.max_requests,
            config.rate_limit.time_window(),
        );
        let overrides: Vec<(String, Quota)> = systems
            .iter()
            .filter_map(|(id, s)| {
                s.rate_limit
                    .as_ref()
                    .map(|rl| (id.clone(), Quota::new(rl.max_requests, rl.time_window())))
            })
            .collect();
        let limiter = RateLimiter::new(default_quota).with_overrides(overrides);

        let transformer = DataTransformer::new(systems.iter().filter_map(|(id, s)| {
            s.mappings.as_ref().map(|m| {
                (
                    id.clone(),
                    FieldMappings::new(m.inbound.clone(), m.outbound.clone()),
                )
            })
        }));

        let credentials: Vec<(String, String)> = systems
            .iter_mut()
            .map(|(id, s)| (id.clone(), std::mem::take(&mut s.credentials)))
            .collect();
        let auth = AuthenticationManager::new(credentials)?;

        let queue = MessageQueue::new(RetryPolicy {
            max_retries: config.dispatch.max_retries,
            retry_delay: config.dispatch.retry_delay(),
        });

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                systems: systems.into_iter().collect(),
                auth,
                validator,
                limiter,
                transformer,
                queue,
                transports: AsyncMutex::new(AHashMap::new()),
                metrics: Arc::new(BridgeMetrics::new()),
                shutdown: ShutdownSignal::new(),
                idle_interval: config.dispatch.idle_interval(),
                rate_limit_defer: config.dispatch.rate_limit_defer_ms.map(Duration::from_millis),
            }),
        };
        bridge.spawn_dispatch_loop();
        Ok(bridge)
    }

    /// Domain metrics, for export endpoints and assertions.
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.inner.metrics.clone()
    }

    /// Pre-seed the transport cache for a system.
    ///
    /// This is how custom transport kinds plug in: implement [`Transport`]
    /// and register the instance; the dispatch loop will drive it instead of
    /// constructing one from the system's transport config.
    pub async fn register_transport(&self, system_id: &str, transport: Box<dyn Transport>) {
        let mut transports = self.inner.transports.lock().await;
        transports.insert(system_id.to_string(), transport);
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Verify a system's credentials. On success the system may send and
    /// receive until it is deauthenticated.
    pub fn authenticate_system(&self, system_id: &str, credentials: &str) -> bool {
        let ok = self.inner.auth.authenticate(system_id, credentials);
        if ok {
            info!(system_id, "system authenticated");
        } else {
            warn!(system_id, "authentication failed");
        }
        ok
    }

    /// Drop a system's authentication record (explicit eviction; there is no
    /// TTL). Returns whether the system was authenticated.
    pub fn deauthenticate_system(&self, system_id: &str) -> bool {
        let removed = self.inner.auth.deauthenticate(system_id);
        if removed {
            info!(system_id, "system deauthenticated");
        }
        removed
    }

    /// Accept one outbound message for `system_id`.
    ///
    /// Success means the message is durably queued, not delivered. Rejections
    /// are immediate and never queued: unknown system, missing
    /// authentication, schema violation, or an exhausted rate window (the
    /// caller must resend later; no retry is scheduled for rate limiting).
    pub fn send_message(&self, system_id: &str, message: &Value) -> Result<Uuid, SendError> {
        if !self.inner.systems.contains_key(system_id) {
            return Err(SendError::SystemUnknown(system_id.to_string()));
        }
        if !self.inner.auth.is_authenticated(system_id) {
            self.inner.metrics.record_sent(system_id, "unauthenticated");
            return Err(SendError::NotAuthenticated(system_id.to_string()));
        }
        if let Err(e) = self.inner.validator.validate(system_id, message) {
            warn!(system_id, error = %e, "rejecting invalid message");
            self.inner.metrics.record_sent(system_id, "invalid");
            return Err(e.into());
        }
        if !self.inner.limiter.check(system_id) {
            self.inner.metrics.record_sent(system_id, "rate_limited");
            return Err(SendError::RateLimited(system_id.to_string()));
        }

        let message_id = self.inner.queue.add(system_id, message.clone());
        self.update_queue_gauge(system_id);
        debug!(system_id, %message_id, "message queued");
        Ok(message_id)
    }

    /// Poll one inbound message from `system_id`.
    ///
    /// The raw document is mapped to the internal representation and then
    /// validated; either failure surfaces as an error and nothing is
    /// returned to the caller.
    pub async fn receive_message(&self, system_id: &str) -> Result<Option<Value>, SendError> {
        if !self.inner.systems.contains_key(system_id) {
            return Err(SendError::SystemUnknown(system_id.to_string()));
        }
        if !self.inner.auth.is_authenticated(system_id) {
            return Err(SendError::NotAuthenticated(system_id.to_string()));
        }

        let started = Instant::now();
        let received = {
            let mut transports = self.inner.transports.lock().await;
            let transport = self.transport_for(&mut transports, system_id)?;
            let result = transport.receive().await;
            self.inner.metrics.set_connection(
                system_id,
                &transport.kind().to_string(),
                transport.is_connected(),
            );
            result
        };
        self.inner
            .metrics
            .record_latency(system_id, "receive", started.elapsed().as_secs_f64());

        match received {
            Ok(Some(raw)) => {
                let internal = self
                    .inner
                    .transformer
                    .transform(system_id, &raw, Direction::In);
                if let Err(e) = self.inner.validator.validate(system_id, &internal) {
                    warn!(system_id, error = %e, "dropping invalid inbound message");
                    self.inner.metrics.record_received(system_id, "invalid");
                    return Err(e.into());
                }
                self.inner.auth.update_activity(system_id);
                self.inner.metrics.record_received(system_id, "ok");
                Ok(Some(internal))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(system_id, error = %e, "receive failed");
                self.inner.metrics.record_received(system_id, "failed");
                Err(e.into())
            }
        }
    }

    /// Point-in-time status for one configured system; `None` for unknown
    /// ids.
    pub async fn get_system_status(&self, system_id: &str) -> Option<SystemStatus> {
        let system = self.inner.systems.get(system_id)?;

        let transport = {
            let transports = self.inner.transports.lock().await;
            match transports.get(system_id) {
                Some(t) => TransportStatus {
                    kind: t.kind(),
                    connected: t.is_connected(),
                },
                None => TransportStatus {
                    kind: system.transport.kind,
                    connected: false,
                },
            }
        };

        Some(SystemStatus {
            authenticated: self.inner.auth.is_authenticated(system_id),
            remaining_requests: self.inner.limiter.remaining(system_id),
            queue_size: self.inner.queue.len_for(system_id),
            last_activity: self.inner.auth.last_activity(system_id),
            transport,
        })
    }

    /// Stop the dispatch loop and disconnect every cached transport.
    ///
    /// Disconnect errors are logged, never propagated; a broken transport
    /// must not keep its neighbours connected.
    pub async fn close(&self) {
        self.inner.shutdown.trigger();
        let mut shutdown = self.inner.shutdown.clone();
        if !shutdown.wait_for_drain(1, Duration::from_secs(5)).await {
            warn!("dispatch loop did not confirm drain before timeout");
        }

        let mut transports = self.inner.transports.lock().await;
        for (system_id, transport) in transports.iter_mut() {
            if let Err(e) = transport.disconnect().await {
                warn!(system_id, error = %e, "error disconnecting transport");
            }
            self.inner
                .metrics
                .set_connection(system_id, &transport.kind().to_string(), false);
        }
        transports.clear();
        info!("bridge closed");
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    fn spawn_dispatch_loop(&self) {
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = bridge.inner.shutdown.subscribe();
            let _guard = ShutdownGuard::new(bridge.inner.shutdown.clone());
            info!("dispatch loop started");
            // The flag covers a trigger racing this task's startup; the
            // broadcast covers wake-up while parked on the select.
            while !bridge.inner.shutdown.is_shutting_down() {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = bridge.dispatch_once() => {}
                }
            }
            info!("dispatch loop stopped");
        });
    }

    /// One loop iteration: deliver the next eligible message, or idle.
    async fn dispatch_once(&self) {
        let Some(message) = self.inner.queue.get_next() else {
            tokio::time::sleep(self.inner.idle_interval).await;
            return;
        };
        self.dispatch_message(message).await;
    }

    async fn dispatch_message(&self, message: QueuedMessage) {
        let system_id = message.system_id.clone();

        // Defense in depth: a payload that no longer validates can never be
        // delivered, so it is dropped without touching retry accounting.
        if let Err(e) = self.inner.validator.validate(&system_id, &message.payload) {
            warn!(
                system_id,
                message_id = %message.id,
                error = %e,
                "queued message failed re-validation; dropping"
            );
            self.inner.queue.remove(&message.id);
            self.inner.metrics.record_sent(&system_id, "invalid");
            self.update_queue_gauge(&system_id);
            return;
        }

        // Over quota at dispatch time: defer, don't fail. Deferral never
        // counts toward retry exhaustion.
        if !self.inner.limiter.check(&system_id) {
            let delay = self.rate_limit_defer(&system_id);
            debug!(system_id, message_id = %message.id, ?delay, "rate limited at dispatch; deferring");
            self.inner.queue.defer(&message.id, delay);
            return;
        }

        let started = Instant::now();
        let outcome = self.send_via_transport(&system_id, &message).await;
        self.inner
            .metrics
            .record_latency(&system_id, "send", started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                self.inner.queue.mark_success(&message.id);
                self.inner.auth.update_activity(&system_id);
                self.inner.metrics.record_sent(&system_id, "ok");
                debug!(system_id, message_id = %message.id, "message delivered");
            }
            Err(e) => {
                warn!(
                    system_id,
                    message_id = %message.id,
                    attempt = message.retry_count + 1,
                    error = %e,
                    "delivery attempt failed"
                );
                match self.inner.queue.mark_failed(&message.id) {
                    Some(RetryDisposition::Exhausted) => {
                        error!(
                            system_id,
                            message_id = %message.id,
                            "retries exhausted; message permanently failed"
                        );
                        self.inner.metrics.record_sent(&system_id, "failed");
                    }
                    Some(RetryDisposition::Scheduled { delay }) => {
                        debug!(system_id, message_id = %message.id, ?delay, "retry scheduled");
                        self.inner.metrics.record_sent(&system_id, "retry");
                    }
                    None => {}
                }
            }
        }
        self.update_queue_gauge(&system_id);
    }

    async fn send_via_transport(
        &self,
        system_id: &str,
        message: &QueuedMessage,
    ) -> Result<(), TransportError> {
        let payload = self
            .inner
            .transformer
            .transform(system_id, &message.payload, Direction::Out);

        let mut transports = self.inner.transports.lock().await;
        let transport = self.transport_for(&mut transports, system_id)?;
        let result = transport.send(&payload).await;
        self.inner.metrics.set_connection(
            system_id,
            &transport.kind().to_string(),
            transport.is_connected(),
        );
        result
    }

    /// Fetch the cached transport for a system, constructing it on first
    /// use. This is the only place transport kinds are branched on.
    fn transport_for<'a>(
        &self,
        transports: &'a mut AHashMap<String, Box<dyn Transport>>,
        system_id: &str,
    ) -> Result<&'a mut Box<dyn Transport>, TransportError> {
        match transports.entry(system_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let system = self.inner.systems.get(system_id).ok_or_else(|| {
                    TransportError::ConnectFailed(format!("unknown system `{system_id}`"))
                })?;
                let timeout = system.transport.timeout();
                let endpoint = system.transport.endpoint.clone();
                let transport: Box<dyn Transport> = match system.transport.kind {
                    TransportKind::WebSocket => {
                        Box::new(WebSocketTransport::new(endpoint, timeout))
                    }
                    TransportKind::Http => Box::new(HttpTransport::new(endpoint, timeout)?),
                };
                info!(system_id, kind = %system.transport.kind, "transport created");
                Ok(slot.insert(transport))
            }
        }
    }

    fn rate_limit_defer(&self, system_id: &str) -> Duration {
        match self.inner.rate_limit_defer {
            Some(delay) => delay,
            None => {
                let quota = self.inner.limiter.quota_for(system_id);
                let per_slot = quota.window / quota.max_requests.max(1) as u32;
                per_slot.max(Duration::from_millis(250))
            }
        }
    }

    fn update_queue_gauge(&self, system_id: &str) {
        self.inner
            .metrics
            .set_queue_size(system_id, self.inner.queue.len_for(system_id));
    }
}
