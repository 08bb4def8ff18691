//! Client-side broadcast fan-out across all gateway instances.

use async_trait::async_trait;
use metrics::counter;
use protocol::rpc::FanoutRequest;
use protocol::EventEnvelope;
use rand::Rng;
use services::{GatewayBroadcaster, Registry};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fan-out worker count.
const FANOUT_WORKERS: usize = 20;

/// Fan-out queue depth before falling back to ephemeral tasks.
const FANOUT_QUEUE_DEPTH: usize = 1024;

/// Cached instance lists older than this are refetched on use.
const CACHE_TTL: Duration = Duration::from_secs(10);

/// Background refresh period (jittered).
const REFRESH_PERIOD: Duration = Duration::from_secs(8);

type FanoutTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct AddrCache {
    addrs: Vec<String>,
    fetched_at: Option<Instant>,
}

/// Fans broadcast/unicast events out to every instance of a service.
///
/// The instance list comes from the registry, cached with a TTL, kept warm
/// by a background refresher and the registry's own change feed. Concurrent
/// cache misses coalesce behind one fetch. HTTP connections are pooled by
/// the shared client and live as long as the instance does.
pub struct BroadcastClient {
    registry: Arc<dyn Registry>,
    service: String,
    http: reqwest::Client,
    cache: Arc<RwLock<AddrCache>>,
    fetch_lock: tokio::sync::Mutex<()>,
    task_tx: mpsc::Sender<FanoutTask>,
}

impl BroadcastClient {
    pub fn new(registry: Arc<dyn Registry>, service: &str) -> Arc<Self> {
        let (task_tx, task_rx) = mpsc::channel::<FanoutTask>(FANOUT_QUEUE_DEPTH);
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        for _ in 0..FANOUT_WORKERS {
            let task_rx = task_rx.clone();
            tokio::spawn(async move {
                loop {
                    let task = { task_rx.lock().await.recv().await };
                    match task {
                        Some(task) => task.await,
                        None => break,
                    }
                }
            });
        }

        let client = Arc::new(Self {
            registry,
            service: service.to_string(),
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(AddrCache::default())),
            fetch_lock: tokio::sync::Mutex::new(()),
            task_tx,
        });

        client.clone().spawn_refresher();
        client.clone().spawn_watcher();
        client
    }

    /// Periodic refresh keeps staleness under the TTL even when the
    /// registry never pushes.
    fn spawn_refresher(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let jitter = {
                    let mut rng = rand::thread_rng();
                    Duration::from_millis(rng.gen_range(0..2000))
                };
                tokio::time::sleep(REFRESH_PERIOD + jitter).await;
                match self.registry.list(&self.service).await {
                    Ok(addrs) => self.store(addrs),
                    Err(e) => warn!(service = %self.service, error = %e, "instance refresh failed"),
                }
            }
        });
    }

    /// Membership pushes from the registry update the cache immediately.
    fn spawn_watcher(self: Arc<Self>) {
        let mut rx = self.registry.subscribe(&self.service);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let addrs = rx.borrow().clone();
                info!(
                    service = %self.service,
                    instances = addrs.len(),
                    "instance list updated via registry push"
                );
                self.store(addrs);
            }
        });
    }

    fn store(&self, addrs: Vec<String>) {
        let mut cache = self.cache.write().expect("addr cache poisoned");
        cache.addrs = addrs;
        cache.fetched_at = Some(Instant::now());
    }

    async fn addrs(&self) -> Vec<String> {
        {
            let cache = self.cache.read().expect("addr cache poisoned");
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < CACHE_TTL {
                    return cache.addrs.clone();
                }
            }
        }

        // Coalesce concurrent misses behind one registry fetch
        let _guard = self.fetch_lock.lock().await;
        {
            let cache = self.cache.read().expect("addr cache poisoned");
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < CACHE_TTL {
                    return cache.addrs.clone();
                }
            }
        }

        match self.registry.list(&self.service).await {
            Ok(addrs) => {
                self.store(addrs.clone());
                addrs
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "instance fetch failed, using stale cache");
                self.cache.read().expect("addr cache poisoned").addrs.clone()
            }
        }
    }

    fn submit(&self, task: FanoutTask) {
        if let Err(mpsc::error::TrySendError::Full(task)) = self.task_tx.try_send(task) {
            warn!("fan-out queue full, spawning ephemeral task");
            counter!("cluster_fanout_overflow_total").increment(1);
            tokio::spawn(task);
        }
    }

    async fn fan_out(&self, path: &'static str, request: FanoutRequest) {
        let addrs = self.addrs().await;
        if addrs.is_empty() {
            warn!(service = %self.service, "no instances to fan out to");
            return;
        }
        debug!(service = %self.service, instances = addrs.len(), path, "fanning out");

        let request = Arc::new(request);
        for addr in addrs {
            let http = self.http.clone();
            let request = request.clone();
            let url = format!("http://{}{}", addr, path);
            self.submit(Box::pin(async move {
                match http.post(&url).json(&*request).send().await {
                    Ok(rsp) if rsp.status().is_success() => {
                        counter!("cluster_fanout_calls_total", "outcome" => "ok").increment(1);
                    }
                    Ok(rsp) => {
                        counter!("cluster_fanout_calls_total", "outcome" => "error").increment(1);
                        warn!(url = %url, status = %rsp.status(), "fan-out call rejected");
                    }
                    Err(e) => {
                        counter!("cluster_fanout_calls_total", "outcome" => "error").increment(1);
                        warn!(url = %url, error = %e, "fan-out call failed");
                    }
                }
            }));
        }
    }
}

#[async_trait]
impl GatewayBroadcaster for BroadcastClient {
    async fn broadcast(&self, game_code: &str, event: EventEnvelope) {
        self.fan_out(
            "/internal/broadcast",
            FanoutRequest {
                user_id: None,
                game_code: game_code.to_string(),
                event,
            },
        )
        .await;
    }

    async fn send_to_user(&self, user_id: i64, game_code: &str, event: EventEnvelope) {
        self.fan_out(
            "/internal/send_to_user",
            FanoutRequest {
                user_id: Some(user_id),
                game_code: game_code.to_string(),
                event,
            },
        )
        .await;
    }
}
