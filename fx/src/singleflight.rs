//! Collapsing of concurrent identical requests into one upstream call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;

/// Registry of in-flight calls keyed by `K`.
///
/// The first caller for a key becomes the leader and spawns the work; every
/// caller that arrives while it runs joins the same flight and observes the
/// same value. The work runs on its own task, so it completes (and its side
/// effects land) even if every waiter gives up early. The entry is removed
/// by the task itself once the work finishes.
pub struct SingleFlight<K, V> {
    flights: Arc<Mutex<HashMap<K, (u64, Flight<V>)>>>,
    generation: AtomicU64,
}

/// What a caller got back from [`SingleFlight::run`].
#[derive(Debug, Clone)]
pub struct FlightOutcome<V> {
    /// `None` if the flight's task panicked or was aborted.
    pub value: Option<V>,
    /// Whether this caller started the flight.
    pub leader: bool,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key`, or join the flight already running for it.
    ///
    /// `work` is only invoked by the leader.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> FlightOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (flight, leader) = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some((_, existing)) => (existing.clone(), false),
                None => {
                    let id = self.generation.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.flights);
                    let task_key = key.clone();
                    let fut = work();

                    let handle = tokio::spawn(async move {
                        let value = fut.await;
                        let mut flights = registry.lock();
                        if flights.get(&task_key).map_or(false, |(current, _)| *current == id) {
                            flights.remove(&task_key);
                        }
                        value
                    });

                    let flight = async move { handle.await.ok() }.boxed().shared();
                    flights.insert(key, (id, flight.clone()));
                    (flight, true)
                }
            }
        };

        if !leader {
            debug!("Joined in-flight request");
        }

        FlightOutcome {
            value: flight.await,
            leader,
        }
    }

    /// Number of flights currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
