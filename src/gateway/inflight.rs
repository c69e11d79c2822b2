//! In-flight request deduplication.
//!
//! The first caller for a flight key becomes the leader and performs the call;
//! callers arriving while it runs follow and receive a clone of its result. A
//! leader that is dropped before completing removes its entry, so followers
//! (and later callers) start a fresh call.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type FlightMap<T> = Mutex<HashMap<String, (u64, watch::Receiver<Option<T>>)>>;

#[derive(Debug)]
pub struct InFlightRequests<T: Clone> {
    flights: Arc<FlightMap<T>>,
    next_id: AtomicU64,
}

pub enum Flight<T: Clone> {
    Leader(FlightLeader<T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Ownership of one in-flight call; removes its map entry when dropped
pub struct FlightLeader<T: Clone> {
    key: String,
    id: u64,
    sender: watch::Sender<Option<T>>,
    flights: Arc<FlightMap<T>>,
}

impl<T: Clone> InFlightRequests<T> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn join(&self, key: &str) -> Flight<T> {
        let mut flights = self.flights.lock();
        if let Some((_, receiver)) = flights.get(key) {
            return Flight::Follower(receiver.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        flights.insert(key.to_string(), (id, receiver));
        Flight::Leader(FlightLeader {
            key: key.to_string(),
            id,
            sender,
            flights: self.flights.clone(),
        })
    }

    /// Wait for the leader's result; `None` if the leader went away without one
    pub async fn follow(mut receiver: watch::Receiver<Option<T>>) -> Option<T> {
        let result = match receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result
    }

    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }
}

impl<T: Clone> Default for InFlightRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FlightLeader<T> {
    /// Publish the result to every follower
    pub fn complete(self, result: T) {
        self.remove_entry();
        self.sender.send_replace(Some(result));
    }

    fn remove_entry(&self) {
        let mut flights = self.flights.lock();
        if flights.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            flights.remove(&self.key);
        }
    }
}

impl<T: Clone> Drop for FlightLeader<T> {
    fn drop(&mut self) {
        self.remove_entry();
    }
}
