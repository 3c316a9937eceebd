#![allow(dead_code)]

pub mod mock_coordinator;
pub mod mock_transport;

pub use mock_coordinator::MockCoordinator;
pub use mock_transport::LoopbackTransport;

use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Waits for the first event matching `pred`, skipping everything else.
pub async fn wait_for<T, F>(rx: &mut broadcast::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let result = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;

    match result {
        Ok(event) => event,
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Collects everything that arrives within `window`.
pub async fn drain_for<T: Clone>(rx: &mut broadcast::Receiver<T>, window: Duration) -> Vec<T> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}
