#![allow(dead_code)]

use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Serve a router on an ephemeral local port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Receive events until one matches, failing after five seconds
pub async fn wait_for<E, F>(rx: &mut UnboundedReceiver<E>, mut predicate: F) -> E
where
    E: std::fmt::Debug,
    F: FnMut(&E) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything received within `window`
pub async fn collect_for<E>(rx: &mut UnboundedReceiver<E>, window: Duration) -> Vec<E> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await;
    events
}

/// Receive events until the history so far satisfies `done`, failing after five seconds
pub async fn collect_until<E, F>(rx: &mut UnboundedReceiver<E>, mut done: F) -> Vec<E>
where
    E: std::fmt::Debug,
    F: FnMut(&[E]) -> bool,
{
    let mut history = Vec::new();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&history) {
            match rx.recv().await {
                Some(event) => history.push(event),
                None => return false,
            }
        }
        true
    })
    .await;
    assert!(
        matches!(finished, Ok(true)),
        "condition not met, events so far: {:?}",
        history
    );
    history
}

/// Poll `check` every 20ms until it holds, failing after five seconds
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
