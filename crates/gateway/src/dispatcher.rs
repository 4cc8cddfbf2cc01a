//! Per-conversation turn serialization.
//!
//! At most one loop iteration runs per conversation at a time; a second
//! input for the same conversation queues behind the first instead of
//! interleaving transcript writes. Distinct conversations proceed fully
//! independently.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use proto::SessionId;
use tokio::sync::Mutex;
use tracing::debug;

/// Hands out one fair FIFO lock per conversation key.
pub struct TurnDispatcher {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TurnDispatcher {
    /// Creates a dispatcher with no held locks.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Runs `turn` holding the conversation's lock.
    ///
    /// tokio's mutex queues waiters in FIFO order, so overlapping inputs for
    /// one conversation run in arrival order, never concurrently.
    pub async fn run_turn<F, T>(&self, session_id: &SessionId, turn: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .locks
            .entry(session_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        debug!("Waiting for turn slot on session {session_id}");
        let _guard = lock.lock().await;
        turn.await
    }
}

impl Default for TurnDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_session_turns_never_interleave() {
        let dispatcher = Arc::new(TurnDispatcher::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let session = SessionId::from("s1");

        let slow = {
            let dispatcher = Arc::clone(&dispatcher);
            let log = Arc::clone(&log);
            let session = session.clone();
            tokio::spawn(async move {
                dispatcher
                    .run_turn(&session, async {
                        log.lock().expect("log").push("a-start");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        log.lock().expect("log").push("a-end");
                    })
                    .await;
            })
        };
        // Let the first turn acquire the lock before queueing the second.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = {
            let dispatcher = Arc::clone(&dispatcher);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                dispatcher
                    .run_turn(&SessionId::from("s1"), async {
                        log.lock().expect("log").push("b-start");
                        log.lock().expect("log").push("b-end");
                    })
                    .await;
            })
        };

        slow.await.expect("first turn");
        fast.await.expect("second turn");

        let order = log.lock().expect("log").clone();
        assert_eq!(order, vec!["a-start", "a-end", "b-start", "b-end"]);
    }

    #[tokio::test]
    async fn distinct_sessions_run_concurrently() {
        let dispatcher = Arc::new(TurnDispatcher::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);

        let blocked = {
            let dispatcher = Arc::clone(&dispatcher);
            let tx = tx.clone();
            tokio::spawn(async move {
                dispatcher
                    .run_turn(&SessionId::from("a"), async {
                        // Holds "a" while "b" proceeds.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let _ = tx.send("a").await;
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher
            .run_turn(&SessionId::from("b"), async {
                let _ = tx.send("b").await;
            })
            .await;

        assert_eq!(rx.recv().await, Some("b"));
        blocked.await.expect("blocked turn finishes");
        assert_eq!(rx.recv().await, Some("a"));
    }
}
