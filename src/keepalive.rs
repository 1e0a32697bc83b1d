// Optional background keep-alive pinger.
// Keeps free-tier hosts from idling out the service and its companion.
// Holds its own abort handle and shares no state with request handling.

use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Spawn the pinger over the non-empty targets. Returns None when there
    /// is nothing to ping or the interval is zero.
    pub fn spawn(http: Client, targets: Vec<String>, interval: Duration) -> Option<Self> {
        let targets: Vec<String> = targets.into_iter().filter(|t| !t.is_empty()).collect();
        if targets.is_empty() || interval.is_zero() {
            return None;
        }

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for target in &targets {
                    match http.get(target).send().await {
                        Ok(resp) => {
                            debug!(target_url = %target, status = %resp.status(), "keep-alive ping");
                        }
                        Err(e) => {
                            warn!(target_url = %target, error = %e, "keep-alive ping failed");
                        }
                    }
                }
            }
        });

        Some(Self { handle })
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nothing_to_ping_means_no_task() {
        let http = Client::new();
        assert!(KeepAlive::spawn(http.clone(), vec![], Duration::from_secs(60)).is_none());
        assert!(KeepAlive::spawn(
            http.clone(),
            vec![String::new(), String::new()],
            Duration::from_secs(60)
        )
        .is_none());
        assert!(KeepAlive::spawn(
            http,
            vec!["http://localhost:9".to_string()],
            Duration::ZERO
        )
        .is_none());
    }

    #[tokio::test]
    async fn spawned_task_can_be_shut_down() {
        let task = KeepAlive::spawn(
            Client::new(),
            vec!["http://localhost:9".to_string()],
            Duration::from_secs(3600),
        )
        .expect("task should spawn");
        task.shutdown();
    }
}
