//! Cooperative shutdown signal.
//!
//! A [`ShutdownTrigger`] flips every cloned [`Shutdown`] once. Long-running
//! loops (scheduler ticks, sweepers, retry sleeps) select on
//! [`Shutdown::cancelled`].

use tokio::sync::watch;
use tracing::info;

/// Sending half; dropping it without triggering leaves receivers waiting.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Wait for Ctrl-C, then trigger shutdown.
pub async fn trigger_on_ctrl_c(trigger: ShutdownTrigger) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    trigger.trigger();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancelled_resolves_after_trigger() {
        let (trigger, signal) = channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let signal = Shutdown::never();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_after_trigger_sees_it() {
        let (trigger, _signal) = channel();
        trigger.trigger();
        let late = trigger.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.cancelled())
            .await
            .unwrap();
    }
}
