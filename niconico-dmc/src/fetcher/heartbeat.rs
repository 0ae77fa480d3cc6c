//! Keeps negotiated sessions alive.

use crate::Niconico;
use crate::error::{Error, Result};
use crate::fetcher::{HttpRequest, Transport};
use crate::model::session::{HeartbeatTask, SessionDescriptor};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically posts the session object back to its update URL.
#[derive(Debug)]
pub struct HeartbeatRenewer;

/// A running heartbeat loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatRenewer {
    /// Starts the loop on the current runtime. The first beat is sent right away.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Precondition`] for a zero interval.
    pub fn spawn(transport: Arc<dyn Transport>, task: HeartbeatTask) -> Result<HeartbeatHandle> {
        if task.interval.is_zero() {
            return Err(Error::Precondition("heartbeat_interval"));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Sending a heartbeat to {} every {:?}", task.url, task.interval);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let request = HttpRequest::post(&task.url, task.body.clone())
                    .header("Content-Type", "application/json");
                match transport.send(request).await.and_then(|r| r.error_for_status()) {
                    Ok(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Heartbeat sent");
                    }
                    #[allow(unused_variables)]
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Heartbeat failed: {}", e);
                    }
                }
            }
        });

        Ok(HeartbeatHandle { task: handle })
    }
}

impl HeartbeatHandle {
    /// Stops the loop. No teardown request is sent, the server expires the session.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the loop is still scheduled.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Niconico {
    /// Keeps the given session alive until the handle is stopped or dropped.
    ///
    /// # Errors
    ///
    /// See [`HeartbeatRenewer::spawn`].
    pub fn start_heartbeat(&self, session: &SessionDescriptor) -> Result<HeartbeatHandle> {
        HeartbeatRenewer::spawn(self.context.transport.clone(), session.heartbeat_task())
    }
}
