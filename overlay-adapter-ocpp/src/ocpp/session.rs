//! Station session lifecycle
//!
//! Drives a charging station's registration with its CSMS over the overlay:
//! - Boot sequence (BootNotification -> registration)
//! - Retry while pending or rejected
//! - Heartbeat maintenance at the interval the CSMS hands out

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use overlay_core::{Destination, OverlayError, OverlayNode};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::requests::OcppRequests;
use super::types::*;

/// Session state in the registration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet
    Idle,
    /// BootNotification sent, awaiting response
    BootPending,
    /// Registered with CSMS
    Registered,
    /// CSMS asked to retry later
    Pending,
    /// Registration rejected, will retry
    Rejected,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    heartbeat_interval: Duration,
    registered_at: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
}

/// Registration and heartbeat agent for one station node
#[derive(Clone)]
pub struct StationSession {
    node: OverlayNode,
    info: ChargingStationInfo,
    csms: Destination,
    retry_delay: Duration,
    inner: Arc<RwLock<SessionInner>>,
}

impl StationSession {
    pub fn new(node: OverlayNode, info: ChargingStationInfo) -> Self {
        Self {
            node,
            info,
            csms: Destination::Csms,
            retry_delay: Duration::from_secs(5),
            inner: Arc::new(RwLock::new(SessionInner {
                state: SessionState::Idle,
                heartbeat_interval: Duration::from_secs(300),
                registered_at: None,
                last_heartbeat: None,
            })),
        }
    }

    /// Register with a specific CSMS instead of the default one
    pub fn with_csms(mut self, csms: Destination) -> Self {
        self.csms = csms;
        self
    }

    /// Delay before retrying a boot that failed in transit
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.read().heartbeat_interval
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().registered_at
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_heartbeat
    }

    /// Send one BootNotification and apply the outcome
    pub async fn boot(&self, reason: BootReason) -> Result<RegistrationStatus, OverlayError> {
        self.inner.write().state = SessionState::BootPending;
        info!("{}: sending BootNotification ({:?})", self.node.id(), reason);

        let response = match self
            .node
            .send_boot_notification(self.csms.clone(), self.info.clone(), reason)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.inner.write().state = SessionState::Idle;
                return Err(e);
            }
        };

        let mut inner = self.inner.write();
        if response.interval > 0 {
            inner.heartbeat_interval = Duration::from_secs(response.interval as u64);
        }
        let state = match response.status {
            RegistrationStatus::Accepted => {
                inner.registered_at = Some(response.current_time);
                info!(
                    "{}: registered, heartbeat every {:?}",
                    self.node.id(),
                    inner.heartbeat_interval
                );
                SessionState::Registered
            }
            RegistrationStatus::Pending => SessionState::Pending,
            RegistrationStatus::Rejected => {
                warn!("{}: registration rejected", self.node.id());
                SessionState::Rejected
            }
        };
        inner.state = state;
        Ok(response.status)
    }

    /// Send one Heartbeat
    pub async fn heartbeat(&self) -> Result<DateTime<Utc>, OverlayError> {
        let response = self.node.send_heartbeat(self.csms.clone()).await?;
        debug!("{}: heartbeat acknowledged at {}", self.node.id(), response.current_time);
        self.inner.write().last_heartbeat = Some(response.current_time);
        Ok(response.current_time)
    }

    /// Boot until accepted, then heartbeat forever
    pub async fn run(&self) {
        let mut reason = BootReason::PowerUp;
        loop {
            match self.boot(reason).await {
                Ok(RegistrationStatus::Accepted) => break,
                Ok(_) => tokio::time::sleep(self.heartbeat_interval()).await,
                Err(e) => {
                    warn!("{}: boot failed: {}", self.node.id(), e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
            reason = BootReason::Triggered;
        }

        let mut ticker = tokio::time::interval(self.heartbeat_interval());
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.heartbeat().await {
                warn!("{}: heartbeat failed: {}", self.node.id(), e);
            }
        }
    }
}
