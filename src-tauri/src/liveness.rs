//! Polls the backend health endpoint until it answers, restarting the
//! backend a bounded number of times.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollState {
    Polling,
    Success,
    Exhausted,
}

/// What the driver does after a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    ProbeAfter(Duration),
    /// Show the retry banner, restart the backend, probe again right away.
    Restart,
    /// Show the fatal error; nothing else is scheduled.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub load_retries: u32,
    pub time_spent: u32,
    pub ping_timeout: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct Poller {
    retry: RetryState,
    state: PollState,
    tick: Duration,
}

impl Poller {
    pub fn new(ping_timeout: u32, max_retries: u32, tick: Duration) -> Self {
        Self {
            retry: RetryState {
                load_retries: 0,
                time_spent: 0,
                ping_timeout,
                max_retries,
            },
            state: PollState::Polling,
            tick,
        }
    }

    /// Gives a freshly seeded home extra time to be imported.
    pub fn extend_timeout(&mut self, ticks: u32) {
        self.retry.ping_timeout = self.retry.ping_timeout.saturating_add(ticks);
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn retry(&self) -> RetryState {
        self.retry
    }

    pub fn on_probe_succeeded(&mut self) {
        self.state = PollState::Success;
    }

    pub fn on_probe_failed(&mut self) -> PollAction {
        if self.state != PollState::Polling {
            return PollAction::GiveUp;
        }

        self.retry.time_spent += 1;
        if self.retry.time_spent <= self.retry.ping_timeout {
            return PollAction::ProbeAfter(self.tick);
        }

        if self.retry.load_retries < self.retry.max_retries {
            self.retry.load_retries += 1;
            self.retry.time_spent = 0;
            PollAction::Restart
        } else {
            self.state = PollState::Exhausted;
            PollAction::GiveUp
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` for any HTTP response, `false` on transport errors.
    async fn probe(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                debug!("Health check answered {}", response.status());
                true
            }
            Err(e) => {
                info!("Kolibri server not yet started: {e}");
                false
            }
        }
    }
}
