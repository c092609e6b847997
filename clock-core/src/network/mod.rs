//! Network service orchestrator.
//!
//! A single long-running task that sleeps on the bus until a forecast refresh
//! or a configuration session is requested. Refresh failures are retried on
//! two levels: the transport call itself a few times in quick succession,
//! then the whole refresh through the scheduler with exponential back-off.

use core::fmt;
use core::future::pending;
use core::time::Duration;

use crate::bits::EventBits;
use crate::bus::TaskBus;
use crate::scheduler::{DEFAULT_CAPACITY, Repeat, ScheduleError, TaskScheduler};
use crate::tasks::PeriodicTask;
use crate::time::{Delay, MonotonicClock};

mod backoff;

pub use backoff::{Backoff, RetryPolicy};

/// Failures reported by the radio transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetError {
    NotConfigured,
    SsidNotFound,
    AuthFailed,
    Timeout,
    Rejected,
    InvalidResponse,
    Io,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failures reported by the settings store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistError {
    WriteFailed,
    Corrupt,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Wi-Fi co-processor operations used by the orchestrator.
///
/// Connectivity status bits (`STA_CONNECTED`, `AP_CLIENT`, `SSID_NOT_FOUND`)
/// and the SNTP completion bit are reported by the transport's own event
/// path directly onto the bus.
#[allow(async_fn_in_trait)]
pub trait NetworkTransport {
    /// Joins the configured access point.
    ///
    /// # Errors
    ///
    /// The join failure reported by the co-processor, or [`NetError::Timeout`].
    async fn connect_station(&mut self) -> Result<(), NetError>;

    /// Direct time fetch. Success means the wall clock is now valid.
    ///
    /// # Errors
    ///
    /// Fails when the co-processor has no plausible time to report.
    async fn sync_time(&mut self) -> Result<(), NetError>;

    /// Starts background SNTP; completion sets `TIME_SYNCED`.
    ///
    /// # Errors
    ///
    /// Fails when the co-processor rejects the SNTP configuration.
    async fn start_sntp(&mut self) -> Result<(), NetError>;

    /// # Errors
    ///
    /// Fails when the request or its response body does not complete.
    async fn fetch_forecast(&mut self) -> Result<(), NetError>;

    /// # Errors
    ///
    /// Fails when the co-processor rejects a radio command.
    async fn start_access_point(&mut self) -> Result<(), NetError>;

    /// # Errors
    ///
    /// Fails when the co-processor rejects a radio command.
    async fn start_config_server(&mut self) -> Result<(), NetError>;

    /// # Errors
    ///
    /// Fails when the co-processor rejects a radio command.
    async fn stop_config_server(&mut self) -> Result<(), NetError>;

    /// # Errors
    ///
    /// Fails when the co-processor rejects a radio command.
    async fn stop_wifi(&mut self) -> Result<(), NetError>;
}

/// Persists settings edited during a configuration session.
pub trait SettingsStore {
    /// Writes pending changes. `dirty_flags` carries the stored bus bits when
    /// they changed since the last commit. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] when the backing storage rejects the write.
    fn commit(&mut self, dirty_flags: Option<EventBits>) -> Result<bool, PersistError>;
}

/// Tunables for the orchestrator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NetworkConfig {
    pub retry: RetryPolicy,
    /// Steady refresh cadence after a successful fetch.
    pub refresh_interval: Duration,
    /// How long to wait for SNTP after a failed direct time fetch.
    pub sntp_wait: Duration,
    /// Polls without an associated client before the portal closes.
    pub client_wait_polls: u32,
    pub poll_interval: Duration,
    pub ap_settle: Duration,
    /// Pause between radio steps and before releasing the trigger bits.
    pub settle: Duration,
    pub transport_attempts: u8,
    pub transport_retry_delay: Duration,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            retry: RetryPolicy::new(),
            refresh_interval: Duration::from_secs(32 * 60),
            sntp_wait: Duration::from_secs(12),
            client_wait_polls: 600,
            poll_interval: Duration::from_millis(100),
            ap_settle: Duration::from_millis(1_500),
            settle: Duration::from_millis(500),
            transport_attempts: 3,
            transport_retry_delay: Duration::from_secs(1),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one forecast refresh.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RefreshOutcome {
    Updated,
    /// Failed; the next attempt was armed after the given back-off in ms.
    Retrying(u32),
    /// Failed on a forced request; no retry is armed.
    Failed,
}

/// Calls `fetch` up to `attempts` times, sleeping `spacing` between failures.
///
/// # Errors
///
/// Returns the error of the last attempt when every attempt failed.
pub async fn fetch_with_retry<T, D>(
    transport: &mut T,
    delay: &mut D,
    attempts: u8,
    spacing: Duration,
) -> Result<(), NetError>
where
    T: NetworkTransport,
    D: Delay,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match transport.fetch_forecast().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                log_fetch_retry(attempt, attempts, err);
                attempt += 1;
                delay.delay(spacing).await;
            }
        }
    }
}

/// Serves forecast refreshes and configuration sessions.
pub struct NetworkOrchestrator<'a, T, S, D, C, const N: usize = DEFAULT_CAPACITY> {
    bus: TaskBus<'a>,
    scheduler: TaskScheduler<'a, PeriodicTask, C, N>,
    transport: T,
    store: S,
    delay: D,
    config: NetworkConfig,
    backoff: Backoff,
}

impl<'a, T, S, D, C, const N: usize> NetworkOrchestrator<'a, T, S, D, C, N>
where
    T: NetworkTransport,
    S: SettingsStore,
    D: Delay,
    C: MonotonicClock,
{
    #[must_use]
    pub fn new(
        bus: TaskBus<'a>,
        scheduler: TaskScheduler<'a, PeriodicTask, C, N>,
        transport: T,
        store: S,
        delay: D,
        config: NetworkConfig,
    ) -> Self {
        Self {
            bus,
            scheduler,
            transport,
            store,
            delay,
            backoff: Backoff::new(config.retry),
            config,
        }
    }

    /// Serves requests forever.
    pub async fn run(&mut self) -> ! {
        loop {
            self.serve_next().await;
        }
    }

    /// Blocks until a request bit is set, then handles it.
    pub async fn serve_next(&mut self) {
        let bits = self
            .bus
            .wait(EventBits::NETWORK_REQUESTS, pending::<()>())
            .await;
        self.handle(bits).await;
    }

    /// Handles the requests present in `bits`.
    pub async fn handle(&mut self, bits: EventBits) -> Option<RefreshOutcome> {
        self.bus.set(EventBits::WAIT_PROCESS);

        if bits.contains(EventBits::START_SERVER) {
            self.serve_config_session().await;
            self.bus.clear(EventBits::START_SERVER);
        }

        let bits = self.bus.get();
        let mut outcome = None;
        if bits.intersects(EventBits::UPDATE_FORECAST | EventBits::FORCE_UPDATE_FORECAST) {
            outcome = Some(self.refresh(bits).await);
        }

        if let Err(err) = self.transport.stop_wifi().await {
            log_step_failed("stop wifi", err);
        }
        self.bus.set(EventBits::NEW_DATA);
        self.delay.delay(self.config.settle).await;
        self.bus.clear(
            EventBits::UPDATE_FORECAST | EventBits::FORCE_UPDATE_FORECAST | EventBits::WAIT_PROCESS,
        );

        outcome
    }

    /// Runs the access-point settings portal until it closes.
    pub async fn serve_config_session(&mut self) {
        if let Err(err) = self.transport.start_access_point().await {
            log_step_failed("start access point", err);
            return;
        }
        self.delay.delay(self.config.ap_settle).await;

        if let Err(err) = self.transport.start_config_server().await {
            log_step_failed("start config server", err);
            return;
        }

        self.bus
            .set(EventBits::SERVER_RUNNING | EventBits::NEW_DATA);
        log_session_opened();

        let mut client_seen = false;
        let mut idle_polls = 0_u32;
        loop {
            let bits = self.bus.get();
            if !bits.contains(EventBits::SERVER_RUNNING) {
                break;
            }

            if client_seen {
                if !bits.contains(EventBits::AP_CLIENT) {
                    self.bus.clear(EventBits::SERVER_RUNNING);
                }
            } else if bits.contains(EventBits::AP_CLIENT) {
                client_seen = true;
                idle_polls = 0;
            } else if idle_polls >= self.config.client_wait_polls {
                self.bus.clear(EventBits::SERVER_RUNNING);
            } else {
                idle_polls += 1;
            }

            self.delay.delay(self.config.poll_interval).await;
        }

        if let Err(err) = self.transport.stop_config_server().await {
            log_step_failed("stop config server", err);
        }

        match self.store.commit(self.bus.bus().take_dirty_flags()) {
            Ok(changed) => {
                log_session_closed(changed);
                if changed && !self.bus.get().contains(EventBits::FORECAST_OK) {
                    self.bus.set(EventBits::UPDATE_FORECAST);
                }
            }
            Err(err) => log_commit_failed(err),
        }
    }

    /// Connects, syncs time if needed and fetches the forecast.
    pub async fn refresh(&mut self, bits: EventBits) -> RefreshOutcome {
        if let Err(err) = self.transport.connect_station().await {
            log_step_failed("connect", err);
            return self.on_refresh_failed(bits).await;
        }
        self.bus.set(EventBits::STA_CONFIGURED);

        if bits.contains(EventBits::UPDATE_TIME) || !bits.contains(EventBits::TIME_SYNCED) {
            self.sync_time().await;
        }

        self.delay.delay(self.config.settle).await;
        let fetched = fetch_with_retry(
            &mut self.transport,
            &mut self.delay,
            self.config.transport_attempts,
            self.config.transport_retry_delay,
        )
        .await;

        match fetched {
            Ok(()) => {
                self.bus.set(EventBits::FORECAST_OK);
                self.backoff.on_success();
                self.arm_refresh(self.config.refresh_interval).await;
                log_refresh_ok();
                RefreshOutcome::Updated
            }
            Err(err) => {
                log_step_failed("fetch forecast", err);
                self.on_refresh_failed(bits).await
            }
        }
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn sync_time(&mut self) {
        self.delay.delay(self.config.settle).await;
        match self.transport.sync_time().await {
            Ok(()) => {
                self.bus.set(EventBits::TIME_SYNCED);
            }
            Err(err) => {
                log_step_failed("direct time fetch", err);
                if let Err(err) = self.transport.start_sntp().await {
                    log_step_failed("start sntp", err);
                } else {
                    let bus = self.bus;
                    bus.wait(EventBits::TIME_SYNCED, self.delay.delay(self.config.sntp_wait))
                        .await;
                }
            }
        }

        if self.bus.get().contains(EventBits::TIME_SYNCED) {
            self.bus.clear(EventBits::UPDATE_TIME);
        }
    }

    async fn on_refresh_failed(&mut self, bits: EventBits) -> RefreshOutcome {
        self.bus.clear(EventBits::FORECAST_OK);
        if !bits.contains(EventBits::UPDATE_FORECAST) {
            return RefreshOutcome::Failed;
        }

        let retry = self.backoff.on_failure().min(self.config.refresh_interval);
        self.arm_refresh(retry).await;
        RefreshOutcome::Retrying(u32::try_from(retry.as_millis()).unwrap_or(u32::MAX))
    }

    async fn arm_refresh(&mut self, delay: Duration) {
        if let Err(err) = self
            .scheduler
            .schedule(PeriodicTask::UpdateForecast, delay, Repeat::Forever)
            .await
        {
            log_schedule_failed(err);
        }
    }
}

#[cfg(feature = "defmt")]
fn log_fetch_retry(attempt: u8, attempts: u8, err: NetError) {
    defmt::warn!("network: fetch attempt {}/{} failed: {}", attempt, attempts, err);
}

#[cfg(not(feature = "defmt"))]
fn log_fetch_retry(_: u8, _: u8, _: NetError) {}

#[cfg(feature = "defmt")]
fn log_step_failed(step: &str, err: NetError) {
    defmt::warn!("network: {} failed: {}", step, err);
}

#[cfg(not(feature = "defmt"))]
fn log_step_failed(_: &str, _: NetError) {}

#[cfg(feature = "defmt")]
fn log_session_opened() {
    defmt::info!("network: configuration portal open");
}

#[cfg(not(feature = "defmt"))]
fn log_session_opened() {}

#[cfg(feature = "defmt")]
fn log_session_closed(changed: bool) {
    defmt::info!("network: configuration portal closed (changed={})", changed);
}

#[cfg(not(feature = "defmt"))]
fn log_session_closed(_: bool) {}

#[cfg(feature = "defmt")]
fn log_commit_failed(err: PersistError) {
    defmt::error!("network: settings commit failed: {}", err);
}

#[cfg(not(feature = "defmt"))]
fn log_commit_failed(_: PersistError) {}

#[cfg(feature = "defmt")]
fn log_refresh_ok() {
    defmt::info!("network: forecast refreshed");
}

#[cfg(not(feature = "defmt"))]
fn log_refresh_ok() {}

#[cfg(feature = "defmt")]
fn log_schedule_failed(err: ScheduleError) {
    defmt::warn!("network: could not arm forecast refresh: {}", err);
}

#[cfg(not(feature = "defmt"))]
fn log_schedule_failed(_: ScheduleError) {}
