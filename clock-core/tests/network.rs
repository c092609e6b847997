mod support;

use core::time::Duration;

use clock_core::network::{
    Backoff, NetError, NetworkConfig, NetworkOrchestrator, NetworkTransport, PersistError,
    RefreshOutcome, RetryPolicy, SettingsStore, fetch_with_retry,
};
use clock_core::time::{Delay, MonotonicClock};
use clock_core::{EventBits, EventBus, PeriodicTask, Repeat, Scheduler};
use embassy_futures::block_on;

use support::{VirtualClock, VirtualDelay};

/// Scripted transport. Counts every call.
struct MockTransport<'b> {
    bus: &'b EventBus,
    connect: Result<(), NetError>,
    sync_time: Result<(), NetError>,
    /// Whether a started SNTP client reports completion.
    sntp_completes: bool,
    /// Fetch results consumed front to back; the last one repeats.
    fetches: &'static [Result<(), NetError>],
    fetch_calls: usize,
    sync_calls: u32,
    sntp_starts: u32,
    server_starts: u32,
    server_stops: u32,
    wifi_stops: u32,
}

impl<'b> MockTransport<'b> {
    fn new(bus: &'b EventBus) -> Self {
        Self {
            bus,
            connect: Ok(()),
            sync_time: Ok(()),
            sntp_completes: true,
            fetches: &[Ok(())],
            fetch_calls: 0,
            sync_calls: 0,
            sntp_starts: 0,
            server_starts: 0,
            server_stops: 0,
            wifi_stops: 0,
        }
    }
}

impl NetworkTransport for MockTransport<'_> {
    async fn connect_station(&mut self) -> Result<(), NetError> {
        if self.connect.is_ok() {
            self.bus.task().set(EventBits::STA_CONNECTED);
        }
        self.connect
    }

    async fn sync_time(&mut self) -> Result<(), NetError> {
        self.sync_calls += 1;
        self.sync_time
    }

    async fn start_sntp(&mut self) -> Result<(), NetError> {
        self.sntp_starts += 1;
        if self.sntp_completes {
            self.bus.isr().set(EventBits::TIME_SYNCED);
        }
        Ok(())
    }

    async fn fetch_forecast(&mut self) -> Result<(), NetError> {
        let call = self.fetch_calls;
        self.fetch_calls += 1;
        self.fetches[call.min(self.fetches.len() - 1)]
    }

    async fn start_access_point(&mut self) -> Result<(), NetError> {
        self.bus.task().set(EventBits::AP_ACTIVE);
        Ok(())
    }

    async fn start_config_server(&mut self) -> Result<(), NetError> {
        self.server_starts += 1;
        Ok(())
    }

    async fn stop_config_server(&mut self) -> Result<(), NetError> {
        self.server_stops += 1;
        Ok(())
    }

    async fn stop_wifi(&mut self) -> Result<(), NetError> {
        self.wifi_stops += 1;
        self.bus
            .task()
            .clear(EventBits::AP_ACTIVE | EventBits::STA_CONNECTED);
        Ok(())
    }
}

#[derive(Default)]
struct MockStore {
    changed: bool,
    commits: Vec<Option<EventBits>>,
}

impl SettingsStore for MockStore {
    fn commit(&mut self, dirty_flags: Option<EventBits>) -> Result<bool, PersistError> {
        self.commits.push(dirty_flags);
        Ok(self.changed || dirty_flags.is_some())
    }
}

/// Delay that plays bus changes at given call numbers, like a client joining the portal.
struct ScriptedDelay<'c> {
    clock: &'c VirtualClock,
    bus: &'c EventBus,
    calls: u32,
    script: &'static [(u32, EventBits, bool)],
}

impl Delay for ScriptedDelay<'_> {
    async fn delay(&mut self, duration: Duration) {
        self.calls += 1;
        self.clock.advance(duration);
        for &(call, bits, set) in self.script {
            if call == self.calls {
                if set {
                    self.bus.isr().set(bits);
                } else {
                    self.bus.isr().clear(bits);
                }
            }
        }
    }
}

type TestScheduler<'c> = Scheduler<PeriodicTask, &'c VirtualClock>;

fn scenario_config() -> NetworkConfig {
    NetworkConfig {
        retry: RetryPolicy {
            floor: Duration::from_secs(60),
            ceiling: Duration::from_secs(240),
            factor: 2,
        },
        ..NetworkConfig::new()
    }
}

#[test]
fn transport_is_retried_a_bounded_number_of_times() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let mut transport = MockTransport::new(&bus);
    transport.fetches = &[Err(NetError::Timeout)];
    let mut delay = VirtualDelay::new(&clock);

    let result = block_on(fetch_with_retry(
        &mut transport,
        &mut delay,
        3,
        Duration::from_secs(1),
    ));

    assert_eq!(result, Err(NetError::Timeout));
    assert_eq!(transport.fetch_calls, 3);
    assert_eq!(delay.calls, 2);
    assert_eq!(clock.now_us(), 2_000_000);
}

#[test]
fn transport_retry_stops_at_the_first_success() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let mut transport = MockTransport::new(&bus);
    transport.fetches = &[Err(NetError::Io), Ok(())];
    let mut delay = VirtualDelay::new(&clock);

    let result = block_on(fetch_with_retry(
        &mut transport,
        &mut delay,
        3,
        Duration::from_secs(1),
    ));

    assert_eq!(result, Ok(()));
    assert_eq!(transport.fetch_calls, 2);
}

#[test]
fn failed_refreshes_back_off_then_success_restores_the_cadence() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.fetches = &[Err(NetError::Timeout)];
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        scenario_config(),
    );
    bus.task().set(EventBits::TIME_SYNCED);

    for expected_ms in [60_000, 120_000, 240_000, 240_000] {
        bus.task().set(EventBits::UPDATE_FORECAST);
        let outcome = block_on(orchestrator.handle(bus.get()));

        assert_eq!(outcome, Some(RefreshOutcome::Retrying(expected_ms)));
        assert_eq!(
            scheduler.remaining(PeriodicTask::UpdateForecast),
            Some(expected_ms)
        );
        assert!(!bus.get().contains(EventBits::FORECAST_OK));
    }
    assert_eq!(orchestrator.transport().fetch_calls, 12);

    orchestrator.transport_mut().fetches = &[Ok(())];
    orchestrator.transport_mut().fetch_calls = 0;
    bus.task().set(EventBits::UPDATE_FORECAST);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, Some(RefreshOutcome::Updated));
    assert!(bus.get().contains(EventBits::FORECAST_OK));
    assert_eq!(
        scheduler.remaining(PeriodicTask::UpdateForecast),
        Some(32 * 60 * 1_000)
    );
    assert_eq!(
        scheduler.repeat(PeriodicTask::UpdateForecast),
        Some(Repeat::Forever)
    );
    assert_eq!(
        *orchestrator.backoff(),
        Backoff::new(scenario_config().retry)
    );
}

#[test]
fn handling_releases_the_request_and_wakes_the_display() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::UPDATE_FORECAST | EventBits::TIME_SYNCED);
    block_on(orchestrator.handle(bus.get()));

    let bits = bus.get();
    assert!(bits.contains(EventBits::NEW_DATA | EventBits::STA_CONFIGURED));
    assert!(!bits.intersects(
        EventBits::UPDATE_FORECAST | EventBits::FORCE_UPDATE_FORECAST | EventBits::WAIT_PROCESS
    ));
    assert_eq!(orchestrator.transport().wifi_stops, 1);
    assert_eq!(orchestrator.transport().sync_calls, 0);
}

#[test]
fn forced_refresh_failure_arms_no_retry() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.fetches = &[Err(NetError::Rejected)];
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task()
        .set(EventBits::FORCE_UPDATE_FORECAST | EventBits::TIME_SYNCED);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, Some(RefreshOutcome::Failed));
    assert!(!scheduler.is_scheduled(PeriodicTask::UpdateForecast));
    assert_eq!(
        orchestrator.backoff().current(),
        RetryPolicy::new().floor
    );
}

#[test]
fn connect_failure_counts_as_a_failed_refresh() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.connect = Err(NetError::SsidNotFound);
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::UPDATE_FORECAST);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, Some(RefreshOutcome::Retrying(120_000)));
    assert_eq!(orchestrator.transport().fetch_calls, 0);
    assert!(!bus.get().contains(EventBits::STA_CONFIGURED));
}

#[test]
fn direct_time_fetch_marks_the_clock_synced() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::UPDATE_FORECAST | EventBits::UPDATE_TIME);
    block_on(orchestrator.handle(bus.get()));

    assert!(bus.get().contains(EventBits::TIME_SYNCED));
    assert!(!bus.get().contains(EventBits::UPDATE_TIME));
    assert_eq!(orchestrator.transport().sync_calls, 1);
    assert_eq!(orchestrator.transport().sntp_starts, 0);
}

#[test]
fn sntp_fallback_completes_through_the_bus() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.sync_time = Err(NetError::Timeout);
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::UPDATE_FORECAST | EventBits::UPDATE_TIME);
    block_on(orchestrator.handle(bus.get()));

    assert_eq!(orchestrator.transport().sntp_starts, 1);
    assert!(bus.get().contains(EventBits::TIME_SYNCED));
    assert!(!bus.get().contains(EventBits::UPDATE_TIME));
    // Settle before the time fetch, before the forecast and before release.
    assert_eq!(clock.now_us(), 1_500_000);
}

#[test]
fn silent_sntp_gives_up_after_the_wait_and_keeps_the_time_request() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.sync_time = Err(NetError::Timeout);
    transport.sntp_completes = false;
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::UPDATE_FORECAST | EventBits::UPDATE_TIME);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, Some(RefreshOutcome::Updated));
    assert!(bus.get().contains(EventBits::UPDATE_TIME));
    assert!(!bus.get().contains(EventBits::TIME_SYNCED));
    assert_eq!(clock.now_us(), 13_500_000);
}

#[test]
fn portal_closes_when_no_client_joins() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let config = NetworkConfig {
        client_wait_polls: 5,
        ..NetworkConfig::new()
    };
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        MockStore::default(),
        VirtualDelay::new(&clock),
        config,
    );

    bus.task().set(EventBits::START_SERVER);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, None);
    // Access point settle, five idle polls, the closing poll and the release settle.
    assert_eq!(clock.now_us(), 1_500_000 + 6 * 100_000 + 500_000);
    assert_eq!(orchestrator.transport().server_starts, 1);
    assert_eq!(orchestrator.transport().server_stops, 1);
    assert_eq!(orchestrator.store().commits.as_slice(), &[None]);
    assert!(!bus.get().intersects(
        EventBits::START_SERVER | EventBits::SERVER_RUNNING | EventBits::WAIT_PROCESS
    ));
}

#[test]
fn portal_closes_when_the_client_leaves() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    // Call 1 is the access point settle; polls start at call 2.
    let delay = ScriptedDelay {
        clock: &clock,
        bus: &bus,
        calls: 0,
        script: &[
            (3, EventBits::AP_CLIENT, true),
            (4, EventBits::NOTIFICATIONS_ENABLED, true),
            (8, EventBits::AP_CLIENT, false),
        ],
    };
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        MockStore::default(),
        delay,
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::START_SERVER | EventBits::TIME_SYNCED);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(
        orchestrator.store().commits.as_slice(),
        &[Some(EventBits::NOTIFICATIONS_ENABLED)]
    );
    // Changed settings without a valid forecast request a refresh.
    assert_eq!(outcome, Some(RefreshOutcome::Updated));
    assert!(bus.get().contains(EventBits::FORECAST_OK));
    assert!(!bus.get().contains(EventBits::SERVER_RUNNING));
}

#[test]
fn portal_closes_when_the_display_cancels_it() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let delay = ScriptedDelay {
        clock: &clock,
        bus: &bus,
        calls: 0,
        script: &[(5, EventBits::SERVER_RUNNING, false)],
    };
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        MockStore::default(),
        delay,
        NetworkConfig::new(),
    );

    bus.task().set(EventBits::START_SERVER);
    block_on(orchestrator.handle(bus.get()));

    assert_eq!(orchestrator.transport().server_stops, 1);
    // Ap settle, four polls, then release settle.
    assert_eq!(clock.now_us(), 1_500_000 + 4 * 100_000 + 500_000);
}

#[test]
fn changed_settings_with_a_valid_forecast_skip_the_refresh() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let store = MockStore {
        changed: true,
        commits: Vec::new(),
    };
    let config = NetworkConfig {
        client_wait_polls: 1,
        ..NetworkConfig::new()
    };
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        MockTransport::new(&bus),
        store,
        VirtualDelay::new(&clock),
        config,
    );

    bus.task().set(EventBits::START_SERVER | EventBits::FORECAST_OK);
    let outcome = block_on(orchestrator.handle(bus.get()));

    assert_eq!(outcome, None);
    assert_eq!(orchestrator.transport().fetch_calls, 0);
}

#[test]
fn default_back_off_never_outlasts_the_steady_cadence() {
    let config = NetworkConfig::new();
    assert!(config.retry.ceiling <= config.refresh_interval);

    let mut backoff = Backoff::new(config.retry);
    for _ in 0..16 {
        assert!(backoff.on_failure() <= config.refresh_interval);
    }
}

#[test]
fn retries_are_capped_at_the_refresh_interval() {
    let clock = VirtualClock::new();
    let bus = EventBus::new();
    let scheduler = TestScheduler::new(&clock);
    let mut transport = MockTransport::new(&bus);
    transport.fetches = &[Err(NetError::Timeout)];
    let config = NetworkConfig {
        retry: RetryPolicy {
            floor: Duration::from_secs(60),
            ceiling: Duration::from_secs(3_600),
            factor: 4,
        },
        refresh_interval: Duration::from_secs(300),
        ..NetworkConfig::new()
    };
    let mut orchestrator = NetworkOrchestrator::new(
        bus.task(),
        scheduler.task(),
        transport,
        MockStore::default(),
        VirtualDelay::new(&clock),
        config,
    );
    bus.task().set(EventBits::TIME_SYNCED);

    for expected_ms in [60_000, 240_000, 300_000, 300_000] {
        bus.task().set(EventBits::UPDATE_FORECAST);
        let outcome = block_on(orchestrator.handle(bus.get()));
        assert_eq!(outcome, Some(RefreshOutcome::Retrying(expected_ms)));
        assert_eq!(
            scheduler.remaining(PeriodicTask::UpdateForecast),
            Some(expected_ms)
        );
    }
}
