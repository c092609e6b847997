use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clock_core::EventBits;
use clock_core::coordinator::{
    CoordinatorConfig, CycleStatus, PowerCoordinator, ScreenId, WakeCause,
};
use clock_core::network::{NetworkConfig, NetworkOrchestrator, RefreshOutcome};
use clock_core::tasks::PeriodicTask;
use embassy_futures::block_on;

use crate::command::{SimCommand, help_lines};
use crate::sim::{
    Output, OutputKind, Rig, SimDelay, SimIo, SimStore, SimTransport, VirtualClock, format_time,
};

/// Upper bound on polls spent settling a single input.
const SETTLE_POLLS: usize = 64;
/// Upper bound on polls in one active loop.
const CYCLE_POLLS: usize = 100_000;

type Coordinator<'w> = PowerCoordinator<'w, SimIo<'w>, &'w VirtualClock>;
type Orchestrator<'w> =
    NetworkOrchestrator<'w, SimTransport<'w>, SimStore<'w>, SimDelay<'w>, &'w VirtualClock>;

/// Where the device is between console commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Not booted yet.
    Off,
    /// Awake, the next active loop has not started.
    Woken,
    Active,
    /// The active loop ended; light sleep starts with the next command.
    Dozing,
    /// Battery shutdown.
    Halted,
}

pub struct Session<'w> {
    rig: Rig<'w>,
    coordinator: Coordinator<'w>,
    network: Orchestrator<'w>,
    phase: Phase,
}

impl<'w> Session<'w> {
    pub fn new(rig: Rig<'w>) -> Self {
        let coordinator = PowerCoordinator::new(
            rig.world.bus.task(),
            rig.scheduler.task(),
            rig.dispatcher,
            SimIo::new(rig),
            CoordinatorConfig::new(),
        );
        let network = NetworkOrchestrator::new(
            rig.world.bus.task(),
            rig.scheduler.task(),
            SimTransport::new(rig.world),
            SimStore::new(rig.world),
            SimDelay::new(rig),
            NetworkConfig::new(),
        );
        rig.world.bus.restore_stored(EventBits::NOTIFICATIONS_ENABLED);

        Self {
            rig,
            coordinator,
            network,
            phase: Phase::Off,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn coordinator(&self) -> &Coordinator<'w> {
        &self.coordinator
    }

    pub fn execute(&mut self, command: SimCommand<'_>) -> Vec<Output> {
        if self.phase == Phase::Off {
            block_on(self.coordinator.boot());
            self.phase = Phase::Woken;
        }

        match command {
            SimCommand::Rotate(detents) => {
                self.input(EventBits::ENCODER_ROTATE, detents);
            }
            SimCommand::Press => self.input(EventBits::BUTTON_PRESSED, 0),
            SimCommand::Hold => self.input(EventBits::BUTTON_LONG_PRESSED, 0),
            SimCommand::Advance(ms) => self.advance(ms),
            SimCommand::Cycle => self.cycle(),
            SimCommand::Net(online) => {
                self.network.transport_mut().online = online;
                self.note(format!(
                    "radio will {}",
                    if online { "succeed" } else { "time out" }
                ));
            }
            SimCommand::Battery(millivolts) => {
                self.coordinator.io_mut().battery_mv = millivolts;
                self.note(format!("supply set to {millivolts}mV"));
            }
            SimCommand::Status => self.status(),
            SimCommand::Help(topic) => {
                for line in help_lines(topic) {
                    self.note(line);
                }
            }
            SimCommand::Exit => {}
        }

        self.rig.world.drain()
    }

    fn note(&self, text: impl Into<String>) {
        self.rig.world.emit(OutputKind::Note, text);
    }

    fn halted(&self) -> bool {
        if self.phase == Phase::Halted {
            self.note("device is off; restart the emulator");
            return true;
        }
        false
    }

    /// Button or encoder activity: wakes a dozing device and settles the input.
    fn input(&mut self, bit: EventBits, detents: i32) {
        if self.halted() {
            return;
        }
        if self.phase == Phase::Dozing {
            self.sleep(WakeCause::Button);
        }
        self.begin();

        self.coordinator.io_mut().encoder += detents;
        self.rig.dispatcher.on_button_edge(&self.rig.scheduler.isr());
        self.rig.world.bus.task().set(bit);

        for _ in 0..SETTLE_POLLS {
            self.step();
            if self.phase != Phase::Active || self.settled() {
                break;
            }
        }
    }

    fn advance(&mut self, ms: u64) {
        let target = self.rig.now_ms().saturating_add(ms);
        while self.rig.now_ms() < target && !self.halted() {
            if self.phase == Phase::Dozing {
                self.sleep(WakeCause::Timer);
            } else {
                self.step();
            }
        }
    }

    fn cycle(&mut self) {
        if self.halted() {
            return;
        }
        if self.phase == Phase::Dozing {
            self.sleep(WakeCause::Timer);
        }
        for _ in 0..CYCLE_POLLS {
            self.step();
            if self.phase != Phase::Active {
                break;
            }
        }
        if self.phase == Phase::Dozing {
            self.sleep(WakeCause::Timer);
        }
    }

    fn begin(&mut self) {
        if self.phase == Phase::Woken {
            block_on(self.coordinator.begin_cycle());
            self.phase = Phase::Active;
        }
    }

    /// One active-loop poll, then whatever the radio was asked to do.
    fn step(&mut self) {
        self.begin();
        let status = block_on(self.coordinator.poll_once());
        self.serve_network();
        match status {
            CycleStatus::Continue => {}
            CycleStatus::Exit => self.phase = Phase::Dozing,
            CycleStatus::Shutdown => self.phase = Phase::Halted,
        }
    }

    fn sleep(&mut self, cause: WakeCause) {
        self.coordinator.io_mut().wake = cause;
        block_on(self.coordinator.sleep());
        self.phase = Phase::Woken;
    }

    fn serve_network(&mut self) {
        let bits = self.rig.world.bus.get();
        if !bits.intersects(EventBits::NETWORK_REQUESTS) {
            return;
        }

        let outcome = block_on(self.network.handle(bits));
        let text = match outcome {
            Some(RefreshOutcome::Updated) => "forecast updated".to_string(),
            Some(RefreshOutcome::Retrying(ms)) => format!("forecast failed, retrying in {ms}ms"),
            Some(RefreshOutcome::Failed) => "forced forecast failed".to_string(),
            None => "network request served".to_string(),
        };
        self.rig.world.emit(OutputKind::Network, text);
    }

    fn settled(&self) -> bool {
        self.coordinator.screen() == Some(self.coordinator.next_screen())
            && !self.rig.world.bus.get().intersects(EventBits::ACTIVE_WAKE)
    }

    fn status(&self) {
        let world = self.rig.world;
        let coordinator = &self.coordinator;
        let countdown = coordinator.countdown();

        self.note(format!(
            "t={}ms phase={:?} time={}",
            self.rig.now_ms(),
            self.phase,
            format_time(world.local_time())
        ));
        self.note(format!(
            "screen={} next={} backlight={} battery={}",
            coordinator
                .screen()
                .map_or("-", ScreenId::label),
            coordinator.next_screen(),
            if coordinator.backlight() { "on" } else { "off" },
            coordinator
                .battery_mv()
                .map_or_else(|| "unknown".to_string(), |mv| format!("{mv}mV")),
        ));
        self.note(format!(
            "countdown={}m running={} bus={} stored={}",
            countdown.remaining(),
            countdown.is_running(),
            world.bus.get(),
            world.bus.stored_flags(),
        ));
        self.note(format!(
            "retry delay={}ms settings revision={}",
            self.network.backoff().current().as_millis(),
            self.network.store().revision
        ));

        for task in PeriodicTask::ALL {
            if let (Some(remaining), Some(repeat)) =
                (self.rig.scheduler.remaining(task), self.rig.scheduler.repeat(task))
            {
                self.note(format!("  {task:<18} in {remaining}ms ({repeat:?})"));
            }
        }
    }
}

/// Console transcript with host and emulator lines.
pub struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Desk clock emulator transcript")?;
        Ok(logger)
    }

    pub fn host(&mut self, now_ms: u64, line: &str) -> io::Result<()> {
        self.append(now_ms, "HOST>", line)
    }

    pub fn emulator(&mut self, now_ms: u64, output: &Output) -> io::Result<()> {
        self.append(now_ms, "EMU <", &output.text)
    }

    fn append(&mut self, now_ms: u64, prefix: &str, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{now_ms:>10}ms] {prefix} {line}")?;
        self.writer.flush()
    }
}
