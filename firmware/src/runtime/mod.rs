use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use static_cell::StaticCell;

use clock_core::coordinator::{CoordinatorConfig, Tone};
use clock_core::network::NetworkConfig;
use clock_core::tasks::{TaskIntervals, TickDispatcher};
use clock_core::{EventBits, EventBus, PeriodicTask, Scheduler};

use crate::hw::power::VddMonitor;
use crate::hw::{Board, BoardClock, BoardLinks, TONE_QUEUE_DEPTH, WakeSignal};
use crate::input::DetentCounter;
use crate::modem::{MAX_LINE_LEN, Modem, ModemConfig, ReplyChannel};
use crate::settings::{CredentialsFlag, RamSettings};
use crate::wall::WallClock;

mod buzzer_task;
mod coordinator_task;
mod input_task;
mod modem_task;
mod network_task;
mod tick_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const UART_BUFFER_SIZE: usize = MAX_LINE_LEN * 2;

pub(super) type ToneChannel = Channel<CriticalSectionRawMutex, Tone, TONE_QUEUE_DEPTH>;

pub(super) static BUS: EventBus = EventBus::new();
pub(super) static SCHEDULER: Scheduler<PeriodicTask, BoardClock> = Scheduler::new(BoardClock);
pub(super) static DISPATCHER: TickDispatcher<'static> =
    TickDispatcher::new(BUS.isr(), TaskIntervals::new());

pub(super) static WALL: WallClock = WallClock::new();
pub(super) static DETENTS: DetentCounter = DetentCounter::new();
pub(super) static CREDENTIALS: CredentialsFlag = CredentialsFlag::new();
pub(super) static REPLIES: ReplyChannel = Channel::new();
pub(super) static TONES: ToneChannel = Channel::new();
pub(super) static BUTTON_WAKE: WakeSignal = WakeSignal::new();
pub(super) static RADIO_OFF: WakeSignal = WakeSignal::new();

static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA6,
        PA7,
        PA8,
        PB0,
        PB1,
        USART5,
        ADC1,
        EXTI0,
        EXTI6,
        EXTI7,
        ..
    } = hal::init(config);

    let modem_config = ModemConfig::new();
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = modem_config.baud_rate;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize modem UART");
    let (uart_tx, uart_rx) = uart.split();

    let settings = RamSettings::new(EventBits::NOTIFICATIONS_ENABLED, &CREDENTIALS);
    BUS.restore_stored(settings.record().flags);

    let board = Board::new(
        Output::new(PA8, Level::Low, Speed::Low),
        VddMonitor::new(Adc::new(ADC1)),
        BoardLinks {
            wall: &WALL,
            detents: &DETENTS,
            tones: TONES.sender(),
            button_wake: &BUTTON_WAKE,
            radio_off: &RADIO_OFF,
        },
    );

    spawner
        .spawn(tick_task::run())
        .expect("failed to spawn tick task");

    spawner
        .spawn(input_task::run_button(ExtiInput::new(PA0, EXTI0, Pull::Up)))
        .expect("failed to spawn button task");
    spawner
        .spawn(input_task::run_encoder(
            ExtiInput::new(PA6, EXTI6, Pull::Up),
            ExtiInput::new(PA7, EXTI7, Pull::Up),
        ))
        .expect("failed to spawn encoder task");

    spawner
        .spawn(buzzer_task::run(
            Output::new(PA1, Level::Low, Speed::Low),
            TONES.receiver(),
        ))
        .expect("failed to spawn buzzer task");

    spawner
        .spawn(modem_task::run(uart_rx))
        .expect("failed to spawn modem receiver task");

    spawner
        .spawn(network_task::run(
            Modem::new(uart_tx, &REPLIES, &WALL, modem_config),
            settings,
            NetworkConfig::new(),
        ))
        .expect("failed to spawn network task");

    spawner
        .spawn(coordinator_task::run(board, CoordinatorConfig::new()))
        .expect("failed to spawn coordinator task");

    core::future::pending::<()>().await;
}
