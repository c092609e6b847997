use embassy_futures::select::{Either, select};

use clock_core::network::{NetworkConfig, NetworkOrchestrator, NetworkTransport};

use super::{BUS, RADIO_OFF, SCHEDULER};
use crate::hw::BoardDelay;
use crate::modem::Modem;
use crate::settings::RamSettings;

#[embassy_executor::task]
pub async fn run(
    mut modem: Modem<'static>,
    settings: RamSettings<'static>,
    config: NetworkConfig,
) -> ! {
    if let Err(err) = modem.init().await {
        defmt::warn!("network: modem init failed ({})", err);
    }

    let mut orchestrator =
        NetworkOrchestrator::new(BUS.task(), SCHEDULER.task(), modem, settings, BoardDelay, config);

    loop {
        match select(orchestrator.serve_next(), RADIO_OFF.wait()).await {
            Either::First(()) => {}
            Either::Second(()) => {
                if let Err(err) = orchestrator.transport_mut().stop_wifi().await {
                    defmt::warn!("network: radio off failed ({})", err);
                }
            }
        }
    }
}
