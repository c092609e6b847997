use clock_core::coordinator::{CoordinatorConfig, PowerCoordinator};

use super::{BUS, DISPATCHER, SCHEDULER};
use crate::hw::Board;

#[embassy_executor::task]
pub async fn run(board: Board, config: CoordinatorConfig) {
    let mut coordinator =
        PowerCoordinator::new(BUS.task(), SCHEDULER.task(), &DISPATCHER, board, config);
    coordinator.run().await;
    defmt::error!("coordinator: stopped");
}
