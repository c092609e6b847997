use embassy_stm32::usart::BufferedUartRx;
use embassy_time::{Duration, Timer};
use embedded_io_async::Read;

use super::{BUS, CREDENTIALS, REPLIES, WALL};
use crate::modem::{Line, LineAssembler, Reply, Urc, parse_http_length, parse_line, parse_sntp_time};

/// Parses every line from the co-processor and routes it.
#[embassy_executor::task]
pub async fn run(mut rx: BufferedUartRx<'static>) -> ! {
    let mut assembler = LineAssembler::new();
    let mut chunk = [0u8; 64];
    loop {
        let count = match rx.read(&mut chunk).await {
            Ok(count) => count,
            Err(_) => {
                defmt::warn!("modem: UART read error");
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
        };

        for &byte in &chunk[..count] {
            if let Some(line) = assembler.push(byte) {
                route(parse_line(line));
            }
        }
    }
}

fn route(line: Line<'_>) {
    match line {
        Line::Empty | Line::Other(_) => {}
        Line::Final(result) => forward(Reply::Done(result)),
        Line::Urc(urc) => {
            let (set, clear) = urc.bus_effect();
            let bus = BUS.task();
            bus.clear(clear);
            bus.set(set);
            match urc {
                Urc::JoinFailed(code) => forward(Reply::JoinFailed(code)),
                Urc::Provisioning(1) => CREDENTIALS.raise(),
                Urc::TimeUpdated => WALL.mark_stale(),
                _ => {}
            }
            defmt::debug!("modem: {}", urc);
        }
        Line::Data { tag, payload } => match tag {
            "CIPSNTPTIME" => match parse_sntp_time(payload) {
                Some(time) => forward(Reply::Time(time)),
                None => defmt::warn!("modem: unreadable time {=str}", payload),
            },
            "HTTPCLIENT" => {
                if let Some(bytes) = parse_http_length(payload) {
                    forward(Reply::HttpChunk(bytes));
                }
            }
            _ => {}
        },
    }
}

fn forward(reply: Reply) {
    if REPLIES.try_send(reply).is_err() {
        defmt::warn!("modem: reply queue full, dropping {}", reply);
    }
}
