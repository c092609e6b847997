use core::fmt::Write as _;

use clock_core::network::{NetError, NetworkTransport};
use clock_core::time::duration_to_millis;
use embassy_stm32::usart::BufferedUartTx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::Write;
use heapless::String;

use super::{AtCommand, FinalResult, MAX_LINE_LEN, ModemConfig, Reply, join_error};
use crate::wall::{WallClock, WallTime};

const REPLY_DEPTH: usize = 8;

/// Replies forwarded by the receiver task.
pub type ReplyChannel = Channel<CriticalSectionRawMutex, Reply, REPLY_DEPTH>;

#[derive(Default)]
struct Response {
    time: Option<WallTime>,
    body_bytes: u32,
}

/// Command side of the co-processor link.
pub struct Modem<'d> {
    tx: BufferedUartTx<'d>,
    replies: Receiver<'d, CriticalSectionRawMutex, Reply, REPLY_DEPTH>,
    wall: &'d WallClock,
    config: ModemConfig,
}

impl<'d> Modem<'d> {
    pub fn new(
        tx: BufferedUartTx<'d>,
        replies: &'d ReplyChannel,
        wall: &'d WallClock,
        config: ModemConfig,
    ) -> Self {
        Self {
            tx,
            replies: replies.receiver(),
            wall,
            config,
        }
    }

    /// Disables command echo so replies are not mistaken for data.
    pub async fn init(&mut self) -> Result<(), NetError> {
        self.command(AtCommand::EchoOff, self.config.command_timeout)
            .await
            .map(|_| ())
    }

    async fn command(
        &mut self,
        command: AtCommand<'_>,
        timeout: core::time::Duration,
    ) -> Result<Response, NetError> {
        // Late replies of an earlier, timed-out command.
        while self.replies.try_receive().is_ok() {}

        let mut line: String<MAX_LINE_LEN> = String::new();
        write!(line, "{command}\r\n").map_err(|_| NetError::Io)?;
        self.tx
            .write_all(line.as_bytes())
            .await
            .map_err(|_| NetError::Io)?;
        self.tx.flush().await.map_err(|_| NetError::Io)?;
        log_command(line.trim_end());

        let deadline = Instant::now() + Duration::from_millis(u64::from(duration_to_millis(timeout)));
        let mut response = Response::default();
        let mut join_code = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(reply) = with_timeout(remaining, self.replies.receive()).await else {
                return Err(NetError::Timeout);
            };

            match reply {
                Reply::Done(FinalResult::Ok) => return Ok(response),
                Reply::Done(FinalResult::Error) => return Err(NetError::Rejected),
                Reply::Done(FinalResult::Fail) => {
                    return Err(join_code.map_or(NetError::Rejected, join_error));
                }
                Reply::JoinFailed(code) => join_code = Some(code),
                Reply::Time(time) => response.time = Some(time),
                Reply::HttpChunk(bytes) => {
                    response.body_bytes = response.body_bytes.saturating_add(bytes);
                }
            }
        }
    }
}

impl NetworkTransport for Modem<'_> {
    async fn connect_station(&mut self) -> Result<(), NetError> {
        let config = self.config;
        self.command(AtCommand::StationMode, config.command_timeout)
            .await?;
        self.command(AtCommand::JoinSaved, config.join_timeout)
            .await?;
        Ok(())
    }

    async fn sync_time(&mut self) -> Result<(), NetError> {
        let response = self
            .command(AtCommand::QueryTime, self.config.command_timeout)
            .await?;

        match response.time {
            Some(time) if time.is_plausible() => {
                self.wall.set(Instant::now().as_micros(), time);
                log_time(time);
                Ok(())
            }
            Some(_) => Err(NetError::Timeout),
            None => Err(NetError::InvalidResponse),
        }
    }

    async fn start_sntp(&mut self) -> Result<(), NetError> {
        let config = self.config;
        let command = AtCommand::ConfigureSntp {
            timezone: config.timezone,
            server: config.sntp_server,
        };
        self.command(command, config.command_timeout).await?;
        Ok(())
    }

    async fn fetch_forecast(&mut self) -> Result<(), NetError> {
        let refreshed = if self.wall.take_stale() {
            self.sync_time().await
        } else {
            Ok(())
        };
        if let Err(err) = refreshed {
            log_failure("time refresh", err);
        }

        let config = self.config;
        let command = AtCommand::HttpGet {
            url: config.forecast_url,
        };
        let response = self.command(command, config.http_timeout).await?;
        if response.body_bytes == 0 {
            return Err(NetError::InvalidResponse);
        }
        log_forecast(response.body_bytes);
        Ok(())
    }

    async fn start_access_point(&mut self) -> Result<(), NetError> {
        let config = self.config;
        self.command(AtCommand::SoftApMode, config.command_timeout)
            .await?;
        let command = AtCommand::SoftAp {
            ssid: config.ap_ssid,
            channel: config.ap_channel,
        };
        self.command(command, config.command_timeout).await?;
        Ok(())
    }

    async fn start_config_server(&mut self) -> Result<(), NetError> {
        let config = self.config;
        let command = AtCommand::WebServer {
            enable: true,
            port: config.portal_port,
        };
        self.command(command, config.command_timeout).await?;
        Ok(())
    }

    async fn stop_config_server(&mut self) -> Result<(), NetError> {
        let config = self.config;
        let command = AtCommand::WebServer {
            enable: false,
            port: config.portal_port,
        };
        self.command(command, config.command_timeout).await?;
        Ok(())
    }

    async fn stop_wifi(&mut self) -> Result<(), NetError> {
        self.command(AtCommand::RadioOff, self.config.command_timeout)
            .await?;
        Ok(())
    }
}

fn log_command(line: &str) {
    defmt::debug!("modem: > {}", line);
}

fn log_time(time: WallTime) {
    defmt::info!("modem: wall clock set to {}", time);
}

fn log_forecast(bytes: u32) {
    defmt::info!("modem: forecast received ({} bytes)", bytes);
}

fn log_failure(step: &str, err: NetError) {
    defmt::warn!("modem: {} failed: {}", step, err);
}
