//! ESP-AT Wi-Fi co-processor link.
//!
//! The co-processor sits on a UART and speaks line-oriented AT commands.
//! Commands are issued by [`Modem`] from the network task; a receiver task
//! parses every incoming line, turns unsolicited reports into bus bits and
//! forwards command replies over a channel.

use core::time::Duration;

use clock_core::network::NetError;

use crate::wall::WallTime;

mod command;
mod line;
mod response;
#[cfg(target_os = "none")]
mod transport;

pub use command::AtCommand;
pub use line::LineAssembler;
pub use response::{
    FinalResult, Line, Urc, parse_http_length, parse_line, parse_sntp_time,
};
#[cfg(target_os = "none")]
pub use transport::{Modem, ReplyChannel};

/// Longest line kept by the receiver; longer payload lines are truncated.
pub const MAX_LINE_LEN: usize = 256;

const DEFAULT_FORECAST_URL: &str = match option_env!("CLOCK_FORECAST_URL") {
    Some(url) => url,
    None => "http://api.openweathermap.org/data/2.5/forecast?q=Berlin&units=metric&cnt=5",
};

/// Link and service parameters for the co-processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModemConfig {
    pub baud_rate: u32,
    /// Reply deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Joining a network can take much longer than other commands.
    pub join_timeout: Duration,
    pub http_timeout: Duration,
    /// Hours east of UTC applied by the co-processor's SNTP client.
    pub timezone: i8,
    pub sntp_server: &'static str,
    pub forecast_url: &'static str,
    pub ap_ssid: &'static str,
    pub ap_channel: u8,
    pub portal_port: u16,
}

impl ModemConfig {
    pub const fn new() -> Self {
        Self {
            baud_rate: 115_200,
            command_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(20),
            http_timeout: Duration::from_secs(15),
            timezone: 1,
            sntp_server: "pool.ntp.org",
            forecast_url: DEFAULT_FORECAST_URL,
            ap_ssid: "DeskClock",
            ap_channel: 5,
            portal_port: 80,
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-related lines forwarded from the receiver to the transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Reply {
    Done(FinalResult),
    /// `+CWJAP:<code>` ahead of a `FAIL`.
    JoinFailed(u8),
    Time(WallTime),
    /// Body bytes of one `+HTTPCLIENT` chunk.
    HttpChunk(u32),
}

/// Maps an ESP-AT join failure code to a transport error.
pub const fn join_error(code: u8) -> NetError {
    match code {
        1 => NetError::Timeout,
        2 => NetError::AuthFailed,
        3 => NetError::SsidNotFound,
        _ => NetError::Rejected,
    }
}
