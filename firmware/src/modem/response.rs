//! Classification of lines received from the co-processor.

use clock_core::EventBits;
use winnow::ascii::{alpha1, dec_uint, space1};
use winnow::combinator::{alt, eof, preceded, separated_pair, terminated};
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use crate::wall::WallTime;

/// Line that terminates a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum FinalResult {
    Ok,
    Error,
    Fail,
}

impl FinalResult {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Unsolicited report emitted outside of any command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Urc {
    WifiConnected,
    WifiGotIp,
    WifiDisconnected,
    /// A station associated with our access point.
    ClientJoined,
    ClientLeft,
    TimeUpdated,
    JoinFailed(u8),
    /// Provisioning portal status, `1` once credentials were received.
    Provisioning(u8),
}

impl Urc {
    /// Bits to set and to clear on the event bus.
    pub const fn bus_effect(self) -> (EventBits, EventBits) {
        match self {
            Self::WifiConnected => (EventBits::STA_CONNECTED, EventBits::SSID_NOT_FOUND),
            Self::WifiDisconnected => (EventBits::EMPTY, EventBits::STA_CONNECTED),
            Self::ClientJoined => (EventBits::AP_CLIENT, EventBits::EMPTY),
            Self::ClientLeft => (EventBits::EMPTY, EventBits::AP_CLIENT),
            Self::TimeUpdated => (EventBits::TIME_SYNCED, EventBits::EMPTY),
            Self::JoinFailed(3) => (EventBits::SSID_NOT_FOUND, EventBits::STA_CONNECTED),
            Self::JoinFailed(_) => (EventBits::EMPTY, EventBits::STA_CONNECTED),
            Self::WifiGotIp | Self::Provisioning(_) => (EventBits::EMPTY, EventBits::EMPTY),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Line<'a> {
    Empty,
    Final(FinalResult),
    Urc(Urc),
    /// `+TAG:payload` response data.
    Data { tag: &'a str, payload: &'a str },
    Other(&'a str),
}

pub fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Line::Empty;
    }

    alt((
        terminated(final_result, eof).map(Line::Final),
        urc.map(Line::Urc),
        tagged,
    ))
    .parse(line)
    .unwrap_or(Line::Other(line))
}

/// Parses the `+CIPSNTPTIME:` payload, e.g. `Tue Oct 17 12:34:56 2026`.
pub fn parse_sntp_time(payload: &str) -> Option<WallTime> {
    sntp_time.parse(payload.trim()).ok()
}

/// Parses the `+HTTPCLIENT:` payload and returns the announced body length.
pub fn parse_http_length(payload: &str) -> Option<u32> {
    http_length.parse(payload).ok()
}

fn final_result(input: &mut &str) -> ModalResult<FinalResult> {
    alt((
        "OK".value(FinalResult::Ok),
        "SEND OK".value(FinalResult::Ok),
        "ERROR".value(FinalResult::Error),
        "SEND FAIL".value(FinalResult::Fail),
        "FAIL".value(FinalResult::Fail),
    ))
    .parse_next(input)
}

fn urc(input: &mut &str) -> ModalResult<Urc> {
    alt((
        terminated("WIFI CONNECTED", eof).value(Urc::WifiConnected),
        terminated("WIFI GOT IP", eof).value(Urc::WifiGotIp),
        terminated("WIFI DISCONNECT", eof).value(Urc::WifiDisconnected),
        preceded("+STA_CONNECTED:", rest).value(Urc::ClientJoined),
        preceded("+STA_DISCONNECTED:", rest).value(Urc::ClientLeft),
        terminated("+TIME_UPDATED", eof).value(Urc::TimeUpdated),
        terminated(preceded("+CWJAP:", dec_uint), eof).map(Urc::JoinFailed),
        terminated(preceded("+WEBSERVERRSP:", dec_uint), eof).map(Urc::Provisioning),
    ))
    .parse_next(input)
}

fn tagged<'a>(input: &mut &'a str) -> ModalResult<Line<'a>> {
    preceded('+', separated_pair(take_till(1.., ':'), ':', rest))
        .map(|(tag, payload)| Line::Data { tag, payload })
        .parse_next(input)
}

fn http_length(input: &mut &str) -> ModalResult<u32> {
    terminated(dec_uint, (',', rest)).parse_next(input)
}

fn weekday(input: &mut &str) -> ModalResult<u8> {
    alt((
        "Sun".value(0),
        "Mon".value(1),
        "Tue".value(2),
        "Wed".value(3),
        "Thu".value(4),
        "Fri".value(5),
        "Sat".value(6),
    ))
    .parse_next(input)
}

fn sntp_time(input: &mut &str) -> ModalResult<WallTime> {
    let weekday = weekday.parse_next(input)?;
    (space1, alpha1, space1).parse_next(input)?;
    let _day: u8 = dec_uint.parse_next(input)?;
    space1.parse_next(input)?;
    let (hour, _, minute, _, second): (u8, char, u8, char, u8) =
        (dec_uint, ':', dec_uint, ':', dec_uint).parse_next(input)?;
    space1.parse_next(input)?;
    let year = dec_uint.parse_next(input)?;

    Ok(WallTime {
        weekday,
        hour,
        minute,
        second,
        year,
    })
}
