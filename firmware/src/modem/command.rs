use core::fmt;

/// AT commands issued to the co-processor. `Display` renders the command
/// line without its terminator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AtCommand<'a> {
    EchoOff,
    StationMode,
    SoftApMode,
    RadioOff,
    /// Joins the access point stored in the co-processor's flash.
    JoinSaved,
    ConfigureSntp {
        timezone: i8,
        server: &'a str,
    },
    QueryTime,
    HttpGet {
        url: &'a str,
    },
    SoftAp {
        ssid: &'a str,
        channel: u8,
    },
    /// Provisioning web server. Received credentials are stored by the co-processor.
    WebServer {
        enable: bool,
        port: u16,
    },
}

impl fmt::Display for AtCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::EchoOff => f.write_str("ATE0"),
            Self::StationMode => f.write_str("AT+CWMODE=1"),
            Self::SoftApMode => f.write_str("AT+CWMODE=2"),
            Self::RadioOff => f.write_str("AT+CWMODE=0"),
            Self::JoinSaved => f.write_str("AT+CWJAP"),
            Self::ConfigureSntp { timezone, server } => {
                write!(f, "AT+CIPSNTPCFG=1,{timezone},\"{server}\"")
            }
            Self::QueryTime => f.write_str("AT+CIPSNTPTIME?"),
            Self::HttpGet { url } => write!(f, "AT+HTTPCLIENT=2,0,\"{url}\",,,1"),
            Self::SoftAp { ssid, channel } => write!(f, "AT+CWSAP=\"{ssid}\",\"\",{channel},0"),
            Self::WebServer { enable: true, port } => write!(f, "AT+WEBSERVER=1,{port},50"),
            Self::WebServer { enable: false, .. } => f.write_str("AT+WEBSERVER=0"),
        }
    }
}
