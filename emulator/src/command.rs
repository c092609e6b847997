//! Console command grammar.

use winnow::ascii::{alpha1, dec_int, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, preceded, terminated};
use winnow::prelude::*;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("rotate", "rotate <detents>   - turn the encoder, negative is counter-clockwise"),
    ("press", "press              - short button press"),
    ("hold", "hold               - long button press (backlight)"),
    ("advance", "advance <ms>       - let virtual time pass"),
    ("cycle", "cycle              - finish the wake cycle and sleep to the next wake"),
    ("net", "net ok|fail        - make the radio succeed or time out"),
    ("battery", "battery <mV>       - set the supply voltage"),
    ("status", "status             - show bus, screen and scheduler state"),
    ("help", "help [topic]       - show help for a command"),
    ("exit", "exit               - leave the emulator"),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimCommand<'a> {
    Rotate(i32),
    Press,
    Hold,
    Advance(u64),
    Cycle,
    Net(bool),
    Battery(u16),
    Status,
    Help(Option<&'a str>),
    Exit,
}

pub fn parse_command(line: &str) -> Option<SimCommand<'_>> {
    terminated(command, (space0, eof))
        .parse(line.trim())
        .ok()
}

fn command<'a>(input: &mut &'a str) -> ModalResult<SimCommand<'a>> {
    alt((
        preceded(("rotate", space1), dec_int).map(SimCommand::Rotate),
        preceded(("advance", space1), dec_uint).map(SimCommand::Advance),
        preceded(("battery", space1), dec_uint).map(SimCommand::Battery),
        preceded(
            ("net", space1),
            alt(("ok".value(true), "fail".value(false))),
        )
        .map(SimCommand::Net),
        preceded(("help", space1), alpha1).map(|topic| SimCommand::Help(Some(topic))),
        "help".value(SimCommand::Help(None)),
        "press".value(SimCommand::Press),
        "hold".value(SimCommand::Hold),
        "cycle".value(SimCommand::Cycle),
        "status".value(SimCommand::Status),
        alt(("exit", "quit")).value(SimCommand::Exit),
    ))
    .parse_next(input)
}

pub fn help_lines(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(name) => match HELP_TOPICS.iter().find(|(topic, _)| *topic == name) {
            Some((_, usage)) => vec![(*usage).to_string()],
            None => vec![format!("No help for `{name}`. Topics: {}", topic_list())],
        },
        None => HELP_TOPICS
            .iter()
            .map(|(_, usage)| (*usage).to_string())
            .collect(),
    }
}

fn topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}
