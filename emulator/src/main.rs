mod command;
mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clock_core::tasks::{TaskIntervals, TickDispatcher};
use crossterm::style::Stylize;

use command::{SimCommand, parse_command};
use session::{Session, TranscriptLogger};
use sim::{Output, OutputKind, Rig, SimScheduler, World};

fn main() -> io::Result<()> {
    let transcript_path = parse_transcript_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: clock-emulator [--transcript <path>]");
        process::exit(2);
    });
    let mut transcript = transcript_path
        .as_deref()
        .map(TranscriptLogger::create)
        .transpose()?;

    let world = World::new();
    let scheduler = SimScheduler::new(&world.clock);
    let dispatcher = TickDispatcher::new(world.bus.isr(), TaskIntervals::new());
    let rig = Rig::new(&world, &scheduler, &dispatcher);
    let mut session = Session::new(rig);

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Desk clock emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(log) = transcript.as_mut() {
            log.host(rig.now_ms(), trimmed)?;
        }

        let Some(command) = parse_command(trimmed) else {
            writeln!(writer, "{}", format!("Unrecognised command `{trimmed}`").red())?;
            continue;
        };
        if command == SimCommand::Exit {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for output in session.execute(command) {
            if let Some(log) = transcript.as_mut() {
                log.emulator(rig.now_ms(), &output)?;
            }
            print_output(&mut writer, &output)?;
        }
    }

    Ok(())
}

fn print_output(writer: &mut impl Write, output: &Output) -> io::Result<()> {
    let text = output.text.as_str();
    match output.kind {
        OutputKind::Frame => writeln!(writer, "{}", text.cyan().bold()),
        OutputKind::Tone => writeln!(writer, "{}", text.yellow()),
        OutputKind::Network => writeln!(writer, "{}", text.magenta()),
        OutputKind::Power => writeln!(writer, "{}", text.dark_grey()),
        OutputKind::Note => writeln!(writer, "{text}"),
    }
}

fn parse_transcript_path() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(None);
    };

    if let Some(value) = arg.strip_prefix("--transcript=") {
        Ok(Some(PathBuf::from(value)))
    } else if arg == "--transcript" {
        args.next()
            .map(|value| Some(PathBuf::from(value)))
            .ok_or_else(|| "Expected value after --transcript".to_string())
    } else {
        Err(format!("Unknown argument `{arg}`"))
    }
}
