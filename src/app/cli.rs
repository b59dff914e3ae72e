use std::{
    fs::File,
    io::{self, IsTerminal, Write},
    path::Path,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode},
    execute,
    terminal,
};
use log::debug;

use live_transcoder::{
    ConvertSettings, LiveConversionTask, LiveInput, LiveOutput, ProgressSnapshot, Result,
    TaskEvent, TranscodeError, Transcoder,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const USAGE: &str = "\
Usage: transcode [--config <file.toml>] <command>

Commands:
  convert <input> <output> [format]    stream a file through ffmpeg (q: end input early, Esc: abort)
  thumbnail <input> <output> [seconds] extract one frame as jpeg
  invoke <ffmpeg args...>              run ffmpeg with raw arguments";

/// Runs one command and returns the process exit code.
pub fn run_cli(transcoder: &Transcoder, events: &Receiver<TaskEvent>, args: Vec<String>) -> i32 {
    let mut args = args.into_iter();
    let command = args.next();

    let result = match command.as_deref() {
        Some("convert") => {
            let (Some(input), Some(output)) = (args.next(), args.next()) else {
                return usage();
            };
            convert(transcoder, events, Path::new(&input), Path::new(&output), args.next())
        }
        Some("thumbnail") => {
            let (Some(input), Some(output)) = (args.next(), args.next()) else {
                return usage();
            };
            let frame_time = match args.next().map(|s| s.parse::<f64>()) {
                Some(Ok(seconds)) if seconds >= 0.0 => Some(Duration::from_secs_f64(seconds)),
                Some(_) => {
                    println!("\rInvalid frame time.");
                    return 2;
                }
                None => None,
            };
            transcoder.video_thumbnail(Path::new(&input), Path::new(&output), frame_time)
        }
        Some("invoke") => {
            let raw: Vec<String> = args.collect();
            if raw.is_empty() {
                return usage();
            }
            transcoder.invoke(&raw.join(" "))
        }
        Some(cmd) if cmd != "help" => {
            println!("\rUnknown command: {}.", cmd);
            return usage();
        }
        _ => return usage(),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("\r[ERROR]: {}", e);
            match e.exit_code() {
                Some(code) if code > 0 => code,
                _ => 1,
            }
        }
    }
}

fn usage() -> i32 {
    println!("{}", USAGE);
    2
}

fn convert(
    transcoder: &Transcoder,
    events: &Receiver<TaskEvent>,
    input: &Path,
    output: &Path,
    format: Option<String>,
) -> Result<()> {
    let format = match format {
        Some(format) => format,
        None => output
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                TranscodeError::invalid_argument("output format must be specified")
            })?,
    };

    let source = File::open(input)?;
    let sink = File::create(output)?;
    let mut task = transcoder.convert_live(
        LiveInput::stream(source),
        None,
        LiveOutput::stream(sink),
        Some(&format),
        &ConvertSettings::new(),
    )?;
    task.start()?;
    println!("\rConverting {} -> {}", input.display(), output.display());

    let interactive = io::stdin().is_terminal();
    if interactive {
        terminal::enable_raw_mode()?;
    }
    let result = watch(&mut task, events, interactive);
    if interactive {
        terminal::disable_raw_mode()?;
    }

    for event in events.try_iter() {
        handle_event(event)?;
    }
    eprintln!();
    result
}

fn watch(
    task: &mut LiveConversionTask,
    events: &Receiver<TaskEvent>,
    interactive: bool,
) -> Result<()> {
    loop {
        for event in events.try_iter() {
            handle_event(event)?;
        }
        if task.has_exited() {
            return task.wait();
        }

        if !interactive {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => handle_event(event)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return task.wait(),
            }
            continue;
        }

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key_event) = event::read()? {
                match key_action(key_event.code) {
                    Some(KeyAction::Finish) => {
                        eprint!("\r\nStopping...");
                        return task.stop(false);
                    }
                    Some(KeyAction::Abort) => {
                        eprint!("\r\nAborting...");
                        task.abort();
                        return task.wait();
                    }
                    None => {}
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    /// Cut the input short and let ffmpeg finalize what it has.
    Finish,
    Abort,
}

fn key_action(code: KeyCode) -> Option<KeyAction> {
    match code {
        KeyCode::Char('q') => Some(KeyAction::Finish),
        KeyCode::Esc => Some(KeyAction::Abort),
        _ => None,
    }
}

fn handle_event(event: TaskEvent) -> io::Result<()> {
    match event {
        TaskEvent::Progress(snapshot) => render_progress(snapshot),
        TaskEvent::Log(line) => {
            debug!("ffmpeg: {}", line);
            Ok(())
        }
        TaskEvent::OutputData => Ok(()),
    }
}

fn render_progress(snapshot: ProgressSnapshot) -> io::Result<()> {
    let mut stderr = io::stderr();
    execute!(
        stderr,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    if snapshot.processed == snapshot.total {
        write!(stderr, "{} processed", format_duration(snapshot.processed))?;
    } else {
        write!(
            stderr,
            "{} / {} ({:.1}%)",
            format_duration(snapshot.processed),
            format_duration(snapshot.total),
            snapshot.ratio().unwrap_or(0.0) * 100.0
        )?;
    }
    stderr.flush()
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        duration.subsec_millis() / 10
    )
}
