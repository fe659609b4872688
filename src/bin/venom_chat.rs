//! venom-chat - interactive prompt for a shared-memory chat room
//!
//! # Usage
//!
//! ```bash
//! # Join room 7
//! venom-chat --room 7
//!
//! # Prompt for the room, custom config
//! venom-chat --config ~/.config/venom-chat.toml
//!
//! # Administrative reset: remove room 7's roster
//! venom-chat --room 7 --destroy
//! ```
//!
//! SIGINT, SIGTERM and SIGHUP leave the room before exiting.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use clap::Parser;
use tracing::{error, info, warn};

use venom_chat::command::{self, Command, HELP};
use venom_chat::{fanout, liveness, logging, membership};
use venom_chat::{ChatError, Config, Identity, Result, RoomKey, Roster, Session};

#[derive(Parser, Debug)]
#[command(name = "venom-chat", version, about = "Chat with other sessions on this host")]
struct Cli {
    /// Room number; asked for interactively when absent
    #[arg(short, long)]
    room: Option<String>,

    /// Configuration file
    #[arg(short, long, default_value = "venom-chat.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Remove the room's roster and exit
    #[arg(long)]
    destroy: bool,
}

/// Everything the prompt loop reacts to
enum Event {
    Line(String),
    /// stdin reached EOF or failed
    Closed,
    /// SIGINT, SIGTERM or SIGHUP
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(_) if !cli.config.exists() => Config::default(),
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "venom-chat failed");
            eprintln!("  ## {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let key = match &cli.room {
        Some(room) => RoomKey::parse(room),
        None => RoomKey::parse(&prompt_room()?),
    };

    if cli.destroy {
        return Roster::destroy_room(key, &config.roster);
    }
    let roster = Roster::attach(key, &config.roster)?;

    let identity = Identity::from_env()?;
    let registry = liveness::from_config(&config.liveness);
    let mut session = Session::new(identity);

    let joined = membership::join(&roster, registry.as_ref(), &mut session)?;
    for stale in &joined.evicted {
        println!("  ## {} autodelete.", stale);
    }
    print_list(&roster);

    let events = spawn_event_sources()?;
    let mut stdout = io::stdout();

    loop {
        print!("_");
        stdout.flush()?;

        let line = match events.recv() {
            Ok(Event::Line(line)) => line,
            Ok(Event::Closed) | Err(_) => break,
            Ok(Event::Interrupted) => {
                info!("Interrupted, leaving room");
                break;
            }
        };

        match command::parse(&line) {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Clear => match membership::clear_all(&roster) {
                Ok(report) => {
                    for failure in &report.failures {
                        eprintln!("  ## {failure}");
                    }
                }
                Err(e) => eprintln!("  ## {e}"),
            },
            Command::List => print_list(&roster),
            Command::Hide => session.set_anonymous(true),
            Command::NoHide => session.set_anonymous(false),
            Command::Send(text) => {
                if !membership::still_registered(&roster, &session) {
                    println!("  ## You are no longer in room {key}; quit with :q and come back.");
                }
                let report = fanout::send(&roster, &text, &session);
                for failure in &report.failures {
                    eprintln!("  ## {failure}");
                }
            }
            Command::Empty => {}
        }
    }

    match membership::leave(roster, &mut session) {
        Ok(report) => {
            if report.room_empty {
                info!(room = %key, destroyed = report.destroyed, "Room is now empty");
            }
            Ok(())
        }
        // Kicked out and never rejoined: nothing left to clean up
        Err(ChatError::NotRegistered) => Ok(()),
        Err(e) => Err(e),
    }
}

fn prompt_room() -> Result<String> {
    print!("Please enter room No.:");
    io::stdout().flush()?;
    let mut room = String::new();
    io::stdin().lock().read_line(&mut room)?;
    Ok(room)
}

/// Feed stdin lines and termination signals into one channel
///
/// The signal handler only posts an event; Leave runs on the main thread.
fn spawn_event_sources() -> Result<mpsc::Receiver<Event>> {
    let (tx, rx) = mpsc::channel();

    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Event::Interrupted);
    })
    .map_err(|e| ChatError::Config(format!("cannot install signal handler: {e}")))?;

    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            loop {
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => {
                        let _ = tx.send(Event::Closed);
                        break;
                    }
                    Ok(_) => {
                        if tx.send(Event::Line(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin failed");
                        let _ = tx.send(Event::Closed);
                        break;
                    }
                }
            }
        })?;

    Ok(rx)
}

fn print_list(roster: &Roster) {
    println!("  -- room {} --", roster.key());
    for (index, identity) in membership::list(roster) {
        println!("  {index:>2} {identity}");
    }
    println!("  ----------");
}
