use std::io::{self, BufRead, Write};

use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;
use tracing::{debug, info};

use chatline::cli::Args;
use chatline::config::{ChatConfig, TransportKind};
use chatline::identity::{validate_name, AnyIdentityStore, IdentityStore, Theme};
use chatline::input::{parse_line, Command};
use chatline::logging;
use chatline::render::TerminalRenderer;
use chatline::session::ChatSession;
use chatline::transport::poll::PollTransport;
use chatline::transport::push::{PushConfig, PushTransport};
use chatline::transport::Transport;

/// Ask for a display name on stdin until a non-blank one arrives.
fn prompt_for_name() -> io::Result<Option<String>> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("display name: ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if let Ok(name) = validate_name(&line) {
            return Ok(Some(name));
        }
    }
}

/// Forward stdin lines to the session as commands until EOF or `/quit`.
///
/// Runs on a plain thread: a blocked stdin read must not hold up runtime
/// shutdown after the session ends.
fn spawn_stdin_reader(tx: mpsc::Sender<Command>) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let Some(command) = parse_line(&line) else {
                continue;
            };
            let quit = command == Command::Quit;
            if tx.blocking_send(command).is_err() || quit {
                break;
            }
        }
        debug!("stdin reader finished");
    });
}

async fn run_session<T: Transport>(
    transport: T,
    store: AnyIdentityStore,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let renderer = TerminalRenderer::stdout(Theme::default());
    let session = ChatSession::start(transport, renderer, store, name.as_deref())?;

    let (tx, rx) = mpsc::channel(32);
    spawn_stdin_reader(tx);
    session.run(rx).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(shell, &mut cmd, "chatline", &mut io::stdout());
        return Ok(());
    }

    let mut config = ChatConfig::load(&args.config)?;
    config.apply_args(&args);
    config.validate(&args.config)?;
    logging::init(&config.log_filter);

    let store = AnyIdentityStore::open(config.identity_db.as_deref())?;
    let name = match args.name.clone() {
        Some(name) => Some(name),
        None if store.current_user()?.is_some() => None,
        None => match prompt_for_name()? {
            Some(name) => Some(name),
            None => return Ok(()),
        },
    };

    info!(transport = %config.transport, "starting chat client");
    match config.transport {
        TransportKind::Poll => {
            let transport = PollTransport::builder(config.base_url.clone())
                .poll_interval(config.poll_interval())
                .connect_timeout(config.connect_timeout())
                .request_timeout(config.request_timeout())
                .build();
            run_session(transport, store, name).await
        }
        TransportKind::Push => {
            let transport = PushTransport::new(
                PushConfig::new(config.push_url.clone())
                    .reconnect_delay(config.reconnect_delay())
                    .connect_timeout(config.connect_timeout()),
            );
            run_session(transport, store, name).await
        }
        TransportKind::Broadcast => Err(
            "the broadcast transport only links sessions inside one process; use --transport poll or push"
                .into(),
        ),
    }
}
