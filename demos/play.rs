//! # Terminal Play Example
//!
//! Plays a game from the terminal against a running game server:
//!
//! 1. Open the pub/sub channel over WebSocket
//! 2. Rejoin the session stored in `ttt-session.json`, if any
//! 3. Read commands from stdin and print events as they arrive
//! 4. Shut down gracefully on `quit`, Ctrl+C or end of input
//!
//! ## Running
//!
//! ```sh
//! # Start the game server on localhost:8080, then:
//! cargo run --example play
//!
//! # Override the server URLs:
//! TTT_WS_URL=ws://my-server:8080/ws/websocket TTT_HTTP_URL=http://my-server:8080 \
//!     cargo run --example play
//! ```
//!
//! ## Commands
//!
//! ```text
//! create                 create a session and print its id
//! join <session> <name>  join a session
//! click <0-8>            play a cell (or target an armed power)
//! power <KIND>           use a power, e.g. `power EXTRA_TURN`
//! cancel                 drop an armed power
//! view [n]               show snapshot n, or the live game without n
//! history                list recorded snapshots
//! restart                restart the current session
//! leave                  leave and forget the stored session
//! quit                   exit
//! ```

use ttt_session_client::protocol::Cell;
use ttt_session_client::{
    FileStore, GameSession, HttpLobby, PowerKind, SessionConfig, SessionEvent,
    SessionView, TargetingState, WebSocketConnector,
};

use tokio::io::{AsyncBufReadExt, BufReader};

/// Default WebSocket endpoint when `TTT_WS_URL` is not set.
const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws/websocket";

/// Where the identity survives between runs.
const IDENTITY_FILE: &str = "ttt-session.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let ws_url = std::env::var("TTT_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let lobby = match std::env::var("TTT_HTTP_URL") {
        Ok(url) => HttpLobby::new(url),
        Err(_) => HttpLobby::default(),
    };
    tracing::info!("Connecting to {ws_url}");

    let store = FileStore::open(IDENTITY_FILE)?;
    let config = SessionConfig::default().with_lobby(lobby);
    let (mut session, mut events) =
        GameSession::start(WebSocketConnector::new(ws_url), store, config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                on_event(&session, event).await;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !run_command(&session, line.trim()).await {
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Print what matters to a player. Board changes redraw the view.
async fn on_event(session: &GameSession, event: SessionEvent) {
    match event {
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Disconnected { reason } => {
            println!("* disconnected: {}", reason.as_deref().unwrap_or("unknown"));
        }
        SessionEvent::StateUpdated { .. } | SessionEvent::ViewChanged { .. } => {
            if let Ok(view) = session.view().await {
                draw(&view);
            }
        }
        SessionEvent::IdentityConfirmed { participant } => {
            println!("* playing as {} ({})", participant.display_name, participant.symbol);
        }
        SessionEvent::TargetPrompt { power } => {
            println!("* {}: pick a target cell, or `cancel`", power.display_name());
        }
        SessionEvent::TargetingCancelled => println!("* power cancelled"),
        SessionEvent::NoticeRaised(notice) => println!("! {}", notice.message),
        SessionEvent::RejoinAttempted { identity } => {
            println!("* rejoining {} as {}", identity.session_id, identity.display_name);
        }
        SessionEvent::SessionCreated { session_id } => println!("* created session {session_id}"),
        SessionEvent::Left => println!("* left the session"),
        SessionEvent::Status { message } => println!("> {message}"),
        other => tracing::debug!("Event: {other:?}"),
    }
}

/// Run one stdin command. Returns `false` to quit.
async fn run_command(session: &GameSession, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next(), words.next()) {
        (None, ..) => Ok(()),
        (Some("quit" | "exit"), ..) => return false,
        (Some("create"), ..) => session.create_session().await.map(|_| ()),
        (Some("join"), Some(session_id), Some(name)) => session.join(session_id, name).await,
        (Some("click"), Some(cell), _) => match cell.parse() {
            Ok(position) => session.click_cell(position).await,
            Err(_) => {
                println!("? cells are numbered 0 to 8");
                Ok(())
            }
        },
        (Some("power"), Some(kind), _) => match kind.parse::<PowerKind>() {
            Ok(kind) => session.select_power(kind).await,
            Err(e) => {
                println!("? {e}");
                Ok(())
            }
        },
        (Some("cancel"), ..) => session.cancel_targeting().await.map(|_| ()),
        (Some("view"), n, _) => session.select_snapshot(n.and_then(|n| n.parse().ok())).await,
        (Some("history"), ..) => match session.history().await {
            Ok(snapshots) => {
                for snapshot in snapshots {
                    println!(
                        "  #{} {}",
                        snapshot.sequence_number,
                        snapshot.last_entry.as_deref().unwrap_or("(start)")
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        (Some("restart"), ..) => session.restart().await,
        (Some("leave"), ..) => session.leave().await,
        _ => {
            println!("? unknown command: {line}");
            Ok(())
        }
    };
    // Rejections are also reported as status events.
    if let Err(e) = result {
        tracing::debug!("command failed: {e}");
    }
    true
}

fn draw(view: &SessionView) {
    let Some(board) = view.displayed_board() else {
        return;
    };
    if let Some(snapshot) = &view.viewing {
        println!("-- snapshot #{} --", snapshot.sequence_number);
    }
    for row in board.chunks(3) {
        let cells: Vec<String> = row.iter().map(cell_glyph).collect();
        println!(" {}", cells.join(" | "));
    }
    if let Some(game) = &view.game {
        for p in &game.participants {
            println!("  {} {} {} pts {}", p.symbol, p.display_name, p.score, p.capabilities.join(","));
        }
        if view.viewing.is_none() && view.is_my_turn() {
            match view.targeting {
                TargetingState::AwaitingTarget(power) => {
                    println!("  your turn: target for {}", power.display_name());
                }
                TargetingState::Idle => println!("  your turn"),
            }
        }
    }
}

fn cell_glyph(cell: &Cell) -> String {
    match (&cell.value, cell.is_blocked) {
        (Some(value), _) if !value.is_empty() => value.clone(),
        (_, true) => "#".to_string(),
        _ => cell.position.to_string(),
    }
}
