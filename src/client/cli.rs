//! Line-oriented shell around a room session.
//!
//! Reads commands from stdin (`send <path>`, `save [dir]`, `peers`, `quit`)
//! and prints session events as they arrive. This is the whole user surface
//! of the client; everything stateful lives in the session.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::client::session::{self, JoinOptions, SessionCommand, SessionEvent};

/// Join a room and drive it from stdin until the session ends.
pub async fn run(opts: JoinOptions) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let room_id = opts.room_id.clone();
    let mut session = tokio::spawn(session::run(opts, cmd_rx, event_tx));

    println!("Joining room {room_id}...");
    println!("Commands: send <path> | save [dir] | peers | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(SessionEvent::Ended) | None => break,
                Some(event) => print_event(event),
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    match parse_command(&line) {
                        Some(cmd) => {
                            let quitting = matches!(cmd, SessionCommand::Quit);
                            let _ = cmd_tx.send(cmd);
                            if quitting {
                                break;
                            }
                        }
                        None => println!("Unknown command. Try: send <path> | save [dir] | peers | quit"),
                    }
                }
                // stdin closed: keep serving the room until the session ends.
                Ok(None) => {
                    while let Some(event) = event_rx.recv().await {
                        match event {
                            SessionEvent::Ended => break,
                            event => print_event(event),
                        }
                    }
                    break;
                }
                Err(_) => break,
            },
            result = &mut session => {
                if let Err(e) = result.map_err(anyhow::Error::from).and_then(|r| r) {
                    eprintln!("Session failed: {e}");
                }
                return Ok(());
            }
        }
    }

    // Drain the session task; it stops on the Quit command or channel drop.
    if let Ok(Err(e)) = session.await {
        eprintln!("Session failed: {e}");
    }
    Ok(())
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::Notice(text) => println!("{text}"),
        SessionEvent::Error(text) => eprintln!("error: {text}"),
        SessionEvent::MemberCount(count) => println!("{count} user(s) in the room"),
        SessionEvent::PeerConnected { id } => println!("peer connected: {id}"),
        SessionEvent::PeerLeft { id } => println!("peer left: {id}"),
        SessionEvent::Receiving { from } => println!("receiving a file from {from}..."),
        SessionEvent::FileReceived {
            file_name,
            file_size,
        } => {
            println!(
                "You received a file! {} ({:.2} MB). Type `save` to write it out",
                file_name,
                file_size as f64 / (1024.0 * 1024.0)
            );
        }
        SessionEvent::FileSaved { path } => println!("saved to {}", path.display()),
        SessionEvent::SendStarted { file_name, targets } => {
            println!("sending {file_name} to {targets} peer(s)...")
        }
        SessionEvent::SendFinished { file_name } => println!("done sharing {file_name}"),
        SessionEvent::Ended => {}
    }
}

fn parse_command(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "send" if !rest.is_empty() => Some(SessionCommand::SendFile(PathBuf::from(rest))),
        "save" => Some(SessionCommand::Save(
            (!rest.is_empty()).then(|| PathBuf::from(rest)),
        )),
        "peers" => Some(SessionCommand::Peers),
        "quit" | "exit" => Some(SessionCommand::Quit),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_and_without_arguments() {
        assert!(matches!(
            parse_command("send /tmp/report.pdf"),
            Some(SessionCommand::SendFile(p)) if p == PathBuf::from("/tmp/report.pdf")
        ));
        assert!(matches!(
            parse_command("  save  "),
            Some(SessionCommand::Save(None))
        ));
        assert!(matches!(
            parse_command("save /tmp/downloads"),
            Some(SessionCommand::Save(Some(p))) if p == PathBuf::from("/tmp/downloads")
        ));
        assert!(matches!(parse_command("peers"), Some(SessionCommand::Peers)));
        assert!(matches!(parse_command("quit"), Some(SessionCommand::Quit)));
        assert!(matches!(parse_command("exit"), Some(SessionCommand::Quit)));
    }

    #[test]
    fn bare_send_and_junk_are_rejected() {
        assert!(parse_command("send").is_none());
        assert!(parse_command("frobnicate").is_none());
        assert!(parse_command("").is_none());
    }
}
