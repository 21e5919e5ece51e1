//! stdin text command transport, for local debugging and scripted
//! control without an OSC client: one `/path arg1 arg2` per line.

use std::io::BufRead;

use crossbeam_channel::Sender;

use super::Command;

fn parse_line(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let path = parts.next()?.to_string();
    let args = parts.map(str::to_string).collect();
    Some(Command { path, args })
}

/// Spawns a background thread reading lines from stdin, sending parsed
/// commands to `tx`. Matches the live-input thread-per-source model: one
/// dedicated thread, no shared state beyond the channel.
pub fn spawn_stdin_reader(tx: Sender<Command>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => log::warn!("could not parse stdin command: {line}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_and_args() {
        let cmd = parse_line("/layer/opacity 3 0.5").unwrap();
        assert_eq!(cmd.path, "/layer/opacity");
        assert_eq!(cmd.args, vec!["3", "0.5"]);
    }

    #[test]
    fn rejects_empty_line() {
        assert!(parse_line("").is_none());
    }

    #[test]
    fn path_with_no_args_is_valid() {
        let cmd = parse_line("/quit").unwrap();
        assert!(cmd.args.is_empty());
    }
}
