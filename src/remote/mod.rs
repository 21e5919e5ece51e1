//! Remote command router (spec.md §6, supplemented per SPEC_FULL.md §B):
//! a path/arg dispatch table modeled on the original's two-handler-map
//! design (app-level vs. per-layer commands), fed by a bounded queue
//! drained with a per-frame time budget.

pub mod osc;
pub mod stdin;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::layer::LayerId;

/// The per-frame budget spent draining queued commands before the
/// orchestrator must move on to layer update / render, per spec.md §5.
pub const DRAIN_BUDGET: Duration = Duration::from_millis(2);

const COMMAND_QUEUE_DEPTH: usize = 256;

/// Command paths are OSC-style: a leading slash and one or more
/// slash-separated segments of word characters.
static COMMAND_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(/[A-Za-z0-9_]+)+$").unwrap());

pub fn is_valid_command_path(path: &str) -> bool {
    COMMAND_PATH_PATTERN.is_match(path)
}

#[derive(Debug, Clone)]
pub struct Command {
    pub path: String,
    pub args: Vec<String>,
}

/// App-level command handler: mutates whatever global state the command
/// addresses (fps, offset, layer add/remove, quit).
pub type AppHandler = Box<dyn Fn(&[String]) + Send + Sync>;

/// Per-layer command handler: receives the resolved layer id plus args.
pub type LayerHandler = Box<dyn Fn(LayerId, &[String]) + Send + Sync>;

#[derive(Default)]
pub struct CommandRouter {
    app_commands: HashMap<&'static str, AppHandler>,
    layer_commands: HashMap<&'static str, LayerHandler>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_app_command(&mut self, path: &'static str, handler: AppHandler) {
        self.app_commands.insert(path, handler);
    }

    pub fn register_layer_command(&mut self, path: &'static str, handler: LayerHandler) {
        self.layer_commands.insert(path, handler);
    }

    /// Routes a command. Layer commands expect their first arg to be the
    /// target layer id; app commands take all args directly.
    pub fn route(&self, command: &Command) {
        if !is_valid_command_path(&command.path) {
            log::warn!("malformed command path: {}", command.path);
            return;
        }
        if let Some(handler) = self.app_commands.get(command.path.as_str()) {
            handler(&command.args);
            return;
        }
        if let Some(handler) = self.layer_commands.get(command.path.as_str()) {
            let Some((id_arg, rest)) = command.args.split_first() else {
                log::warn!("layer command {} missing layer id argument", command.path);
                return;
            };
            match id_arg.parse::<LayerId>() {
                Ok(id) => handler(id, rest),
                Err(_) => log::warn!("layer command {} has non-numeric layer id {}", command.path, id_arg),
            }
            return;
        }
        log::warn!("unrecognized remote command path: {}", command.path);
    }
}

/// Bounded producer/consumer queue between network/IO threads and the
/// single-threaded main loop.
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }

    /// Drains queued commands into `router`, stopping early once
    /// `DRAIN_BUDGET` elapses so a command storm can't starve rendering.
    /// Returns the number of commands processed and whether the budget
    /// was exhausted with commands still queued.
    pub fn drain(&self, router: &CommandRouter) -> (usize, bool) {
        let deadline = Instant::now() + DRAIN_BUDGET;
        let mut processed = 0;
        loop {
            if Instant::now() >= deadline {
                return (processed, !self.rx.is_empty());
            }
            match self.rx.try_recv() {
                Ok(command) => {
                    router.route(&command);
                    processed += 1;
                }
                Err(_) => return (processed, false),
            }
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn command_path_validation_rejects_malformed_paths() {
        assert!(is_valid_command_path("/layer/opacity"));
        assert!(is_valid_command_path("/quit"));
        assert!(!is_valid_command_path("no-leading-slash"));
        assert!(!is_valid_command_path("/bad//double-slash"));
        assert!(!is_valid_command_path(""));
    }

    #[test]
    fn app_command_dispatches_by_path() {
        let mut router = CommandRouter::new();
        let seen = Arc::new(AtomicI64::new(-1));
        let seen2 = seen.clone();
        router.register_app_command(
            "/fps",
            Box::new(move |args| {
                if let Some(v) = args.first().and_then(|s| s.parse::<i64>().ok()) {
                    seen2.store(v, Ordering::Relaxed);
                }
            }),
        );
        router.route(&Command {
            path: "/fps".into(),
            args: vec!["30".into()],
        });
        assert_eq!(seen.load(Ordering::Relaxed), 30);
    }

    #[test]
    fn layer_command_parses_leading_id_argument() {
        let mut router = CommandRouter::new();
        let seen = Arc::new(AtomicI64::new(-1));
        let seen2 = seen.clone();
        router.register_layer_command(
            "/layer/opacity",
            Box::new(move |id, _args| {
                seen2.store(id as i64, Ordering::Relaxed);
            }),
        );
        router.route(&Command {
            path: "/layer/opacity".into(),
            args: vec!["3".into(), "0.5".into()],
        });
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn queue_drain_processes_in_fifo_order() {
        let queue = CommandQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order2 = order.clone();
        let mut router = CommandRouter::new();
        router.register_app_command(
            "/mark",
            Box::new(move |args| {
                order2.lock().unwrap().push(args[0].clone());
            }),
        );
        for i in 0..5 {
            queue
                .sender()
                .send(Command {
                    path: "/mark".into(),
                    args: vec![i.to_string()],
                })
                .unwrap();
        }
        let (processed, _exhausted) = queue.drain(&router);
        assert_eq!(processed, 5);
        assert_eq!(*order.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }
}
