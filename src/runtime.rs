use std::io::BufRead;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// What the user asked for at the session prompt.
/// Exercise and set are 1-based positions as shown by `status`.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    Reps { exercise: usize, set: usize, reps: i32 },
    Weight { exercise: usize, set: usize, weight: Option<f64> },
    Toggle { exercise: usize, set: usize },
    Retry { exercise: usize, set: usize },
    Status,
    Finish,
    Abort,
}

pub const COMMAND_HELP: &str = "commands: r <ex> <set> <reps> | w <ex> <set> <kg|-> | c <ex> <set> | retry <ex> <set> | status | finish | abort";

fn position(raw: Option<&str>, what: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("missing {what}"))?;
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("{what} must be a positive number, got '{raw}'")),
    }
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err(COMMAND_HELP.to_string());
        };

        let cmd = match verb {
            "status" | "s" => SessionCommand::Status,
            "finish" | "done" => SessionCommand::Finish,
            "abort" | "quit" | "q" => SessionCommand::Abort,
            "r" | "reps" => {
                let exercise = position(parts.next(), "exercise")?;
                let set = position(parts.next(), "set")?;
                let raw = parts.next().unwrap_or("");
                // an empty field counts as zero reps
                let reps = if raw.is_empty() {
                    0
                } else {
                    raw.parse::<i32>()
                        .map_err(|_| format!("reps must be a whole number, got '{raw}'"))?
                };
                SessionCommand::Reps {
                    exercise,
                    set,
                    reps,
                }
            }
            "w" | "weight" => {
                let exercise = position(parts.next(), "exercise")?;
                let set = position(parts.next(), "set")?;
                let weight = match parts.next() {
                    None | Some("-") => None,
                    Some(raw) => Some(
                        raw.parse::<f64>()
                            .map_err(|_| format!("weight must be a number, got '{raw}'"))?,
                    ),
                };
                SessionCommand::Weight {
                    exercise,
                    set,
                    weight,
                }
            }
            "c" | "check" => SessionCommand::Toggle {
                exercise: position(parts.next(), "exercise")?,
                set: position(parts.next(), "set")?,
            },
            "retry" => SessionCommand::Retry {
                exercise: position(parts.next(), "exercise")?,
                set: position(parts.next(), "set")?,
            },
            other => return Err(format!("unknown command '{other}'; {COMMAND_HELP}")),
        };
        Ok(cmd)
    }
}

/// Unified event type consumed by the session runner
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Command(SessionCommand),
    Invalid(String),
    /// Input ended (EOF)
    Closed,
    Tick,
}

impl SessionEvent {
    pub fn from_line(line: &str) -> Option<Self> {
        if line.trim().is_empty() {
            return None;
        }
        Some(match line.parse::<SessionCommand>() {
            Ok(cmd) => SessionEvent::Command(cmd),
            Err(msg) => SessionEvent::Invalid(msg),
        })
    }
}

/// Source of session input events
pub trait SessionEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError>;
}

/// Production event source reading one command per line
pub struct LineEventSource {
    rx: Receiver<SessionEvent>,
}

impl LineEventSource {
    pub fn spawn<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if let Some(ev) = SessionEvent::from_line(&line) {
                    if tx.send(ev).is_err() {
                        return;
                    }
                }
            }
            let _ = tx.send(SessionEvent::Closed);
        });

        Self { rx }
    }

    pub fn stdin() -> Self {
        Self::spawn(std::io::BufReader::new(std::io::stdin()))
    }
}

impl SessionEventSource for LineEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<SessionEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<SessionEvent>) -> Self {
        Self { rx }
    }
}

impl SessionEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the session one event/tick at a time
pub struct Runner<E: SessionEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
}

impl<E: SessionEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    /// Blocks up to tick interval and returns the next event, or Tick on timeout
    pub fn step(&self) -> SessionEvent {
        match self.event_source.recv_timeout(self.ticker.interval()) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) => SessionEvent::Tick,
            Err(RecvTimeoutError::Disconnected) => SessionEvent::Closed,
        }
    }
}
