//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator yes/no confirmation that yields to shutdown."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use foam_common::ShutdownSignal;

use crate::{Result, SupervisorError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Asks the operator a yes/no question.
pub trait Confirm: Send {
    /// `true` when the operator agrees.
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Interactive prompt on stdin/stdout. An empty answer means "no".
///
/// Stdin is read on a helper thread so a triggered [`ShutdownSignal`]
/// abandons the question with [`SupervisorError::Interrupted`].
#[derive(Debug, Clone)]
pub struct StdinConfirm {
    shutdown: ShutdownSignal,
}

impl StdinConfirm {
    /// Prompt that gives up when `shutdown` fires.
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self { shutdown }
    }
}

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        let lines = spawn_line_reader(io::stdin())?;
        prompt_yes_no(question, false, &lines, &self.shutdown, &mut io::stdout())
    }
}

/// Answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// Lines of `input` on a channel; an empty line marks end of input.
fn spawn_line_reader<R>(input: R) -> io::Result<Receiver<io::Result<String>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("confirm-input".to_owned())
        .spawn(move || {
            let mut reader = BufReader::new(input);
            loop {
                let mut line = String::new();
                let read = reader.read_line(&mut line);
                let done = !matches!(read, Ok(n) if n > 0);
                if tx.send(read.map(|_| line)).is_err() || done {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn next_line(lines: &Receiver<io::Result<String>>, shutdown: &ShutdownSignal) -> Result<String> {
    loop {
        if shutdown.is_triggered() {
            return Err(SupervisorError::Interrupted);
        }
        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => return Ok(line?),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(String::new()),
        }
    }
}

fn prompt_yes_no(
    question: &str,
    default: bool,
    lines: &Receiver<io::Result<String>>,
    shutdown: &ShutdownSignal,
    output: &mut impl Write,
) -> Result<bool> {
    loop {
        let suffix = if default { "[Y/n]" } else { "[y/N]" };
        write!(output, "{question} {suffix}: ")?;
        output.flush()?;

        let answer = next_line(lines, shutdown)?;
        if answer.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input stream closed").into());
        }
        let trimmed = answer.trim();
        if trimmed.is_empty() {
            return Ok(default);
        }
        match trimmed.to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "Please enter 'y' or 'n'.")?,
        }
    }
}
