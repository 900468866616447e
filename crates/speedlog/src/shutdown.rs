//! Console stop listener.
//!
//! A dedicated thread blocks on line input for its whole lifetime. The stop
//! word cancels the shared [`CancellationToken`] and ends the thread; anything
//! else is reported back as invalid and the thread keeps waiting. Running on
//! an OS thread rather than a runtime task means a pending console read never
//! keeps the runtime alive once the loop has terminated.

use std::io::{self, BufRead, Write};
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Input that requests termination (case-insensitive).
pub const STOP_WORD: &str = "x";

/// Printed once when the listener starts.
pub const STOP_PROMPT: &str = "Press X to terminate application...";

/// What a line of console input means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    Invalid,
}

/// Classify one line of input. Surrounding whitespace is ignored.
pub fn classify(line: &str) -> Command {
    if line.trim().eq_ignore_ascii_case(STOP_WORD) {
        Command::Stop
    } else {
        Command::Invalid
    }
}

/// Why the listener thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The stop word was read and the token cancelled.
    StopRequested,
    /// Input reached end of file. The token is left untouched.
    InputClosed,
    /// Reading input failed. The token is left untouched.
    ReadFailed,
}

/// Handle to the listener thread.
#[derive(Debug)]
pub struct StopListener {
    handle: JoinHandle<ListenerExit>,
}

impl StopListener {
    /// Spawn a listener reading `input` and reporting to `output`.
    pub fn spawn<R, W>(input: R, output: W, token: CancellationToken) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("stop-listener".to_string())
            .spawn(move || listen(input, output, &token))?;
        Ok(Self { handle })
    }

    /// Listener on the process's stdin and stdout.
    pub fn on_stdin(token: CancellationToken) -> io::Result<Self> {
        Self::spawn(io::BufReader::new(io::stdin()), io::stdout(), token)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to end. Blocks while it is still reading.
    pub fn join(self) -> Option<ListenerExit> {
        self.handle.join().ok()
    }
}

fn listen<R: BufRead, W: Write>(input: R, mut output: W, token: &CancellationToken) -> ListenerExit {
    // Console output is best effort; the listener works without it.
    let _ = writeln!(output, "{STOP_PROMPT}");
    let _ = output.flush();

    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Stop listener failed to read input");
                return ListenerExit::ReadFailed;
            }
        };

        match classify(&line) {
            Command::Stop => {
                info!("Stop requested from console");
                token.cancel();
                return ListenerExit::StopRequested;
            }
            Command::Invalid => {
                let _ = writeln!(output, "Invalid input: {:?}. {STOP_PROMPT}", line.trim());
                let _ = output.flush();
            }
        }
    }

    debug!("Stop listener input closed");
    ListenerExit::InputClosed
}
