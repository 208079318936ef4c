//! Output rendering for the chat application.
//!
//! The session never prints directly; it reports fragments and
//! notifications to a [`Renderer`], so a terminal, a test harness, or any
//! other surface can present them.

use std::io::{self, Stdout, Write};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for failure notifications).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a fragment of the assistant's answer.
    ///
    /// This is called incrementally as fragments arrive.
    fn print_text(&mut self, text: &str);

    /// Print a user-visible failure notification.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when an answer stream completes normally.
    fn finish_response(&mut self);

    /// Called when the user cancelled the exchange.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("\n{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("\nError: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
    }

    fn finish_response(&mut self) {
        println!();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        println!("\n[interrupted]");
        self.flush();
    }
}
