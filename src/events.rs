use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Whether the device is running something on our behalf.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum State {
    /// Nothing is running.
    ///
    /// Allowed: flash, execute, reboot, completions.
    ///
    /// Not allowed: interrupt.
    Free,

    /// Code is running.
    ///
    /// Allowed: interrupt.
    ///
    /// Not allowed: flash, execute, reboot, completions.
    Busy,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Free => write!(f, "free"),
            State::Busy => write!(f, "busy"),
        }
    }
}

/// A runtime error reported by the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    /// The line in the user's code, counting from zero.
    ///
    /// `None` if the traceback did not carry a readable line number,
    /// or it points at code we put around the user's code.
    pub line: Option<usize>,

    /// The exception's type name, e.g. `NameError`.
    /// See <https://docs.micropython.org/en/latest/library/builtins.html#exceptions>.
    pub exception_type: String,

    /// A short explanation. May be empty.
    pub message: String,
}

impl ErrorMessage {
    /// Caused by an interrupt, which is expected after [`crate::session::Session::interrupt`].
    pub fn is_keyboard_interrupt(&self) -> bool {
        self.exception_type == "KeyboardInterrupt"
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }

        if self.message.is_empty() {
            write!(f, "{}", self.exception_type)
        } else {
            write!(f, "{}: {}", self.exception_type, self.message)
        }
    }
}

/// Data we receive while the device runs code for us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum OutputEvent {
    /// The most recent program output.
    ///
    /// This is a snapshot of the output retained so far, not the difference to the previous one,
    /// and does not correspond to single `print`s on the device.
    /// See [`Transcript`] for turning these into continuous output.
    NormalOutput {
        /// The text.
        chunk: String,

        /// Byte offset right past `chunk` within all output of the command.
        end: usize,
    },

    /// The program failed.
    ErrorMessage(ErrorMessage),

    /// The reset button was pressed on the device.
    /// The program starts over and output continues.
    ResetPressed,
}

impl OutputEvent {
    pub(crate) fn output<S: Into<String>>(chunk: S, end: usize) -> Self {
        Self::NormalOutput {
            chunk: chunk.into(),
            end,
        }
    }

    /// Borrow the error message, if this is one.
    pub fn as_error_message(&self) -> Option<&ErrorMessage> {
        if let Self::ErrorMessage(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Borrow the output chunk, if this is normal output.
    pub fn as_output(&self) -> Option<&str> {
        self.as_snapshot().map(|(chunk, _)| chunk)
    }

    /// Borrow the output chunk along with its end offset, if this is normal output.
    pub fn as_snapshot(&self) -> Option<(&str, usize)> {
        if let Self::NormalOutput { chunk, end } = self {
            Some((chunk, *end))
        } else {
            None
        }
    }
}

/// Stitches [`OutputEvent::NormalOutput`] snapshots together into continuous output.
///
/// Snapshots of a command overlap, and the offsets they carry say by how much.
/// Only the part not seen before is returned.
/// Output dropped before any snapshot carried it is skipped.
#[derive(Debug, Default)]
pub struct Transcript {
    shown: usize,
}

impl Transcript {
    /// Start a new transcript, for the output of one command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next snapshot and its end offset, get back what is new in it.
    pub fn push<'s>(&mut self, snapshot: &'s str, end: usize) -> &'s str {
        if end <= self.shown {
            return "";
        }

        let start = end.saturating_sub(snapshot.len());
        let fresh = snapshot
            .get(self.shown.saturating_sub(start)..)
            .unwrap_or(snapshot);

        self.shown = end;

        fresh
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn transcript_growing_snapshots() {
        let mut t = Transcript::new();

        assert_eq!(t.push("1\r\n", 3), "1\r\n");
        assert_eq!(t.push("1\r\n2\r\n", 6), "2\r\n");
        assert_eq!(t.push("1\r\n2\r\n", 6), "");
        assert_eq!(t.push("1\r\n2\r\n3", 7), "3");
    }

    #[test]
    fn transcript_repeated_output() {
        let mut t = Transcript::new();

        // Identical text, different places in the output.
        assert_eq!(t.push("spam\r\nspam\r\n", 12), "spam\r\nspam\r\n");
        assert_eq!(t.push("spam\r\nspam\r\n", 18), "spam\r\n");
        assert_eq!(t.push("spam\r\nspam\r\n", 30), "spam\r\nspam\r\n");
        assert_eq!(t.push("spam\r\n", 30), "");
    }

    #[test]
    fn transcript_gap_in_output() {
        let mut t = Transcript::new();

        assert_eq!(t.push("abc", 3), "abc");
        // "def" was dropped before it could be shown.
        assert_eq!(t.push("ghi", 9), "ghi");
    }

    #[test]
    fn error_message_display() {
        let e = ErrorMessage {
            line: Some(0),
            exception_type: "NameError".into(),
            message: "name 'prit' isn't defined".into(),
        };
        assert_eq!(e.to_string(), "line 0: NameError: name 'prit' isn't defined");

        let e = ErrorMessage {
            line: None,
            exception_type: "KeyboardInterrupt".into(),
            message: String::new(),
        };
        assert!(e.is_keyboard_interrupt());
        assert_eq!(e.to_string(), "KeyboardInterrupt");
    }

    #[test]
    fn events_serialize_with_kind() {
        let json = serde_json::to_string(&OutputEvent::ResetPressed).unwrap();
        assert_eq!(json, r#"{"kind":"ResetPressed"}"#);

        let json = serde_json::to_string(&OutputEvent::output("2\r\n", 3)).unwrap();
        assert_eq!(json, r#"{"kind":"NormalOutput","chunk":"2\r\n","end":3}"#);
    }
}
