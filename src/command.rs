//! What we type into the REPL.
//!
//! The device drops characters when it receives several lines quickly,
//! since there is no flow control telling us its input buffer is full.
//! A single line is only evaluated once its `\r` arrives, so everything is sent as one line:
//! the program becomes a single quoted Python string literal.

use crate::config::{DeviceConfig, Signals};

/// Interrupts whatever runs, and makes the REPL show a fresh prompt.
pub const INTERRUPT: u8 = 0x03;

/// How many lines [`encode_program`] puts in front of the user's code.
pub const LINES_BEFORE_CODE: usize = 1;

/// Asks the REPL for tab completion.
pub const TAB: char = '\t';

/// Turns `code` into the body of a single quoted Python string literal,
/// wrapped by prints of the start and done markers.
///
/// Backslashes and quotes are escaped, line breaks (`\n` or `\r\n`) become a literal `\r\n`.
/// Tabs and stray carriage returns are escaped too, as the REPL would act on them.
pub fn encode_program(code: &str, signals: &Signals) -> String {
    let program = format!(
        "print('{}')\r\n{code}\r\nprint('{}')",
        signals.execution_start, signals.execution_done
    );

    let mut encoded = String::with_capacity(program.len() + program.len() / 8);
    let mut chars = program.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => encoded.push_str(r"\\"),
            '\'' => encoded.push_str(r"\'"),
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                encoded.push_str(r"\r\n");
            }
            '\n' => encoded.push_str(r"\r\n"),
            '\r' => encoded.push_str(r"\r"),
            '\t' => encoded.push_str(r"\t"),
            c => encoded.push(c),
        }
    }

    encoded
}

/// The inverse of [`encode_program`]'s escaping, i.e. what the device's Python parser makes of it.
///
/// Returns `None` if the literal is malformed.
pub fn decode_literal(literal: &str) -> Option<String> {
    let mut decoded = String::with_capacity(literal.len());
    let mut chars = literal.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }

        match chars.next()? {
            '\\' => decoded.push('\\'),
            '\'' => decoded.push('\''),
            '"' => decoded.push('"'),
            'r' => decoded.push('\r'),
            'n' => decoded.push('\n'),
            't' => decoded.push('\t'),
            _ => return None,
        }
    }

    Some(decoded)
}

/// Persist the program as the entry point, then reset so it runs.
pub fn flash(code: &str, signals: &Signals, device: &DeviceConfig) -> String {
    format!(
        "file=open('{}','w');s='{}';file.write(s);file.close();{}\r",
        device.entry_point,
        encode_program(code, signals),
        device.reset_statement
    )
}

/// Run the program in the live interpreter, keeping whatever state it has.
pub fn execute(code: &str, signals: &Signals) -> String {
    format!("s='{}';exec(s)\r", encode_program(code, signals))
}

/// Reset, running whatever entry point is present.
pub fn reboot(device: &DeviceConfig) -> String {
    format!("{}\r", device.reset_statement)
}

/// Type `prefix`, request completion, then type the end marker.
pub fn completion(prefix: &str, signals: &Signals) -> String {
    format!("{prefix}{TAB}{}", signals.completion_end)
}

/// How a command typed into the REPL runs code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    /// Written to the entry point file, followed by a reset.
    Flash,

    /// Run with `exec`.
    Execute,
}

/// Pull the program back out of a line built by [`flash`] or [`execute`].
///
/// The result is the full program, including the marker prints.
pub fn decode_injected(line: &str) -> Option<(Injection, String)> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    let (injection, rest) = if let Some(rest) = line.strip_prefix("s='") {
        (Injection::Execute, rest)
    } else {
        let start = line.find(";s='")?;
        (Injection::Flash, &line[start + ";s='".len()..])
    };

    // The literal ends at the first quote not escaped by a backslash.
    let mut escaped = false;
    let end = rest.char_indices().find_map(|(index, c)| match c {
        _ if escaped => {
            escaped = false;
            None
        }
        '\\' => {
            escaped = true;
            None
        }
        '\'' => Some(index),
        _ => None,
    })?;

    Some((injection, decode_literal(&rest[..end])?))
}

/// Make sense of what the REPL echoed after a completion request.
///
/// - The prefix echoed unchanged: no completions.
/// - A single line differing from the prefix: the one unambiguous completion.
/// - Several lines: the candidates are listed between the first and last line.
pub fn parse_completions(prefix: &str, echoed: &str) -> Vec<String> {
    let lines = echoed.split('\n').collect::<Vec<_>>();

    if let [line] = lines.as_slice() {
        let line = line.trim_end_matches('\r');

        return if line == prefix {
            vec![]
        } else {
            vec![line.to_owned()]
        };
    }

    lines[1..lines.len() - 1]
        .iter()
        .flat_map(|line| line.split_whitespace())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_escapes() {
        let signals = Signals::default();

        let encoded = encode_program("print('a\\tb')\nx = 1", &signals);

        assert_eq!(
            encoded,
            r"print(\'Execution Start: 0x3f3f3f3f\')\r\nprint(\'a\\tb\')\r\nx = 1\r\nprint(\'Execute Done: 0x3f3f3f3f\')"
        );
    }

    #[test]
    fn encode_normalizes_line_endings() {
        let signals = Signals::default();

        assert_eq!(
            encode_program("a\r\nb\nc", &signals),
            encode_program("a\nb\nc", &signals)
        );
    }

    #[test]
    fn flash_line() {
        let line = flash("print(1)", &Signals::default(), &DeviceConfig::default());

        assert_eq!(
            line,
            r"file=open('main.py','w');s='print(\'Execution Start: 0x3f3f3f3f\')\r\nprint(1)\r\nprint(\'Execute Done: 0x3f3f3f3f\')';file.write(s);file.close();from microbit import *;reset()"
                .to_owned()
                + "\r"
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn execute_line() {
        let line = execute("x", &Signals::default());

        assert!(line.starts_with("s='print("));
        assert!(line.ends_with("';exec(s)\r"));
    }

    #[test]
    fn decode_injected_both_kinds() {
        let signals = Signals::default();
        let device = DeviceConfig::default();
        let code = "for i in range(3):\n    print('it\\'s', i)";

        let (injection, program) = decode_injected(&flash(code, &signals, &device)).unwrap();
        assert_eq!(injection, Injection::Flash);
        assert!(program.contains("for i in range(3):\r\n    print('it\\'s', i)"));

        let (injection, _) = decode_injected(&execute(code, &signals)).unwrap();
        assert_eq!(injection, Injection::Execute);

        assert_eq!(decode_injected(&reboot(&device)), None);
    }

    #[test]
    fn completions_none() {
        assert_eq!(parse_completions("xyz", "xyz"), Vec::<String>::new());
    }

    #[test]
    fn completions_unambiguous() {
        assert_eq!(parse_completions("pri", "print("), vec!["print(".to_string()]);
    }

    #[test]
    fn completions_listing() {
        let echoed = "a\r\nabs             all             any\r\nascii\r\n>>> a";

        assert_eq!(parse_completions("a", echoed), vec!["abs", "all", "any", "ascii"]);
    }

    proptest! {
        #[test]
        fn decoding_inverts_encoding(code in "[ -~\t\n]*") {
            let signals = Signals::default();

            let expected = format!(
                "print('{}')\r\n{}\r\nprint('{}')",
                signals.execution_start,
                code.replace('\n', "\r\n"),
                signals.execution_done
            );

            let encoded = encode_program(&code, &signals);
            prop_assert!(!encoded.contains('\n'));
            prop_assert_eq!(decode_literal(&encoded), Some(expected));
        }
    }
}
