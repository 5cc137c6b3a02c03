use std::io::{BufReader, Read};
use std::sync::LazyLock;
use std::sync::mpsc;

use regex::Regex;

const MAX_LOG_CHARS: usize = 4096;

// CSI, OSC (BEL or ST terminated) and the other ST-terminated strings, then
// any lone two-byte escape.
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[PX^_][^\x1b]*\x1b\\|\x1b.?",
    )
    .expect("escape sequence regex")
});

/// Make a subprocess output line safe to log: escape sequences and control
/// characters are removed, tabs become spaces, long lines are cut.
pub fn sanitize_line(input: &str) -> String {
    let stripped = ESCAPES.replace_all(input, "");
    let mut out = String::with_capacity(stripped.len().min(MAX_LOG_CHARS));
    let mut count = 0usize;
    for c in stripped.chars() {
        let c = match c {
            '\t' => ' ',
            c if c.is_control() || is_bidi_control(c) => continue,
            c => c,
        };
        if count == MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        out.push(c);
        count += 1;
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// Split a byte stream on `\n`/`\r` and forward non-empty lines. Progress
/// bars that redraw with `\r` arrive as separate lines.
pub fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(pending.as_slice()).into_owned());
            pending.clear();
        }
    };

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                flush(&mut pending);
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES {
                    flush(&mut pending);
                }
            }
        }
    }
    flush(&mut pending);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_title_sequences() {
        let input = "ok \u{1b}[31mred\u{1b}[0m \u{1b}]0;title\u{7} done";
        assert_eq!(sanitize_line(input), "ok red  done");
    }

    #[test]
    fn strips_controls_and_expands_tabs() {
        assert_eq!(sanitize_line("a\tb\u{8}c\u{202e}d"), "a bcd");
    }

    #[test]
    fn caps_long_lines() {
        let long = "x".repeat(MAX_LOG_CHARS + 10);
        let out = sanitize_line(&long);
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.chars().filter(|&c| c == 'x').count(), MAX_LOG_CHARS);
    }

    #[test]
    fn splits_on_carriage_returns() {
        let (tx, rx) = mpsc::channel();
        read_output_stream(&b"10%\r50%\r100%\ndone"[..], tx);
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, ["10%", "50%", "100%", "done"]);
    }
}
