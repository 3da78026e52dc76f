//! Transcript and reply text handling.
//!
//! Pure string functions: transcript normalization, invocation stripping,
//! sentence splitting for synthesis, and reply cleanup. Diagnostic output
//! goes to stderr via `tracing`; the user-facing `ASR:` / `EDNA:` lines go
//! to stdout with ANSI colors.

/// Sentinel the recognizer emits for silence; indistinguishable from empty.
pub const BLANK_AUDIO: &str = "[BLANK_AUDIO]";

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_ASR: &str = "\x1b[1;32m"; // bright green
const COLOR_EDNA: &str = "\x1b[1;35m"; // bright magenta

/// Leading phrases that mark an utterance as addressed to the assistant.
/// Includes common recognizer mishears of the wake name.
const INVOCATION_PREFIXES: &[&str] = &[
    "hey edna",
    "okay edna",
    "ok edna",
    "edna",
    "etna",
    "ewa",
    "ed",
    "ed nah",
    "ed na",
];

/// Role-delimiter markers; the reply is cut at the first occurrence of any.
const REPLY_STOP_MARKERS: &[&str] = &[
    "<|endoftext|>",
    "<|im_end|>",
    "\nHuman:",
    "\nUSER:",
    "\nUser:",
    "\n### Human:",
    "\n### Instruction:",
];

/// Replies longer than this with no sentence punctuation are soft-wrapped
/// so a single synthesis request stays short.
const SOFT_WRAP_CHARS: usize = 180;

/// Lowercase, replace non-alphanumerics with spaces, collapse whitespace
/// runs, trim. Idempotent.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_space = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            prev_space = false;
        } else if !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Strip the longest matching invocation prefix from a transcript.
///
/// Returns the normalized remainder (possibly empty) when a prefix
/// matched, `None` when the utterance was not addressed to the assistant.
/// The original capitalization is discarded.
pub fn strip_invocation(text: &str) -> Option<String> {
    let normalized = normalize(text);

    let best = INVOCATION_PREFIXES
        .iter()
        .filter(|p| normalized.starts_with(*p))
        .max_by_key(|p| p.len())?;

    Some(normalized[best.len()..].trim_start().to_string())
}

/// Split a reply into sentence fragments for chunked synthesis.
///
/// A fragment ends at `.`, `!` or `?` followed by whitespace or the end of
/// input. Fragments are trimmed; empties dropped. A single long fragment
/// with no punctuation is soft-wrapped at whitespace.
pub fn split_sentences(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        cur.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = match chars.peek() {
                None => true,
                Some(next) => next.is_whitespace(),
            };
            if boundary {
                let s = cur.trim();
                if !s.is_empty() {
                    out.push(s.to_string());
                }
                cur.clear();
            }
        }
    }
    let tail = cur.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }

    if out.len() == 1 && out[0].chars().count() > SOFT_WRAP_CHARS {
        let whole = out.pop().unwrap_or_default();
        out = soft_wrap(&whole, SOFT_WRAP_CHARS);
    }

    out
}

/// Wrap at whitespace at or before every `width`-th character.
fn soft_wrap(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let take = width.min(chars.len() - pos);
        let mut cut = pos + take;
        if cut < chars.len() {
            // Back up to the last whitespace inside the window, if any.
            if let Some(ws) = chars[pos..cut].iter().rposition(|c| c.is_whitespace()) {
                if ws > 0 {
                    cut = pos + ws;
                }
            }
        }
        let piece: String = chars[pos..cut].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        pos = cut;
        while pos < chars.len() && chars[pos].is_whitespace() {
            pos += 1;
        }
    }

    out
}

/// Cut the reply at the first role-delimiter marker and trim.
pub fn strip_reply_markers(reply: &str) -> String {
    let cut = REPLY_STOP_MARKERS
        .iter()
        .filter_map(|m| reply.find(m))
        .min()
        .unwrap_or(reply.len());
    reply[..cut].trim().to_string()
}

/// Print a recognized transcript to stdout (bright green).
pub fn print_transcript(text: &str) {
    println!("{COLOR_ASR}ASR: {text}{COLOR_RESET}");
}

/// Print the assistant's reply to stdout (bright magenta).
pub fn print_reply(text: &str) {
    println!("{COLOR_EDNA}EDNA: {text}{COLOR_RESET}");
}
