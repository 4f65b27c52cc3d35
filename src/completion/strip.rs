//! Removal of reasoning envelopes from completion output.
//!
//! Reasoning-capable models wrap their chain of thought in
//! `<think>…</think>` blocks (or emit a bare self-closing `<think/>`). Those
//! blocks must never reach the chat; this module strips them before a reply
//! is sent.
//!
//! Matching rules:
//! - the tag name is matched case-insensitively
//! - `<think/>` and `<think />` are recognized as self-closing
//! - an opening `<think>` without a matching close strips to the end
//! - anything else that merely starts with `<think` (`<thinking>`,
//!   `<thinks>`) is left untouched
//!
//! Leading and trailing ASCII whitespace is trimmed from the result. An
//! empty result is the caller's cue to substitute a fallback reply.

const OPEN: &[u8] = b"<think";
const CLOSE: &[u8] = b"</think>";

/// Strips every reasoning block from `text` and trims the result.
pub fn strip_think_blocks(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<'
            && bytes.len() - i >= OPEN.len() + 1
            && bytes[i..i + OPEN.len()].eq_ignore_ascii_case(OPEN)
        {
            let after = i + OPEN.len();

            // Self-closing: <think/> or <think />
            if bytes[after] == b'/' && bytes.get(after + 1) == Some(&b'>') {
                i = after + 2;
                continue;
            }
            if bytes[after] == b' '
                && bytes.get(after + 1) == Some(&b'/')
                && bytes.get(after + 2) == Some(&b'>')
            {
                i = after + 3;
                continue;
            }

            // Opening tag: skip to past the matching close, or to the end
            // when the model never closed it.
            if bytes[after] == b'>' {
                i = match find_ci(bytes, CLOSE, after + 1) {
                    Some(close) => close + CLOSE.len(),
                    None => bytes.len(),
                };
                continue;
            }
            // Some other tag that merely starts with "<think": fall through
            // and copy it verbatim.
        }
        out.push(bytes[i]);
        i += 1;
    }

    // Stripped regions are delimited by ASCII bytes, so the remainder is
    // still well-formed UTF-8.
    let stripped = String::from_utf8(out).expect("removed regions are ASCII-delimited");
    stripped.trim_matches([' ', '\t', '\n', '\r']).to_string()
}

/// Case-insensitive byte search starting at `from`.
fn find_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
