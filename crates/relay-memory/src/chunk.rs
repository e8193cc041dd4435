//! Document chunking for the knowledge index.
//!
//! Paragraphs (blank-line separated) are packed greedily into chunks of at
//! most `max_chars` characters. A paragraph that is longer than the budget on
//! its own is split on whitespace, and a single word longer than the budget is
//! hard-split on character boundaries.

/// Split `text` into retrieval chunks of at most `max_chars` characters each.
///
/// Returns an empty vec for blank input. `max_chars == 0` is treated as 1.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in paragraphs(text) {
        for piece in split_long(&paragraph, max_chars) {
            let piece_len = piece.chars().count();
            // Paragraphs are joined with a blank line (2 chars).
            let cost = if current.is_empty() {
                piece_len
            } else {
                piece_len + 2
            };
            if !current.is_empty() && current_len + cost > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Blank-line separated paragraphs with inner whitespace runs collapsed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !buf.is_empty() {
                out.push(buf.join(" "));
                buf.clear();
            }
        } else {
            buf.push(line);
        }
    }
    if !buf.is_empty() {
        out.push(buf.join(" "));
    }
    out.into_iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Break one paragraph into pieces that each fit in `max_chars`.
fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in paragraph.split(' ') {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for slice in chars.chunks(max_chars) {
                pieces.push(slice.iter().collect());
            }
            continue;
        }
        let cost = if current.is_empty() {
            word_len
        } else {
            word_len + 1
        };
        if !current.is_empty() && current_len + cost > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
