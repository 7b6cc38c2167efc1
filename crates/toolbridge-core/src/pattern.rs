//! Minimal `*` wildcard matching for tool and environment patterns.

/// Match `text` against `pattern`, where `*` matches any run of characters
/// (including none). All other characters match literally.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let Some((first, rest)) = pattern.split_once('*') else {
        return pattern == text;
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };

    let mut pieces: Vec<&str> = rest.split('*').collect();
    let last = pieces.pop().unwrap_or_default();
    for piece in pieces {
        if piece.is_empty() {
            continue;
        }
        match remaining.find(piece) {
            Some(idx) => remaining = &remaining[idx + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
