//! Assistant reply parsing.
//!
//! The assistant is prompted to separate independently-sent chat bubbles
//! with `||`. Whitespace around the delimiter is ignored and empty
//! segments are dropped.

pub const REPLY_DELIMITER: &str = "||";

pub fn split_reply(text: &str) -> Vec<String> {
    text.split(REPLY_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
