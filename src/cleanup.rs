//! Post-processing of decoded model output.
//!
//! Small seq2seq models tend to stutter ("happy, happy, happy to help") and
//! echo the quoting of their training data. Everything here is pure string
//! work so it can run outside the model lock.

/// Longest phrase, in words, that is checked for immediate repetition.
pub const MAX_PHRASE_WORDS: usize = 3;

const QUOTES: &[char] = &['"', '\u{201C}', '\u{201D}'];

#[derive(Debug)]
struct Word<'a> {
    text: &'a str,
    /// Non-word characters between this word and the next
    separator: &'a str,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A repetition is joined by a single space, optionally after a comma.
fn is_joiner(separator: &str) -> bool {
    separator == " " || separator == ", "
}

fn split_words(text: &str) -> (&str, Vec<Word<'_>>) {
    let prefix_end = text.find(is_word_char).unwrap_or(text.len());
    let mut words = Vec::new();
    let mut rest = &text[prefix_end..];
    while !rest.is_empty() {
        let word_end = rest.find(|c| !is_word_char(c)).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_end);
        let separator_end = tail.find(is_word_char).unwrap_or(tail.len());
        let (separator, tail) = tail.split_at(separator_end);
        words.push(Word {
            text: word,
            separator,
        });
        rest = tail;
    }
    (&text[..prefix_end], words)
}

fn same_word(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Whether the `len` words at `next` repeat the `len` words at `start`.
fn repeats(words: &[Word], start: usize, next: usize, len: usize) -> bool {
    if next + len > words.len() || !is_joiner(words[next - 1].separator) {
        return false;
    }
    (0..len).all(|k| same_word(words[start + k].text, words[next + k].text))
        && (0..len - 1).all(|k| {
            is_joiner(words[start + k].separator)
                && words[start + k].separator == words[next + k].separator
        })
}

/// Finds the shortest phrase starting at `start` that is immediately
/// repeated, returning its length and the index after the last repetition.
fn repeated_run(words: &[Word], start: usize) -> Option<(usize, usize)> {
    for len in 1..=MAX_PHRASE_WORDS {
        let mut end = start + len;
        if end > words.len() {
            break;
        }
        while repeats(words, start, end, len) {
            end += len;
        }
        if end > start + len {
            return Some((len, end));
        }
    }
    None
}

fn collapse_pass(text: &str) -> Option<String> {
    let (prefix, words) = split_words(text);
    let mut out = String::with_capacity(text.len());
    out.push_str(prefix);

    let mut changed = false;
    let mut index = 0;
    while index < words.len() {
        match repeated_run(&words, index) {
            Some((len, end)) => {
                for word in &words[index..index + len - 1] {
                    out.push_str(word.text);
                    out.push_str(word.separator);
                }
                out.push_str(words[index + len - 1].text);
                out.push_str(words[end - 1].separator);
                index = end;
                changed = true;
            }
            None => {
                out.push_str(words[index].text);
                out.push_str(words[index].separator);
                index += 1;
            }
        }
    }

    changed.then_some(out)
}

/// Collapses a word or short phrase repeated back to back into its first
/// occurrence. Matching ignores case, the first occurrence keeps its casing.
///
/// Runs until nothing changes, so applying it twice is the same as once.
pub fn collapse_repeated_phrases(text: &str) -> String {
    let mut current = text.to_string();
    while let Some(next) = collapse_pass(&current) {
        current = next;
    }
    current
}

/// Turns decoded model output into the text sent back to the caller.
///
/// Unlike [`collapse_repeated_phrases`] this is not idempotent: backslashes
/// are removed after the collapse, so `happy\ happy` comes out as
/// `happy happy` and only collapses on a second pass.
pub fn clean_response(decoded: &str) -> String {
    let text: String = decoded
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    let text = collapse_repeated_phrases(&text).replace('\\', "");

    let mut trimmed = text.trim();
    loop {
        let stripped = trimmed.trim_matches(QUOTES).trim();
        if stripped.len() == trimmed.len() {
            break;
        }
        trimmed = stripped;
    }
    trimmed.to_string()
}
