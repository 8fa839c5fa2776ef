// Confusable-pattern synthesis.
//
// Turns a blocked word into a regex source that also catches leet digits,
// look-alike Cyrillic letters and single separators between letters, while
// refusing to match inside a longer alphanumeric token.

use regex::{Regex, RegexBuilder};

// The separator classes have no case. Keeping them out of `(?i)` avoids
// case-folding the whole negated Unicode class, which dominates compile time.

/// Optional single non-letter, non-digit character between two letters.
const NOISE: &str = r"(?-i:[^\p{L}\p{N}])?";
/// Start of input or a non-alphanumeric code point.
const LEFT_EDGE: &str = r"(?:^|(?-i:[^\p{L}\p{N}]))";
/// Non-alphanumeric code point or end of input.
const RIGHT_EDGE: &str = r"(?:(?-i:[^\p{L}\p{N}])|$)";

/// Characters a reader could take for `ch`, including `ch` itself.
fn confusables(ch: char) -> Option<&'static str> {
    let bucket = match ch {
        'a' => "aа@4",
        'b' => "bв8",
        'c' => "cс",
        'e' => "eе3",
        'g' => "g9",
        'h' => "hн",
        'i' => "iі1!|",
        'k' => "kк",
        'l' => "l1|",
        'm' => "mм",
        'o' => "oо0",
        'p' => "pр",
        's' => "s$5",
        't' => "tт7",
        'x' => "xх",
        'y' => "yу",
        'z' => "z2",
        _ => return None,
    };
    Some(bucket)
}

fn char_class(ch: char) -> String {
    let mut class = String::from("[");
    match confusables(ch) {
        Some(bucket) => {
            for c in bucket.chars() {
                class.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
            }
        }
        None => class.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
    }
    class.push(']');
    class
}

/// Build the evasion-resistant pattern for `word`.
///
/// `word` should already be normalized and non-empty. The result is meant to
/// be compiled with [`compile_filter`].
pub fn confusable_pattern(word: &str) -> String {
    let classes: Vec<String> = word.to_lowercase().chars().map(char_class).collect();
    format!("{}{}{}", LEFT_EDGE, classes.join(NOISE), RIGHT_EDGE)
}

/// Whole-word literal matcher used when auto-regex is off.
pub fn literal_word_pattern(word: &str) -> String {
    format!(r"\b{}\b", regex::escape(word))
}

/// Compile a filter source the way every matcher is compiled: case-insensitive, Unicode-aware.
pub fn compile_filter(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}
