//! Text normalisation and tokenisation for mixed Chinese/Latin text
//!
//! Han text has no word boundaries, so it is indexed as character
//! unigrams plus overlapping bigrams. Latin/digit runs become lowercase words.

/// Trim and collapse internal whitespace
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True for CJK unified ideographs (basic, extension A, compatibility, extension B)
pub fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF)
}

/// Split text into index terms
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut han_run: Vec<char> = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_han(c) {
            flush_word(&mut word, &mut tokens);
            han_run.push(c);
        } else if c.is_alphanumeric() {
            flush_han(&mut han_run, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            flush_word(&mut word, &mut tokens);
            flush_han(&mut han_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_han(&mut han_run, &mut tokens);

    tokens
}

fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

fn flush_han(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    for c in run.iter() {
        tokens.push(c.to_string());
    }
    for pair in run.windows(2) {
        tokens.push(pair.iter().collect());
    }
    run.clear();
}
