//! Fuzzy answer matching
//!
//! A guess is judged against every acceptable answer of a track. Both sides
//! are normalized first (lowercase, whitespace and common punctuation
//! removed), then compared by exact equality, substring inclusion and
//! Levenshtein similarity.

/// Similarity above which a guess counts as correct
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Minimum normalized guess length for the substring rule
pub const MIN_SUBSTRING_LEN: usize = 3;

fn is_stripped(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '-' | '_' | '.' | '(' | ')' | '[' | ']' | '{' | '}' | '!' | '?' | ',' | ';' | ':'
                | '\'' | '"'
        )
}

/// Lowercase and strip whitespace and punctuation
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| !is_stripped(*c))
        .collect()
}

/// Single-character edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row rolling table
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity in `[0, 1]`, 1.0 meaning identical
///
/// Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    (longest - levenshtein(a, b)) as f64 / longest as f64
}

/// Check one normalized guess against one normalized answer
fn matches_normalized(guess: &str, answer: &str) -> bool {
    if guess == answer {
        return true;
    }

    if guess.chars().count() >= MIN_SUBSTRING_LEN
        && (guess.contains(answer) || answer.contains(guess))
    {
        return true;
    }

    similarity(guess, answer) > SIMILARITY_THRESHOLD
}

/// Judge a raw guess against a list of acceptable answers
///
/// Returns true if any answer matches under any rule.
pub fn is_correct<S: AsRef<str>>(guess: &str, answers: &[S]) -> bool {
    let guess = normalize(guess);
    answers
        .iter()
        .any(|answer| matches_normalized(&guess, &normalize(answer.as_ref())))
}
