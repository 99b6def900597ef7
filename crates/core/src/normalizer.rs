use regex::Regex;
use std::sync::OnceLock;

fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r\n?").expect("line break pattern is valid"))
}

fn whitespace_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("whitespace pattern is valid"))
}

/// Repairs text pulled out of a PDF: unifies line breaks, splits glued
/// words (`BloodPressure120` -> `Blood Pressure 120`, `140mg` -> `140 mg`),
/// collapses whitespace runs and trims.
///
/// The result never contains two consecutive whitespace characters, and
/// `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let unified = line_break_re().replace_all(raw, "\n");
    let separated = separate_glued_words(&unified);
    whitespace_run_re()
        .replace_all(&separated, " ")
        .trim()
        .to_string()
}

fn separate_glued_words(text: &str) -> String {
    let mut output = String::with_capacity(text.len() + text.len() / 8);
    let mut previous: Option<char> = None;

    for current in text.chars() {
        if let Some(previous) = previous {
            if needs_space(previous, current) {
                output.push(' ');
            }
        }
        output.push(current);
        previous = Some(current);
    }

    output
}

fn needs_space(previous: char, current: char) -> bool {
    let camel_case =
        previous.is_lowercase() && (current.is_uppercase() || current.is_ascii_digit());
    let digit_then_letter = previous.is_ascii_digit() && current.is_alphabetic();
    let letter_then_digit = previous.is_alphabetic() && current.is_ascii_digit();

    camel_case || digit_then_letter || letter_then_digit
}
