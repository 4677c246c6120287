//! Rule-based tweet normalization.
//!
//! Raw tweet text is rewritten into a canonical lowercase vocabulary in which
//! URLs, mentions, emoticons, numbers, hashtags, repeated punctuation,
//! elongated words and all-caps runs are replaced by sentinel tokens:
//!
//! | Pattern | Sentinel |
//! |---------|----------|
//! | `http://…`, `www.…` | `<url>` |
//! | `@name` | `<user>` |
//! | `:)` `:D` `(:` | `<smile>` |
//! | `:p` | `<lolface>` |
//! | `:(` `):` | `<sadface>` |
//! | `:|` `:*` | `<neutralface>` |
//! | `<3` | `<heart>` |
//! | `-1,000.5` | `<number>` |
//! | `#TagBody` | `<hashtag> tag body` |
//! | `!!!` | `! <repeat>` |
//! | `sooo` | `so <elong>` |
//! | `WOW` | `wow <allcaps>` |
//!
//! Rules run in a fixed order; a later rule never matches inside a sentinel
//! produced by an earlier one.
//!
//! Word, digit and whitespace classes are ASCII-only: `é` or `١` are neither
//! word characters nor digits, and only ` \t\n\r\x0B\x0C` count as space.

use super::stopwords::is_removable;
use regex::{Captures, Regex};
use std::sync::OnceLock;

struct Rules {
    url: Regex,
    user: Regex,
    smile: Regex,
    lolface: Regex,
    sadface: Regex,
    neutralface: Regex,
    heart: Regex,
    number: Regex,
    hashtag: Regex,
    repeat: Regex,
    allcaps: Regex,
}

// eyes: [8:=;]   nose: ['`\-]?
// \w = [0-9A-Za-z_]   \d = [0-9]   \S = [^ \t\n\r\x0B\x0C]
fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("normalizer patterns are constant");
        Rules {
            // `\S+\b` backtracks to just after the last word character.
            url: re(r"https?://[^ \t\n\r\x0B\x0C]*[0-9A-Za-z_]|www\.([0-9A-Za-z_]+\.)+[^ \t\n\r\x0B\x0C]*"),
            user: re(r"@[0-9A-Za-z_]+"),
            smile: re(r"[8:=;]['`\-]?[)dD]+|[)dD]+['`\-]?[8:=;]"),
            lolface: re(r"[8:=;]['`\-]?p+"),
            sadface: re(r"[8:=;]['`\-]?\(+|\)+['`\-]?[8:=;]"),
            neutralface: re(r"[8:=;]['`\-]?[/|l*]"),
            heart: re(r"<3"),
            number: re(r"[-+]?[.0-9]*[0-9]+[:,.0-9]*"),
            hashtag: re(r"#[^ \t\n\r\x0B\x0C]+"),
            repeat: re(r"([!?.]){2,}"),
            allcaps: re(r"([A-Z]){2,}"),
        }
    })
}

fn mention_pattern() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"@[0-9A-Za-z_]+").expect("mention pattern is constant"))
}

/// Rewrite raw tweet text into its sentinel-token form.
///
/// Pure: the output depends only on `text`.
pub fn tokenize(text: &str) -> String {
    let r = rules();

    let text = r.url.replace_all(text, "<url>");
    let text = text.replace('/', " / ");
    let text = r.user.replace_all(&text, "<user>");
    let text = r.smile.replace_all(&text, "<smile>");
    let text = r.lolface.replace_all(&text, "<lolface>");
    let text = r.sadface.replace_all(&text, "<sadface>");
    let text = r.neutralface.replace_all(&text, "<neutralface>");
    let text = r.heart.replace_all(&text, "<heart>");
    let text = r.number.replace_all(&text, "<number>");
    let text = r
        .hashtag
        .replace_all(&text, |caps: &Captures| expand_hashtag(&caps[0]));
    let text = r.repeat.replace_all(&text, "${1} <repeat>");
    let text = mark_elongations(&text);
    let text = r
        .allcaps
        .replace_all(&text, |caps: &Captures| format!("{} <allcaps>", caps[0].to_lowercase()));

    text.to_lowercase()
}

/// Drop stopwords (except negations) and single-character tokens.
pub fn remove_stopwords(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !is_removable(word) && word.chars().count() > 1)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip any `@name` left over after tokenization.
pub fn remove_mentions(text: &str) -> String {
    mention_pattern().replace_all(text, "").into_owned()
}

/// Full cleaning pass applied to every tweet: tokenize, drop stopwords, strip mentions.
pub fn clean_text(text: &str) -> String {
    remove_mentions(&remove_stopwords(&tokenize(text)))
}

/// `#TagBody` → `<hashtag> Tag Body`, or `<hashtag> BODY <allcaps>` for all-caps bodies.
fn expand_hashtag(tag: &str) -> String {
    let body = &tag[1..];
    if is_upper(body) {
        return format!("<hashtag> {} <allcaps>", body);
    }

    let mut pieces = vec!["<hashtag>"];
    let mut start = 0;
    for (i, c) in body.char_indices() {
        if c.is_ascii_uppercase() && i > start {
            pieces.push(&body[start..i]);
            start = i;
        }
    }
    pieces.push(&body[start..]);
    pieces.join(" ")
}

/// True when `s` has at least one cased character and none of them is lowercase.
fn is_upper(s: &str) -> bool {
    let mut cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}

fn is_boundary(chars: &[char], pos: usize) -> bool {
    let before = pos > 0 && is_word_char(chars[pos - 1]);
    let after = pos < chars.len() && is_word_char(chars[pos]);
    before != after
}

/// Collapse a run of 3+ identical characters that ends a word: `sooo` → `so <elong>`.
///
/// Equivalent to substituting `\b(\S*?)(.)\2{2,}\b` with `\1\2 <elong>`; the
/// backreference is matched by hand because `regex` does not support it.
fn mark_elongations(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut copied = 0;
    let mut i = 0;

    while i < chars.len() {
        match match_elongation(&chars, i) {
            Some((run_start, end)) => {
                out.extend(&chars[copied..=run_start]);
                out.push_str(" <elong>");
                copied = end;
                i = end;
            }
            None => i += 1,
        }
    }
    out.extend(&chars[copied..]);
    out
}

/// Returns `(run_start, end)` for an elongation match beginning at `start`.
fn match_elongation(chars: &[char], start: usize) -> Option<(usize, usize)> {
    if !is_boundary(chars, start) {
        return None;
    }

    // Lazy prefix: grow it one non-space character at a time.
    let mut run_start = start;
    while run_start < chars.len() {
        let c = chars[run_start];
        let mut repeats = 0;
        while run_start + 1 + repeats < chars.len() && chars[run_start + 1 + repeats] == c {
            repeats += 1;
        }

        // Greedy repetition, backing off until the run ends on a word boundary.
        for r in (2..=repeats).rev() {
            let end = run_start + 1 + r;
            if is_boundary(chars, end) {
                return Some((run_start, end));
            }
        }

        if is_space(c) {
            return None;
        }
        run_start += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_allcaps_and_repeat() {
        let out = tokenize("check http://x.co NOW!!!");
        assert!(out.contains("<url>"), "{out}");
        assert!(out.contains("now <allcaps>"), "{out}");
        assert!(out.contains("! <repeat>"), "{out}");
        assert!(!out.contains("x.co"));
    }

    #[test]
    fn test_hashtag_split_on_capitals() {
        assert_eq!(tokenize("#ThisIsATag"), "<hashtag> this is a tag");
        assert_eq!(tokenize("#rust"), "<hashtag> rust");
    }

    #[test]
    fn test_all_caps_hashtag() {
        let out = tokenize("#NASA");
        assert!(out.starts_with("<hashtag> nasa <allcaps>"), "{out}");
    }

    #[test]
    fn test_mentions_and_www() {
        assert_eq!(tokenize("@bob see www.example.com"), "<user> see <url>");
    }

    #[test]
    fn test_emoticons() {
        assert_eq!(tokenize("great :) bad :( lol :p meh ;|"), "great <smile> bad <sadface> lol <lolface> meh <neutralface>");
        assert_eq!(tokenize("love <3"), "love <heart>");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("won 1,000 at 10:30 by -3.5"), "won <number> at <number> by <number>");
    }

    #[test]
    fn test_slashes_are_spaced() {
        assert_eq!(tokenize("and/or"), "and / or");
    }

    #[test]
    fn test_elongation() {
        assert_eq!(tokenize("sooooo good"), "so <elong> good");
        assert_eq!(tokenize("yesss"), "yes <elong>");
        // Two repeats are not an elongation.
        assert_eq!(tokenize("good"), "good");
    }

    #[test]
    fn test_sentinels_are_stable() {
        let sentinels = "<url> <user> <smile> <lolface> <sadface> <neutralface> <heart> \
                         <number> <hashtag> <repeat> <elong> <allcaps>";
        assert_eq!(tokenize(sentinels), sentinels);

        let once = tokenize("WOW @amy #BigNews at http://t.co/abc !!! sooo happy :D 42");
        assert_eq!(tokenize(&once), once);
    }

    #[test]
    fn test_non_ascii_is_not_word_or_digit() {
        assert_eq!(tokenize("hi @José"), "hi <user>é");
        assert_eq!(tokenize("win ١٢٣ prizes"), "win ١٢٣ prizes");
        assert_eq!(tokenize("cafééé"), "cafééé");
        assert_eq!(tokenize("see http://x.co/é"), "see <url> / é");
        assert_eq!(remove_mentions("ok @Zoë"), "ok ë");
    }

    #[test]
    fn test_remove_stopwords_keeps_negations() {
        assert_eq!(remove_stopwords("this is not a drill"), "not drill");
        assert_eq!(remove_stopwords("no way x"), "no way");
    }

    #[test]
    fn test_remove_mentions() {
        assert_eq!(remove_mentions("hi @someone there"), "hi  there");
    }

    #[test]
    fn test_clean_text() {
        let cleaned = clean_text("Check THIS out @jack: http://t.co/x #GoodNews!!");
        assert_eq!(cleaned, "check <allcaps> <user>: <url> <hashtag> good news! <repeat>");
    }
}
