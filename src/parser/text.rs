use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static NOSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap());

/// Markup -> plain text. Script/style/comment content is dropped, tag
/// boundaries become spaces, entities are decoded, whitespace collapsed.
/// Inputs without markup pass through; malformed markup never fails, the
/// worst case is leftover angle-bracket noise in the output.
pub fn extract_text(markup: &str) -> String {
    if !markup.contains('<') {
        return collapse_whitespace(&decode_entities(markup));
    }
    let without_blocks = COMMENT_RE.replace_all(markup, " ");
    let without_blocks = SCRIPT_RE.replace_all(&without_blocks, " ");
    let without_blocks = STYLE_RE.replace_all(&without_blocks, " ");
    let without_blocks = NOSCRIPT_RE.replace_all(&without_blocks, " ");
    let stripped = strip_tags(&without_blocks);
    collapse_whitespace(&decode_entities(&stripped))
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Decode numeric (`&#64;`, `&#x2014;`) and common named entities. Unknown
/// names are left untouched.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY_RE
        .replace_all(s, |caps: &regex::Captures| {
            decode_one(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_one(body: &str) -> Option<String> {
    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(|c| c.to_string());
    }
    let decoded = match body {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "deg" => "\u{00b0}",
        "times" => "\u{00d7}",
        "middot" => "\u{00b7}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "\u{2026}",
        _ => return None,
    };
    Some(decoded.to_string())
}

pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Split into sentences at `.`/`!`/`?` runs followed by whitespace or end of
/// input. Returns (byte offset, sentence) pairs; offsets index into `text`.
/// Decimal points ("0.5 cups") do not split.
pub fn split_sentences(text: &str) -> Vec<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut end = i + 1;
            while end < bytes.len() && matches!(bytes[end], b'.' | b'!' | b'?') {
                end += 1;
            }
            if end >= bytes.len() || bytes[end].is_ascii_whitespace() {
                push_sentence(text, start, end, &mut sentences);
                start = end;
            }
            i = end;
        } else {
            i += 1;
        }
    }
    if start < bytes.len() {
        push_sentence(text, start, bytes.len(), &mut sentences);
    }
    sentences
}

fn push_sentence<'a>(text: &'a str, start: usize, end: usize, out: &mut Vec<(usize, &'a str)>) {
    let raw = &text[start..end];
    let trimmed_start = raw.trim_start();
    let offset = start + (raw.len() - trimmed_start.len());
    let sentence = trimmed_start.trim_end();
    if !sentence.is_empty() {
        out.push((offset, sentence));
    }
}
