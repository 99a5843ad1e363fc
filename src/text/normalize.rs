//! Email body normalization: HTML stripping, quote removal and whitespace.
//!
//! Pure string processing. Every regex is compiled lazily into an
//! `Option<Regex>`; a pattern that fails to compile turns its step into a
//! no-op, so `clean()` always returns the text as of the last step that ran.

use std::sync::LazyLock;

use regex::Regex;

type Pattern = LazyLock<Option<Regex>>;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Pattern = LazyLock::new(|| Regex::new($re).ok());
    };
}

// ── HTML ────────────────────────────────────────────────────────────

pattern!(STYLE_BLOCK, r"(?is)<style[^>]*>.*?</style>");
pattern!(SCRIPT_BLOCK, r"(?is)<script[^>]*>.*?</script>");
pattern!(HEAD_BLOCK, r"(?is)<head[^>]*>.*?</head>");
pattern!(LINE_BREAK_TAG, r"(?i)<br\s*/?>|</p>|</div>|</li>|</tr>|</h[1-6]>");
pattern!(ANY_TAG, r"<[^>]+>");
pattern!(DANGLING_BLOCK_TAG, r"(?i)</?\s*(script|style)");

// ── CSS leaking into text nodes ─────────────────────────────────────

pattern!(CSS_MEDIA_BLOCK, r"(?is)@media[^{]*\{.*?\}");
pattern!(CSS_SELECTOR_BLOCK, r"(?s)[.#][A-Za-z0-9_-]+\s*\{[^}]*\}");
pattern!(CSS_RULE_BLOCK, r"(?s)\b[A-Za-z][A-Za-z0-9_-]*\b\s*\{[^}]*\}");
pattern!(CSS_PUNCT_RUN, r"[;:{}]{3,}");

// ── Quoted replies / forwards ───────────────────────────────────────

pattern!(QUOTED_LINE, r"(?m)^>");
pattern!(ON_WROTE_LINE, r"(?im)^\s*on\s+.+?wrote:\s*$");
pattern!(ON_WROTE_BLOCK, r"(?is)\n\s*On\s+.+?wrote:\s*\n");
pattern!(ORIGINAL_MESSAGE, r"(?i)-----Original Message-----");
pattern!(FORWARDED_MESSAGE, r"(?i)-----Forwarded message-----");
pattern!(HEADER_LINE, r"(?im)^\s*(from|sent|to|subject):\s+.+$");

// ── Whitespace ──────────────────────────────────────────────────────

pattern!(EXCESS_NEWLINES, r"\n{3,}");
pattern!(HORIZONTAL_RUN, r"[ \t]{2,}");

/// Clean a raw email body into prose suitable for embedding.
///
/// Blank input yields an empty string. HTML-looking input is converted to
/// text first, then quoted-reply content is cut off, then whitespace is
/// normalized and the result trimmed.
pub fn clean(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let mut text = raw.to_string();

    if looks_like_html(&text) {
        text = html_to_text(&text);
    }

    text = strip_quoted_reply(&text);
    text = normalize_whitespace(&text);

    text.trim().to_string()
}

/// Heuristic HTML detection.
pub fn looks_like_html(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("<html")
        || lower.contains("<body")
        || lower.contains("<div")
        || lower.contains("<br")
        || lower.contains("<script")
        || lower.contains("<style")
        || (lower.contains('<') && lower.contains('>') && lower.contains("</"))
}

/// Minimal HTML → text conversion that keeps paragraph breaks.
fn html_to_text(html: &str) -> String {
    let mut text = replace(html, &STYLE_BLOCK, " ");
    text = replace(&text, &SCRIPT_BLOCK, " ");
    text = replace(&text, &HEAD_BLOCK, " ");

    text = replace(&text, &LINE_BREAK_TAG, "\n");
    text = replace(&text, &ANY_TAG, " ");

    // Entities may decode into fresh markup, so scrub after decoding.
    text = decode_entities(&text);
    text = replace(&text, &DANGLING_BLOCK_TAG, " ");
    text = strip_css_noise(&text);

    text = replace(&text, &HORIZONTAL_RUN, " ");
    text = replace(&text, &EXCESS_NEWLINES, "\n\n");
    text.trim().to_string()
}

/// Decode the handful of entities that show up in nearly every HTML mail.
///
/// `&amp;` goes after `&lt;`/`&gt;` so `&amp;lt;` stays a literal `&lt;`.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn strip_css_noise(text: &str) -> String {
    let mut out = replace(text, &CSS_MEDIA_BLOCK, " ");
    out = replace(&out, &CSS_SELECTOR_BLOCK, " ");
    out = replace(&out, &CSS_RULE_BLOCK, " ");
    replace(&out, &CSS_PUNCT_RUN, " ")
}

/// Cut the text at the earliest quoted-reply or forward marker.
///
/// Every marker is searched on the same input and the smallest offset
/// wins, so the order of the list below does not matter.
pub fn strip_quoted_reply(text: &str) -> String {
    let markers: [&Pattern; 6] = [
        &QUOTED_LINE,
        &ON_WROTE_LINE,
        &ON_WROTE_BLOCK,
        &ORIGINAL_MESSAGE,
        &FORWARDED_MESSAGE,
        &HEADER_LINE,
    ];

    let cut = markers
        .iter()
        .filter_map(|p| find_offset(text, p))
        .min();

    match cut {
        Some(offset) => text[..offset].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = replace(&unified, &EXCESS_NEWLINES, "\n\n");
    replace(&collapsed, &HORIZONTAL_RUN, " ")
}

fn replace(text: &str, pattern: &Pattern, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

fn find_offset(text: &str, pattern: &Pattern) -> Option<usize> {
    pattern.as_ref()?.find(text).map(|m| m.start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_yields_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\t  "), "");
    }

    #[test]
    fn entity_encoded_script_never_survives() {
        let out = clean("<div>&lt;script&gt;alert(1)&lt;/script&gt; hi</div>");
        let lower = out.to_lowercase();
        assert!(!lower.contains("<script"));
        assert!(!lower.contains("</script"));
        assert!(out.contains("hi"));

        let out = clean("<p>&lt;STYLE&gt;x&lt;/style&gt;</p>");
        assert!(!out.to_lowercase().contains("<style"));
    }

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(clean("Hello there,\nthanks for the note."), "Hello there,\nthanks for the note.");
    }

    #[test]
    fn html_paragraphs_become_lines() {
        let html = "<html><body><p>Hi Anna,</p><p>The invoice is attached.</p></body></html>";
        let out = clean(html);
        assert!(out.contains("Hi Anna,"));
        assert!(out.contains("The invoice is attached."));
        assert!(out.contains('\n'));
        assert!(!out.contains('<'));
    }

    #[test]
    fn html_br_and_list_items() {
        let out = clean("<div>one<br>two<br/>three</div><ul><li>a</li><li>b</li></ul>");
        let lines: Vec<&str> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["one", "two", "three", "a", "b"]);
    }

    #[test]
    fn html_removes_style_script_and_head() {
        let html = r#"<html><head><title>T</title></head>
            <style type="text/css">.x { color: red; }</style>
            <script>alert('boom')</script>
            <body><div>Visible text</div></body></html>"#;
        let out = clean(html);
        assert_eq!(out, "Visible text");
        assert!(!out.to_lowercase().contains("<script"));
        assert!(!out.to_lowercase().contains("<style"));
        assert!(!out.contains("alert"));
    }

    #[test]
    fn unterminated_script_tag_is_scrubbed() {
        let out = clean("before <script src=x> after");
        assert!(!out.to_lowercase().contains("<script"));
        assert!(out.contains("before"));
        assert!(out.contains("after"));
    }

    #[test]
    fn html_entities_decoded() {
        let out = clean("<div>Tom &amp; Jerry &lt;3 &quot;cheese&quot; it&#39;s&nbsp;fine</div>");
        assert_eq!(out, "Tom & Jerry <3 \"cheese\" it's fine");
    }

    #[test]
    fn css_noise_removed_from_text_nodes() {
        let html = "<div>@media screen { .a { x: y } } body { margin:0; } .btn{color:red} Real content</div>";
        let out = clean(html);
        assert!(out.contains("Real content"));
        assert!(!out.contains("margin"));
        assert!(!out.contains("color:red"));
    }

    #[test]
    fn quoted_lines_are_cut() {
        let out = clean("Sounds good.\n> previous message\n> more");
        assert_eq!(out, "Sounds good.");
    }

    #[test]
    fn on_wrote_attribution_cut() {
        let body = "Thanks, see you then.\n\nOn Tue, Dec 31, 2025 at 2:11 PM Lauren K <l@example.com> wrote:\nOld text";
        assert_eq!(clean(body), "Thanks, see you then.");
    }

    #[test]
    fn on_wrote_is_case_insensitive() {
        let body = "Reply body\non monday alice wrote:\nold";
        assert_eq!(clean(body), "Reply body");
    }

    #[test]
    fn original_message_marker_cut() {
        let body = "New reply\n\n-----Original Message-----\nFrom: x\nold";
        assert_eq!(clean(body), "New reply");
    }

    #[test]
    fn forwarded_marker_cut() {
        let body = "FYI below\n-----Forwarded message-----\nstuff";
        assert_eq!(clean(body), "FYI below");
    }

    #[test]
    fn outlook_header_block_cut() {
        let body = "Please confirm.\n\nFrom: Bob <bob@example.com>\nSent: Monday\nSubject: Re: order";
        assert_eq!(clean(body), "Please confirm.");
    }

    #[test]
    fn earliest_marker_wins_regardless_of_order() {
        // The header line comes before the quoted line; the header cut must win
        // even though the '>' rule is listed first.
        let body = "Top reply\nSubject: hello there\nmiddle\n> quoted";
        assert_eq!(strip_quoted_reply(body), "Top reply");

        // And the reverse: the quote comes first.
        let body = "Top reply\n> quoted\n-----Original Message-----\nold";
        assert_eq!(strip_quoted_reply(body), "Top reply");
    }

    #[test]
    fn indented_angle_bracket_is_not_a_quote() {
        let out = clean("a < b and\n  > not a quote line");
        assert!(out.contains("not a quote line"));
    }

    #[test]
    fn whitespace_normalized() {
        let out = clean("line one\r\nline   two\t\tend\n\n\n\n\nlast");
        assert_eq!(out, "line one\nline two end\n\nlast");
    }

    #[test]
    fn looks_like_html_heuristics() {
        assert!(looks_like_html("<div>x</div>"));
        assert!(looks_like_html("a<br>b"));
        assert!(looks_like_html("<b>bold</b>"));
        assert!(!looks_like_html("2 < 3 and 5 > 4"));
        assert!(!looks_like_html("plain"));
    }
}
