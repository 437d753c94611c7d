//! HTML entity encoders used by the response writer.

/// Escape every markup-significant character, converting newlines to `<br />`.
pub fn encode_all(text: &str, out: &mut String) {
    encode_into(text, out, true);
}

/// Like [`encode_all`] but leaves newlines alone, for textarea contents.
pub fn encode_form(text: &str, out: &mut String) {
    encode_into(text, out, false);
}

fn encode_into(text: &str, out: &mut String, convert_newlines: bool) {
    out.reserve(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' if convert_newlines => out.push_str("<br />\n"),
            _ => out.push(ch),
        }
    }
}

/// Escape for XML text and attribute content.
pub fn encode_xml(text: &str, out: &mut String) {
    out.reserve(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

/// Escape special characters but pass tags and existing entities through.
pub fn encode_markup(text: &str, out: &mut String) {
    out.reserve(text.len());
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        match ch {
            '<' => {
                if let Some(len) = tag_len(rest) {
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
                out.push_str("&lt;");
            }
            '&' => {
                if let Some(len) = entity_len(rest) {
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
                out.push_str("&amp;");
            }
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
        rest = &rest[ch.len_utf8()..];
    }
}

// Length of a tag starting at `text[0] == '<'`, if it looks like one.
fn tag_len(text: &str) -> Option<usize> {
    let next = text[1..].chars().next()?;
    if !(next.is_ascii_alphabetic() || matches!(next, '/' | '!' | '?')) {
        return None;
    }
    text.find('>').map(|end| end + 1)
}

// Length of `&name;` or `&#123;` starting at `text[0] == '&'`.
fn entity_len(text: &str) -> Option<usize> {
    let body = &text[1..];
    let end = body.find(';')?;
    if end == 0 || end > 10 {
        return None;
    }
    let name = &body[..end];
    let valid = match name.strip_prefix('#') {
        Some(num) => {
            let digits = num.strip_prefix(['x', 'X']).unwrap_or(num);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => name.chars().all(|c| c.is_ascii_alphanumeric()),
    };
    valid.then_some(end + 2)
}
