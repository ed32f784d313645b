//! Template segmentation: splitting a string into literal-text and
//! `{{ expression }}` segments.
//!
//! Kept in this crate (rather than alongside the expression parser in
//! `wf-core`) because the dependency analyzer (`graph.rs`) needs to find
//! expression segments to discover implicit node references, and doing so
//! must not require the full expression grammar to be parseable yet — the
//! scan in §4.4 of the spec is explicitly "string-pattern-based rather than
//! full expression parsing".

/// One piece of a segmented template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Text { value: String, start: usize, end: usize },
    Expression { raw: String, start: usize, end: usize },
}

/// Split `input` into text/expression segments.
///
/// - `\{{` is a literal `{{` and does not open an expression; the segmenter
///   emits it (de-escaped) as part of a text segment.
/// - An opening `{{` must find a matching `}}`; scanning skips over
///   single- and double-quoted string literals (backslash-escaped) so a
///   `}}` inside a quoted literal does not close the expression early.
/// - An unterminated `{{` degrades gracefully to a single text segment
///   spanning from the start of input to the end — it is never an error.
/// - Positions are byte offsets into `input`.
pub fn segment_template(input: &str) -> Vec<TemplateSegment> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut segments = Vec::new();
    let mut text_start = 0usize;
    let mut text_buf = String::new();
    let mut i = 0usize;

    while i < len {
        if bytes[i] == b'\\' && i + 2 < len && bytes[i + 1] == b'{' && bytes[i + 2] == b'{' {
            text_buf.push_str("{{");
            i += 3;
            continue;
        }

        if bytes[i] == b'{' && i + 1 < len && bytes[i + 1] == b'{' {
            let expr_content_start = i + 2;
            match find_closing(bytes, expr_content_start) {
                Some(close_at) => {
                    if !text_buf.is_empty() {
                        segments.push(TemplateSegment::Text {
                            value: std::mem::take(&mut text_buf),
                            start: text_start,
                            end: i,
                        });
                    }
                    let raw = input[expr_content_start..close_at].trim().to_string();
                    segments.push(TemplateSegment::Expression {
                        raw,
                        start: i,
                        end: close_at + 2,
                    });
                    i = close_at + 2;
                    text_start = i;
                    continue;
                }
                None => {
                    // Unterminated `{{`: degrade to a single text segment
                    // spanning the rest of the input, discarding any partial
                    // text already buffered before this point is folded in.
                    let mut value = text_buf;
                    value.push_str(&input[i..]);
                    segments.push(TemplateSegment::Text {
                        value,
                        start: text_start,
                        end: len,
                    });
                    return segments;
                }
            }
        }

        let ch_len = utf8_len(bytes[i]);
        text_buf.push_str(&input[i..i + ch_len]);
        i += ch_len;
    }

    if !text_buf.is_empty() {
        segments.push(TemplateSegment::Text {
            value: text_buf,
            start: text_start,
            end: len,
        });
    }

    segments
}

fn utf8_len(byte: u8) -> usize {
    if byte & 0x80 == 0 {
        1
    } else if byte & 0xE0 == 0xC0 {
        2
    } else if byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

/// Find the byte offset of the `}` that begins the closing `}}` for an
/// expression starting at `from`, skipping over quoted string literals.
fn find_closing(bytes: &[u8], from: usize) -> Option<usize> {
    let len = bytes.len();
    let mut i = from;
    let mut in_string: Option<u8> = None;

    while i < len {
        let b = bytes[i];
        match in_string {
            Some(quote) => {
                if b == b'\\' && i + 1 < len {
                    i += 2;
                    continue;
                }
                if b == quote {
                    in_string = None;
                }
                i += 1;
            }
            None => {
                if b == b'"' || b == b'\'' {
                    in_string = Some(b);
                    i += 1;
                } else if b == b'}' && i + 1 < len && bytes[i + 1] == b'}' {
                    return Some(i);
                } else {
                    i += 1;
                }
            }
        }
    }

    None
}

/// Returns true if `input` contains at least one `{{` that is not escaped
/// with a preceding `\`. Used as a fast path before running the full
/// segmenter on values that are overwhelmingly plain text.
pub fn looks_like_template(input: &str) -> bool {
    input.contains("{{")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_single_segment() {
        let segs = segment_template("hello world");
        assert_eq!(
            segs,
            vec![TemplateSegment::Text {
                value: "hello world".into(),
                start: 0,
                end: 11,
            }]
        );
    }

    #[test]
    fn single_expression() {
        let segs = segment_template("{{ a.output }}");
        assert_eq!(
            segs,
            vec![TemplateSegment::Expression {
                raw: "a.output".into(),
                start: 0,
                end: 14,
            }]
        );
    }

    #[test]
    fn mixed_text_and_expression() {
        let segs = segment_template("Got: {{input}}!");
        assert_eq!(
            segs,
            vec![
                TemplateSegment::Text { value: "Got: ".into(), start: 0, end: 5 },
                TemplateSegment::Expression { raw: "input".into(), start: 5, end: 14 },
                TemplateSegment::Text { value: "!".into(), start: 14, end: 15 },
            ]
        );
    }

    #[test]
    fn escaped_open_brace_is_literal() {
        let segs = segment_template(r"literal \{{ not an expr }}");
        assert_eq!(segs.len(), 1);
        match &segs[0] {
            TemplateSegment::Text { value, .. } => {
                assert_eq!(value, "literal {{ not an expr }}");
            }
            _ => panic!("expected text segment"),
        }
    }

    #[test]
    fn closing_brace_inside_string_literal_is_skipped() {
        let segs = segment_template(r#"{{ concat("}}", "x") }}"#);
        match &segs[0] {
            TemplateSegment::Expression { raw, .. } => {
                assert_eq!(raw, r#"concat("}}", "x")"#);
            }
            _ => panic!("expected expression segment"),
        }
    }

    #[test]
    fn unterminated_expression_degrades_to_text() {
        let segs = segment_template("before {{ not closed");
        assert_eq!(segs.len(), 1);
        match &segs[0] {
            TemplateSegment::Text { value, .. } => {
                assert_eq!(value, "before {{ not closed");
            }
            _ => panic!("expected text segment"),
        }
    }

    #[test]
    fn single_quote_string_literal_is_also_skipped() {
        let segs = segment_template("{{ concat('}}', 'y') }}");
        match &segs[0] {
            TemplateSegment::Expression { raw, .. } => {
                assert_eq!(raw, "concat('}}', 'y')");
            }
            _ => panic!("expected expression segment"),
        }
    }
}
