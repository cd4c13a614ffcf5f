use std::borrow::Cow;

use serde_json::Value;
use tracing::debug;

use super::{Middleware, Next};
use crate::context::{ParamVec, RequestContext};
use crate::handler::HandlerResult;

/// Neutralizes user-supplied text before handlers see it.
///
/// Path parameters, query parameters and every string inside a JSON body are
/// rewritten in place: values are cut to `max_len` characters, control
/// characters other than tab, CR and LF are removed, and `& < > " '` become
/// HTML entities. Object keys are left alone.
#[derive(Debug, Clone)]
pub struct SanitizeMiddleware {
    escape_html: bool,
    strip_control: bool,
    max_len: Option<usize>,
    sanitize_body: bool,
}

impl Default for SanitizeMiddleware {
    fn default() -> Self {
        Self {
            escape_html: true,
            strip_control: true,
            max_len: None,
            sanitize_body: true,
        }
    }
}

impl SanitizeMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn escape_html(mut self, on: bool) -> Self {
        self.escape_html = on;
        self
    }

    #[must_use]
    pub fn strip_control(mut self, on: bool) -> Self {
        self.strip_control = on;
        self
    }

    /// Truncate values to `max` characters (not bytes).
    #[must_use]
    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    #[must_use]
    pub fn sanitize_body(mut self, on: bool) -> Self {
        self.sanitize_body = on;
        self
    }

    /// Sanitized copy of `input`, borrowed when nothing had to change.
    #[must_use]
    pub fn clean<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let truncated = match self.max_len {
            Some(max) => match input.char_indices().nth(max) {
                Some((cut, _)) => &input[..cut],
                None => input,
            },
            None => input,
        };

        let needs_work = truncated.chars().any(|c| {
            (self.strip_control && is_stripped(c))
                || (self.escape_html && matches!(c, '&' | '<' | '>' | '"' | '\''))
        });
        if !needs_work {
            return Cow::Borrowed(truncated);
        }

        let mut out = String::with_capacity(truncated.len() + 8);
        for c in truncated.chars() {
            if self.strip_control && is_stripped(c) {
                continue;
            }
            match c {
                '&' if self.escape_html => out.push_str("&amp;"),
                '<' if self.escape_html => out.push_str("&lt;"),
                '>' if self.escape_html => out.push_str("&gt;"),
                '"' if self.escape_html => out.push_str("&quot;"),
                '\'' if self.escape_html => out.push_str("&#x27;"),
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    }

    fn rewrite(&self, input: &str) -> Option<String> {
        match self.clean(input) {
            Cow::Owned(v) => Some(v),
            Cow::Borrowed(b) if b.len() != input.len() => Some(b.to_string()),
            Cow::Borrowed(_) => None,
        }
    }

    fn clean_params(&self, params: &mut ParamVec) -> usize {
        let mut changed = 0;
        for (_, value) in params.iter_mut() {
            if let Some(v) = self.rewrite(value) {
                *value = v;
                changed += 1;
            }
        }
        changed
    }

    fn clean_value(&self, value: &mut Value) -> usize {
        match value {
            Value::String(s) => match self.rewrite(s) {
                Some(v) => {
                    *s = v;
                    1
                }
                None => 0,
            },
            Value::Array(items) => items.iter_mut().map(|v| self.clean_value(v)).sum(),
            Value::Object(map) => map.values_mut().map(|v| self.clean_value(v)).sum(),
            Value::Null | Value::Bool(_) | Value::Number(_) => 0,
        }
    }
}

fn is_stripped(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

impl Middleware for SanitizeMiddleware {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let mut changed = self.clean_params(&mut ctx.params);
        changed += self.clean_params(&mut ctx.query_params);
        if self.sanitize_body {
            if let Some(body) = ctx.body.as_mut() {
                changed += self.clean_value(body);
            }
        }
        if changed > 0 {
            debug!(path = %ctx.path, changed, "Sanitized request values");
        }
        next.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_markup() {
        let s = SanitizeMiddleware::new();
        assert_eq!(
            s.clean(r#"<script>alert("x&y")</script>'"#),
            "&lt;script&gt;alert(&quot;x&amp;y&quot;)&lt;/script&gt;&#x27;"
        );
    }

    #[test]
    fn clean_input_is_borrowed() {
        let s = SanitizeMiddleware::new();
        assert!(matches!(s.clean("host-42.internal"), Cow::Borrowed(_)));
    }

    #[test]
    fn strips_control_but_keeps_whitespace() {
        let s = SanitizeMiddleware::new();
        assert_eq!(s.clean("a\u{0}b\u{1b}[31mc\td\ne"), "ab[31mc\td\ne");
    }

    #[test]
    fn truncates_by_chars() {
        let s = SanitizeMiddleware::new().max_len(3);
        assert_eq!(s.clean("héllo"), "hél");
        assert_eq!(s.clean("hi"), "hi");
    }

    #[test]
    fn escaping_can_be_disabled() {
        let s = SanitizeMiddleware::new().escape_html(false);
        assert_eq!(s.clean("<b>"), "<b>");
    }

    #[test]
    fn walks_json_strings_only() {
        let s = SanitizeMiddleware::new();
        let mut v = json!({
            "<key>": "<v>",
            "list": ["ok", "<i>", 3, null],
            "nested": { "deep": "a&b" }
        });
        assert_eq!(s.clean_value(&mut v), 3);
        assert_eq!(v["<key>"], "&lt;v&gt;");
        assert_eq!(v["list"][1], "&lt;i&gt;");
        assert_eq!(v["list"][2], 3);
        assert_eq!(v["nested"]["deep"], "a&amp;b");
    }
}
