//! Minimal XML text handling
//!
//! The NuGet and Maven adapters only need to read a handful of simple
//! elements (`<id>`, `<version>`, `<description>`) out of well-formed
//! documents produced by build tools, and to render flat documents of their
//! own. A full XML parser would be overkill for that.

/// The trimmed text of the first `<tag>…</tag>` element, if present and
/// non-empty.
pub(crate) fn element_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    let text = xml[start..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Escape text for embedding in rendered XML.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_trims() {
        let xml = "<package><id>  Abc </id><version>1.0</version></package>";
        assert_eq!(element_text(xml, "id").as_deref(), Some("Abc"));
        assert_eq!(element_text(xml, "version").as_deref(), Some("1.0"));
        assert!(element_text(xml, "description").is_none());
    }

    #[test]
    fn empty_elements_are_absent() {
        assert!(element_text("<id>   </id>", "id").is_none());
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("a<b&c>\"d\""), "a&lt;b&amp;c&gt;&quot;d&quot;");
    }
}
