//! Recovery of per-item raw markup and namespaced extension elements.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Raw markup and extension values for one `<item>` / `<entry>`.
#[derive(Debug, Clone, Default)]
pub struct ScannedItem {
    /// The item's markup, verbatim.
    pub markup: Option<String>,
    /// First value seen for each namespaced element, keyed by qualified name.
    pub extensions: BTreeMap<String, String>,
}

fn item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<item(?:\s[^>]*)?>.*?</item>|<entry(?:\s[^>]*)?>.*?</entry>")
            .expect("item pattern compiles")
    })
}

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<((?:dc|dcterms|prism):[A-Za-z]+)(?:\s[^>]*)?>(.*?)</(?:dc|dcterms|prism):[A-Za-z]+>")
            .expect("extension pattern compiles")
    })
}

/// Split a feed document into items, in document order.
pub fn scan_items(document: &str) -> Vec<ScannedItem> {
    item_pattern()
        .find_iter(document)
        .map(|found| {
            let markup = found.as_str();
            let mut extensions = BTreeMap::new();
            for captures in extension_pattern().captures_iter(markup) {
                let name = captures[1].to_string();
                let value = strip_cdata(captures[2].trim());
                if !value.is_empty() {
                    extensions.entry(name).or_insert(value);
                }
            }
            ScannedItem {
                markup: Some(markup.to_string()),
                extensions,
            }
        })
        .collect()
}

fn strip_cdata(value: &str) -> String {
    value
        .strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
        .unwrap_or(value)
        .trim()
        .to_string()
}
