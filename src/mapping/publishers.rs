//! Built-in publisher strategies.

use super::{MappingRegistry, SourceMapper, opaque_guid, plain_text};
use crate::catalog::SourceDescriptor;
use crate::feed::RawEntry;
use std::sync::Arc;

/// Register every built-in strategy under its mapper key.
pub fn register_all(registry: &mut MappingRegistry) {
    registry.register("ap", Arc::new(OpaqueIdMapper { key: "ap" }));
    registry.register("bb", Arc::new(BbcMapper));
    registry.register("np", Arc::new(NprMapper));
    registry.register("gd", Arc::new(GuardianMapper));
    registry.register("aj", Arc::new(OpaqueIdMapper { key: "aj" }));
    registry.register("gr", Arc::new(WordPressMapper));
}

fn identity(entry: &RawEntry) -> &str {
    if entry.id.trim().is_empty() {
        entry.link.as_deref().unwrap_or_default()
    } else {
        entry.id.trim()
    }
}

/// Publishers whose GUIDs carry no usable number: hash the feed identifier.
struct OpaqueIdMapper {
    key: &'static str,
}

impl SourceMapper for OpaqueIdMapper {
    fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
        opaque_guid(self.key, identity(entry))
    }
}

/// BBC links end in a numeric story id and carry tracking query strings.
struct BbcMapper;

impl SourceMapper for BbcMapper {
    fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
        let link = self.extract_link(entry).unwrap_or_default();
        match trailing_number(&link) {
            Some(number) => format!("bb{number}"),
            None => opaque_guid("bb", identity(entry)),
        }
    }

    fn extract_link(&self, entry: &RawEntry) -> Option<String> {
        let link = entry.link.as_deref()?.trim();
        let link = link.split_once('?').map_or(link, |(base, _)| base);
        (!link.is_empty()).then(|| link.to_string())
    }
}

/// NPR links embed a long numeric story id as a path segment.
struct NprMapper;

impl SourceMapper for NprMapper {
    fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
        let link = entry.link.as_deref().unwrap_or_default();
        match story_segment(link) {
            Some(number) => format!("np{number}"),
            None => opaque_guid("np", identity(entry)),
        }
    }
}

/// The Guardian tags each entry with several categories.
struct GuardianMapper;

impl SourceMapper for GuardianMapper {
    fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
        opaque_guid("gd", identity(entry))
    }

    fn extract_category(&self, entry: &RawEntry, source: &SourceDescriptor) -> String {
        let mut categories: Vec<&str> = Vec::new();
        for category in entry.categories.iter().map(|c| c.trim()) {
            if !category.is_empty() && !categories.contains(&category) {
                categories.push(category);
            }
        }
        if categories.is_empty() {
            source.category.clone()
        } else {
            categories.join(", ")
        }
    }
}

/// WordPress feeds: `?p=<id>` permalinks as GUIDs and full content in `content:encoded`.
struct WordPressMapper;

impl SourceMapper for WordPressMapper {
    fn extract_guid(&self, entry: &RawEntry, _source: &SourceDescriptor) -> String {
        match wordpress_post_id(&entry.id) {
            Some(id) => format!("gr{id}"),
            None => opaque_guid("gr", identity(entry)),
        }
    }

    fn extract_description(&self, entry: &RawEntry) -> Option<String> {
        entry
            .content
            .as_deref()
            .or(entry.description.as_deref())
            .map(plain_text)
            .filter(|text| !text.is_empty())
    }
}

fn trailing_number(link: &str) -> Option<&str> {
    let path = link.trim_end_matches('/');
    let digits = path.len()
        - path
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .len();
    (digits > 0).then(|| &path[path.len() - digits..])
}

fn story_segment(link: &str) -> Option<&str> {
    link.split('/')
        .filter(|segment| segment.len() >= 6 && segment.bytes().all(|b| b.is_ascii_digit()))
        .max_by_key(|segment| segment.len())
}

fn wordpress_post_id(guid: &str) -> Option<&str> {
    let (_, query) = guid.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("p="))
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(category: &str) -> SourceDescriptor {
        SourceDescriptor {
            publisher: "Example".into(),
            category: category.into(),
            url: "https://example.org/rss".into(),
            mapper_key: "zz".into(),
            enabled: true,
            has_full_content: false,
        }
    }

    fn entry(id: &str, link: &str) -> RawEntry {
        RawEntry {
            id: id.into(),
            link: Some(link.into()),
            ..RawEntry::default()
        }
    }

    #[test]
    fn bbc_uses_trailing_story_id_and_strips_tracking() {
        let raw = entry(
            "https://www.bbc.co.uk/news/world-europe-68912345",
            "https://www.bbc.com/news/world-europe-68912345?at_medium=RSS&at_campaign=rss",
        );
        assert_eq!(BbcMapper.extract_guid(&raw, &source("World")), "bb68912345");
        assert_eq!(
            BbcMapper.extract_link(&raw).as_deref(),
            Some("https://www.bbc.com/news/world-europe-68912345")
        );
    }

    #[test]
    fn bbc_falls_back_to_opaque_suffix() {
        let raw = entry("urn:bbc:live", "https://www.bbc.com/news/live/world");
        let guid = BbcMapper.extract_guid(&raw, &source("World"));
        assert!(guid.starts_with("bb") && guid.len() == 18);
    }

    #[test]
    fn npr_picks_story_segment() {
        let raw = entry(
            "abc",
            "https://www.npr.org/2024/05/01/1248312345/council-budget",
        );
        assert_eq!(NprMapper.extract_guid(&raw, &source("National")), "np1248312345");
    }

    #[test]
    fn guardian_joins_distinct_categories() {
        let mut raw = entry("g1", "https://www.theguardian.com/us-news/1");
        raw.categories = vec!["US news".into(), "Politics".into(), "US news".into()];
        assert_eq!(
            GuardianMapper.extract_category(&raw, &source("US News")),
            "US news, Politics"
        );

        raw.categories.clear();
        assert_eq!(GuardianMapper.extract_category(&raw, &source("US News")), "US News");
    }

    #[test]
    fn wordpress_reads_post_id_and_full_content() {
        let raw = RawEntry {
            id: "https://grist.org/?p=629812".into(),
            link: Some("https://grist.org/climate/story/".into()),
            description: Some("Teaser".into()),
            content: Some("<p>Full <em>body</em> text.</p>".into()),
            ..RawEntry::default()
        };
        assert_eq!(
            WordPressMapper.extract_guid(&raw, &source("Environment")),
            "gr629812"
        );
        assert_eq!(
            WordPressMapper.extract_description(&raw).as_deref(),
            Some("Full body text.")
        );
    }

    #[test]
    fn opaque_mapper_hashes_identifier() {
        let mapper = OpaqueIdMapper { key: "ap" };
        let raw = entry("tag:apnews.com,2024:abcdef", "https://apnews.com/article/abcdef");
        let guid = mapper.extract_guid(&raw, &source("Top News"));
        assert_eq!(guid, opaque_guid("ap", "tag:apnews.com,2024:abcdef"));
    }
}
