//! Source citation merging and rendering

use parley_ai::CitationFragment;
use serde::{Deserialize, Serialize};

/// A numbered source citation attached to an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub text: Option<String>,
    /// 1-based ordinal, fixed at first sight
    pub number: u32,
}

/// Normalize a URL into the key used for de-duplication.
///
/// Parseable URLs get a lowercased scheme and host, no fragment, and no
/// trailing slash on the path. Anything else is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut normalized = parsed.to_string();
            if parsed.query().is_none() && normalized.ends_with('/') {
                normalized.pop();
            }
            normalized
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Merge newly observed fragments into an ordered citation set.
///
/// First sighting wins: a fragment whose normalized URL is already present is
/// ignored, and numbers are never reassigned. Returns how many entries were
/// added.
pub fn merge_citations(citations: &mut Vec<Citation>, fragments: &[CitationFragment]) -> usize {
    let mut added = 0;
    for fragment in fragments {
        let url = fragment.url().trim();
        if url.is_empty() {
            continue;
        }

        let key = normalize_url(url);
        if citations.iter().any(|c| normalize_url(&c.url) == key) {
            continue;
        }

        let title = fragment
            .title()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(url)
            .to_string();

        citations.push(Citation {
            title,
            url: url.to_string(),
            text: fragment.excerpt().map(str::to_string),
            number: citations.len() as u32 + 1,
        });
        added += 1;
    }
    added
}

/// Render the block appended to a search-augmented answer
pub fn render_citations_block(citations: &[Citation]) -> String {
    let mut ordered: Vec<&Citation> = citations.iter().collect();
    ordered.sort_by_key(|c| c.number);

    let mut block = String::from("\n\n**Citations:**\n");
    for citation in ordered {
        block.push_str(&format!(
            "{}. [{}]({})\n",
            citation.number, citation.title, citation.url
        ));
    }
    block.truncate(block.trim_end().len());
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(title: &str, url: &str, text: &str) -> CitationFragment {
        CitationFragment::Inline {
            title: Some(title.into()),
            url: url.into(),
            text: Some(text.into()),
        }
    }

    fn delta(title: Option<&str>, url: &str) -> CitationFragment {
        CitationFragment::Delta {
            title: title.map(Into::into),
            url: url.into(),
            snippet: None,
        }
    }

    #[test]
    fn test_duplicates_are_ignored_first_seen_wins() {
        let mut set = Vec::new();
        let fragments = vec![
            inline("Rust", "https://rust-lang.org", "first"),
            inline("Tokio", "https://tokio.rs/", "async"),
            inline("Rust again", "https://rust-lang.org/", "second"),
            delta(Some("Tokio dup"), "HTTPS://TOKIO.RS"),
            delta(Some("Serde"), "https://serde.rs#derive"),
        ];

        let added = merge_citations(&mut set, &fragments);

        // 5 fragments, 2 duplicate URLs
        assert_eq!(added, 3);
        assert_eq!(set.len(), 3);
        assert_eq!(set[0].title, "Rust");
        assert_eq!(set[0].text.as_deref(), Some("first"));
        assert_eq!(set[0].number, 1);
        assert_eq!(set[1].title, "Tokio");
        assert_eq!(set[1].number, 2);
        assert_eq!(set[2].title, "Serde");
        assert_eq!(set[2].number, 3);
    }

    #[test]
    fn test_numbers_stable_across_batches() {
        let mut set = Vec::new();
        merge_citations(&mut set, &[delta(Some("B"), "https://b.example")]);
        merge_citations(
            &mut set,
            &[
                inline("A", "https://a.example", ""),
                inline("B2", "https://b.example", "ignored"),
            ],
        );

        assert_eq!(set.len(), 2);
        assert_eq!(set[0].url, "https://b.example");
        assert_eq!(set[0].number, 1);
        assert_eq!(set[0].title, "B");
        assert_eq!(set[1].number, 2);
    }

    #[test]
    fn test_missing_title_falls_back_to_url_and_empty_url_skipped() {
        let mut set = Vec::new();
        let added = merge_citations(
            &mut set,
            &[delta(None, "https://c.example/page"), delta(Some("x"), "  ")],
        );
        assert_eq!(added, 1);
        assert_eq!(set[0].title, "https://c.example/page");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" https://Example.COM/a/ "), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com/a#frag"), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com/?q=1"), "https://example.com/?q=1");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_render_block_ordered_by_number() {
        let citations = vec![
            Citation {
                title: "Second".into(),
                url: "https://two.example".into(),
                text: None,
                number: 2,
            },
            Citation {
                title: "First".into(),
                url: "https://one.example".into(),
                text: None,
                number: 1,
            },
        ];
        assert_eq!(
            render_citations_block(&citations),
            "\n\n**Citations:**\n1. [First](https://one.example)\n2. [Second](https://two.example)"
        );
    }
}
