use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::domain::{PostId, PostReference, UserId, UserReference};

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("valid url regex"));
static BARE_IDS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\d]+$").expect("valid bare id regex"));
static DIGITS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digits regex"));
static ARCHIVE_WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bzip\b").expect("valid archive word regex"));

pub fn extract_post_refs(text: &str, limit: usize) -> Vec<PostReference> {
    let mut refs: Vec<PostReference> = Vec::new();
    let mut push = |candidate: PostReference| {
        let seen = refs
            .iter()
            .any(|r| r.post_id == candidate.post_id && r.page == candidate.page);
        if !seen {
            refs.push(candidate);
        }
    };

    if BARE_IDS_REGEX.is_match(text) {
        for m in DIGITS_REGEX.find_iter(text) {
            if let Ok(post_id) = m.as_str().parse::<PostId>() {
                push(PostReference::from_id(post_id));
            }
        }
    } else {
        for m in URL_REGEX.find_iter(text) {
            let raw = normalize_url(m.as_str());
            if let Some(reference) = parse_post_url(&raw) {
                push(reference);
            }
        }
    }

    refs.truncate(limit);
    refs
}

/// `users/<id>` links. The word "zip" anywhere in the text asks for archives.
pub fn extract_user_refs(text: &str, limit: usize) -> Vec<UserReference> {
    let as_archive = ARCHIVE_WORD_REGEX.is_match(text);
    let mut refs: Vec<UserReference> = Vec::new();
    for m in URL_REGEX.find_iter(text) {
        let raw = normalize_url(m.as_str());
        if let Some(user_id) = parse_user_url(&raw) {
            if !refs.iter().any(|r| r.user_id == user_id) {
                refs.push(UserReference {
                    user_id,
                    as_archive,
                });
            }
        }
    }
    refs.truncate(limit);
    refs
}

fn parse_user_url(raw: &str) -> Option<UserId> {
    let url = pixiv_url(raw)?;
    let segments = path_segments(&url);
    match segments.as_slice() {
        [kind, id, ..] if kind.eq_ignore_ascii_case("users") => id.parse::<UserId>().ok(),
        [script] if script.eq_ignore_ascii_case("member.php") => url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .and_then(|(_, value)| value.parse::<UserId>().ok()),
        _ => None,
    }
}

fn pixiv_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if host != "pixiv.net" && host != "www.pixiv.net" {
        return None;
    }
    Some(url)
}

fn path_segments(url: &Url) -> Vec<String> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let segments = match segments.as_slice() {
        [lang, rest @ ..] if is_language_segment(lang) => rest,
        all => all,
    };
    segments.iter().map(|seg| seg.to_string()).collect()
}

pub fn parse_post_url(raw: &str) -> Option<PostReference> {
    let url = pixiv_url(raw)?;
    let segments = path_segments(&url);

    let post_id = match segments.as_slice() {
        [kind, id] if kind.eq_ignore_ascii_case("artworks") || kind.eq_ignore_ascii_case("i") => {
            id.parse::<PostId>().ok()?
        }
        [script] if script.eq_ignore_ascii_case("member_illust.php") => url
            .query_pairs()
            .find(|(key, _)| key == "illust_id")
            .and_then(|(_, value)| value.parse::<PostId>().ok())?,
        _ => return None,
    };

    Some(PostReference {
        post_id,
        page: page_selector(&url),
        source_url: Some(raw.to_string()),
    })
}

fn is_language_segment(segment: &str) -> bool {
    segment.len() == 2 && segment.chars().all(|c| c.is_ascii_alphabetic())
}

fn page_selector(url: &Url) -> Option<u32> {
    let from_fragment = url
        .fragment()
        .and_then(|fragment| fragment.parse::<u32>().ok());
    let from_query = || {
        url.query_pairs()
            .find(|(key, _)| key == "p")
            .and_then(|(_, value)| value.parse::<u32>().ok())
    };
    from_fragment.or_else(from_query).filter(|page| *page > 0)
}

fn normalize_url(raw: &str) -> String {
    let mut cleaned = raw.trim_end_matches(char::is_whitespace).to_string();
    while let Some(last) = cleaned.chars().last() {
        let should_trim = match last {
            ')' => !cleaned.contains('('),
            ']' => !cleaned.contains('['),
            '}' => !cleaned.contains('{'),
            '>' => !cleaned.contains('<'),
            '"' => count_char(&cleaned, '"') % 2 == 1,
            '\'' => count_char(&cleaned, '\'') % 2 == 1,
            ',' | '.' | '!' | '?' | ';' => true,
            _ => false,
        };
        if should_trim {
            cleaned.pop();
        } else {
            break;
        }
    }
    cleaned
}

fn count_char(value: &str, needle: char) -> usize {
    value.chars().filter(|ch| *ch == needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(text: &str) -> Vec<PostId> {
        extract_post_refs(text, 10)
            .into_iter()
            .map(|r| r.post_id)
            .collect()
    }

    #[test]
    fn finds_artwork_url_inside_text() {
        let refs = extract_post_refs("check this https://pixiv.net/artworks/12345", 10);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].post_id, 12345);
        assert_eq!(refs[0].page, None);
        assert_eq!(
            refs[0].source_url.as_deref(),
            Some("https://pixiv.net/artworks/12345")
        );
    }

    #[test]
    fn plain_text_is_not_applicable() {
        assert!(extract_post_refs("hello", 10).is_empty());
        assert!(extract_post_refs("see https://example.com/artworks/1", 10).is_empty());
        assert!(extract_post_refs("https://www.pixiv.net/users/42", 10).is_empty());
    }

    #[test]
    fn accepts_known_url_shapes() {
        assert_eq!(ids("https://www.pixiv.net/en/artworks/1"), vec![1]);
        assert_eq!(ids("HTTPS://WWW.PIXIV.NET/artworks/2"), vec![2]);
        assert_eq!(ids("http://pixiv.net/i/3"), vec![3]);
        assert_eq!(
            ids("https://www.pixiv.net/member_illust.php?mode=medium&illust_id=4"),
            vec![4]
        );
    }

    #[test]
    fn strips_trailing_punctuation() {
        let refs = extract_post_refs("(look: https://www.pixiv.net/artworks/77).", 10);
        assert_eq!(refs[0].post_id, 77);
        assert_eq!(
            refs[0].source_url.as_deref(),
            Some("https://www.pixiv.net/artworks/77")
        );
    }

    #[test]
    fn reads_page_selectors() {
        let refs = extract_post_refs(
            "https://www.pixiv.net/artworks/5#3 https://www.pixiv.net/artworks/6?p=2",
            10,
        );
        assert_eq!(refs[0].page, Some(3));
        assert_eq!(refs[1].page, Some(2));
    }

    #[test]
    fn bare_ids_are_split_on_whitespace() {
        assert_eq!(ids(" 111 222\n333 "), vec![111, 222, 333]);
        assert!(ids("111 and 222").is_empty());
    }

    #[test]
    fn user_links_are_found_separately() {
        let text = "all of https://www.pixiv.net/en/users/42 and https://pixiv.net/users/42/artworks";
        assert!(extract_post_refs(text, 10).is_empty());
        assert_eq!(
            extract_user_refs(text, 10),
            vec![UserReference {
                user_id: 42,
                as_archive: false,
            }]
        );
        assert_eq!(
            extract_user_refs("https://www.pixiv.net/member.php?id=7", 10)[0].user_id,
            7
        );
        assert!(extract_user_refs("https://www.pixiv.net/artworks/42", 10).is_empty());
    }

    #[test]
    fn zip_word_requests_archives() {
        let refs = extract_user_refs("https://www.pixiv.net/users/5 zip please", 10);
        assert!(refs[0].as_archive);
        let refs = extract_user_refs("https://www.pixiv.net/users/5 zipper", 10);
        assert!(!refs[0].as_archive);
    }

    #[test]
    fn duplicates_collapse_and_limit_applies() {
        assert_eq!(ids("1 2 1 3"), vec![1, 2, 3]);
        let refs = extract_post_refs("1 2 3 4", 2);
        assert_eq!(refs.len(), 2);
    }
}
