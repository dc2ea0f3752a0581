use std::{fs::File, io::BufReader, path::Path, sync::LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use super::model::{Post, PostId, Posts};

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("Failed to compile regex!"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http\S+|www\.\S+").expect("Failed to compile regex!"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^a-z0-9\s.,;!?'"-]"#).expect("Failed to compile regex!"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile regex!"));

/// A submission as it appears in a Reddit dump. Anything may be missing
/// or null.
#[derive(Debug, Default, Deserialize)]
struct RawPost {
    id: Option<String>,
    post_id: Option<String>,
    title: Option<String>,
    selftext: Option<String>,
}

impl From<RawPost> for Post {
    fn from(raw: RawPost) -> Self {
        let title = raw.title.unwrap_or_default();
        let selftext = raw.selftext.unwrap_or_default();
        let combined_text = combine(&title, &selftext);
        let cleaned_text = clean_text(&combined_text);
        Post {
            post_id: PostId::from(raw.id.or(raw.post_id).unwrap_or_default()),
            title,
            selftext,
            combined_text,
            cleaned_text,
        }
    }
}

/// Load a JSON array of Reddit submissions, preserving file order.
pub fn load_reddit_posts(path: &Path) -> Result<Posts> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let raw: Vec<RawPost> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    let posts: Posts = raw.into_iter().map(Post::from).collect();
    info!(path = %path.display(), posts = posts.len(), "loaded posts");
    Ok(posts)
}

/// Title and body on separate lines, trimmed.
pub fn combine(title: &str, selftext: &str) -> String {
    format!("{}\n{}", title.trim(), selftext.trim())
        .trim()
        .to_string()
}

/// Normalise text for embedding: lowercase, unwrap markdown links to their
/// text, strip URLs, blank out everything but letters, digits and basic
/// punctuation, and collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let text = text.to_lowercase();
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = URL.replace_all(&text, "");
    let text = DISALLOWED.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("Check [the docs](https://example.com/x) NOW!!  see www.foo.bar"),
            "check the docs now!! see"
        );
        assert_eq!(clean_text("C++ & Rust: 100% <3"), "c rust 100 3");
        assert_eq!(clean_text("line\n\nbreak\ttab"), "line break tab");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn test_clean_text_keeps_punctuation() {
        assert_eq!(
            clean_text(r#"It's "fine", isn't it? yes; no - maybe."#),
            r#"it's "fine", isn't it? yes; no - maybe."#
        );
    }

    #[test]
    fn test_combine() {
        assert_eq!(combine(" Title ", " body "), "Title\nbody");
        assert_eq!(combine("Only title", ""), "Only title");
        assert_eq!(combine("", "only body"), "only body");
    }

    #[test]
    fn test_load_reddit_posts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "a1", "title": "Cursor keeps crashing", "selftext": "Every [time](http://x.y) I open it", "score": 3}},
                {{"post_id": "b2", "title": null}},
                {{"title": "No id here", "selftext": "body"}}
            ]"#
        )
        .unwrap();

        let posts = load_reddit_posts(file.path()).unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].post_id, PostId::from("a1"));
        assert_eq!(posts[0].combined_text, "Cursor keeps crashing\nEvery [time](http://x.y) I open it");
        assert_eq!(posts[0].cleaned_text, "cursor keeps crashing every time i open it");
        assert_eq!(posts[1].post_id, PostId::from("b2"));
        assert_eq!(posts[1].title, "");
        assert_eq!(posts[1].cleaned_text, "");
        assert_eq!(posts[2].post_id, PostId::from(""));
    }

    #[test]
    fn test_load_reddit_posts_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(load_reddit_posts(file.path()).is_err());
    }
}
