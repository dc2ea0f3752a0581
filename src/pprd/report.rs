use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{Context, Result, bail};
use pulldown_cmark::{Options, Parser, html};
use regex::Regex;
use serde::Serialize;
use tera::Tera;
use tracing::{info, warn};

use super::{
    model::{ClusterLabel, PainPointSummaries, PainPointSummary},
    summarize::LanguageModel,
};

pub const PRD_MARKDOWN_FILE: &str = "prd_draft.md";
pub const PRD_HTML_FILE: &str = "prd_draft.html";
const DEFAULT_TITLE: &str = "Product Requirements Document";

static TITLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*\*PRD Draft:\s*(.+?)\*\*\s*$").expect("Failed to compile regex!")
});

const PRD_PROMPT_NAME: &str = "prd_prompt.txt";
const PRD_PROMPT: &str = r#"You are a senior Product Manager AI assistant at PersonaPRD, an AI-powered product discovery platform.

Your task is to generate a structured Product Requirements Document (PRD) draft based on the following pain point summaries collected from user community data.

**Persona:** {{ persona_name }}

**Pain Points:**
{% for p in pain_points -%}
- {{ p.summary_text }}
{% endfor %}
**Instructions:**

Write a PRD draft that includes the following 6 items in this exact order:

1. A **single bold title line** like:
   **PRD Draft: [short, product-focused name for the solution]**

2. **Problem Summary:** A clear summary of the problem(s) these pain points represent. Use simple, direct language.

3. **Why This Problem Matters:** Explain why this problem is significant specifically for the **{{ persona_name }}** persona. Highlight the impact on productivity, workflows, or business goals.

4. **Potential Solution Overview:** Provide a concise solution concept that addresses these pain points.

5. **Suggested MVP Features:** List 3-5 minimum viable product features as bullet points, phrased as actionable features.

6. **Next Steps:** Outline immediate steps the team should take to validate and build this solution.

**Strict output rules:**
- Do NOT include any metadata like dates, authors, product IDs, or document codes.
- Do NOT add extra sections beyond the 6 listed above.
- Do NOT mention that this is AI-generated.

PRD Draft:
"#;

const REPORT_TEMPLATE_NAME: &str = "prd_report.md";
const REPORT_TEMPLATE: &str = r#"# {{ doc.title }}

| | |
|---|---|
| Persona | {{ doc.persona_name }} |
| Dataset | {{ doc.dataset }} |
| Clusters | {% for l in display_ids %}{{ l }}{% if not loop.last %}, {% endif %}{% endfor %} |
| Posts covered | {{ doc.num_posts }} |

{{ doc.body }}

## Source pain points
{% for p in doc.pain_points %}
### Cluster {{ p.cluster_label + 1 }} ({{ p.num_posts }} posts)

{{ p.summary_text }}
{% endfor %}"#;

/// Parse a comma-separated list of 1-based cluster numbers as typed by a
/// user. Non-numeric and out-of-range entries are dropped, duplicates keep
/// their first position.
pub fn parse_cluster_selection(input: &str, k: usize) -> Vec<ClusterLabel> {
    let mut selected: Vec<ClusterLabel> = Vec::new();
    for label in input
        .split(',')
        .filter_map(|s| s.trim().parse::<usize>().ok())
        .filter(|id| (1..=k).contains(id))
        .filter_map(ClusterLabel::from_display_id)
    {
        if !selected.contains(&label) {
            selected.push(label);
        }
    }
    selected
}

/// A drafted PRD plus the provenance needed to render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrdDocument {
    pub title: String,
    pub persona_name: String,
    pub dataset: String,
    pub selected_clusters: Vec<ClusterLabel>,
    pub num_posts: usize,
    pub pain_points: Vec<PainPointSummary>,
    /// LLM output with the title line removed.
    pub body: String,
}

/// Drafts PRD text from selected pain points through a [`LanguageModel`].
pub struct PrdGenerator<'a, L: LanguageModel + ?Sized> {
    llm: &'a L,
    templates: Tera,
}

impl<'a, L: LanguageModel + ?Sized> PrdGenerator<'a, L> {
    pub fn new(llm: &'a L) -> Result<Self> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(PRD_PROMPT_NAME, PRD_PROMPT)
            .context("compiling PRD prompt")?;
        Ok(Self { llm, templates })
    }

    pub fn prompt(&self, persona_name: &str, pain_points: &[PainPointSummary]) -> Result<String> {
        let mut ctx = tera::Context::new();
        ctx.insert("persona_name", persona_name);
        ctx.insert("pain_points", pain_points);
        self.templates
            .render(PRD_PROMPT_NAME, &ctx)
            .context("rendering PRD prompt")
    }

    pub fn generate(
        &self,
        persona_name: &str,
        dataset: &str,
        summaries: &PainPointSummaries,
        selection: &[ClusterLabel],
    ) -> Result<PrdDocument> {
        let pain_points: Vec<PainPointSummary> = selection
            .iter()
            .filter_map(|l| summaries.get(*l))
            .filter(|s| s.num_posts > 0)
            .cloned()
            .collect();
        if pain_points.is_empty() {
            bail!("no populated clusters selected");
        }

        info!(
            persona = persona_name,
            clusters = pain_points.len(),
            "drafting PRD"
        );
        let text = self
            .llm
            .complete(&self.prompt(persona_name, &pain_points)?)
            .context("drafting PRD")?;
        let (title, body) = split_title(&text);

        Ok(PrdDocument {
            title,
            persona_name: persona_name.to_string(),
            dataset: dataset.to_string(),
            selected_clusters: pain_points.iter().map(|p| p.cluster_label).collect(),
            num_posts: pain_points.iter().map(|p| p.num_posts).sum(),
            pain_points,
            body,
        })
    }
}

/// Pull the `**PRD Draft: ...**` line out of the LLM text, if present.
fn split_title(text: &str) -> (String, String) {
    let mut title = None;
    let mut body = Vec::new();
    for line in text.lines() {
        if title.is_none() {
            if let Some(c) = TITLE_LINE.captures(line) {
                title = Some(c[1].trim().to_string());
                continue;
            }
        }
        body.push(line);
    }
    if title.is_none() {
        warn!("PRD draft has no title line");
    }
    (
        title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        body.join("\n").trim().to_string(),
    )
}

/// Writes a [`PrdDocument`] somewhere persistent.
pub trait DocumentAssembler {
    /// Returns the paths written.
    fn assemble(&self, doc: &PrdDocument, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Markdown report plus an HTML rendering of the same text.
pub struct MarkdownAssembler {
    templates: Tera,
}

impl MarkdownAssembler {
    pub fn new() -> Result<Self> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(REPORT_TEMPLATE_NAME, REPORT_TEMPLATE)
            .context("compiling report template")?;
        Ok(Self { templates })
    }

    pub fn render_markdown(&self, doc: &PrdDocument) -> Result<String> {
        let mut ctx = tera::Context::new();
        ctx.insert("doc", doc);
        ctx.insert(
            "display_ids",
            &doc.selected_clusters
                .iter()
                .map(ClusterLabel::display_id)
                .collect::<Vec<_>>(),
        );
        self.templates
            .render(REPORT_TEMPLATE_NAME, &ctx)
            .context("rendering report")
    }
}

/// Render markdown to a standalone HTML page.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES);
    let mut body = String::new();
    html::push_html(&mut body, parser);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>PRD Draft</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        body
    )
}

impl DocumentAssembler for MarkdownAssembler {
    fn assemble(&self, doc: &PrdDocument, output_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir)?;
        let markdown = self.render_markdown(doc)?;

        let md_path = output_dir.join(PRD_MARKDOWN_FILE);
        fs::write(&md_path, &markdown).with_context(|| format!("writing {}", md_path.display()))?;
        let html_path = output_dir.join(PRD_HTML_FILE);
        fs::write(&html_path, markdown_to_html(&markdown))
            .with_context(|| format!("writing {}", html_path.display()))?;

        info!(markdown = %md_path.display(), html = %html_path.display(), "saved PRD");
        Ok(vec![md_path, html_path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pprd::summarize::tests::FakeLlm;

    fn labels(raw: &[usize]) -> Vec<ClusterLabel> {
        raw.iter().map(|l| ClusterLabel::from(*l)).collect()
    }

    fn summaries() -> PainPointSummaries {
        vec![
            PainPointSummary {
                cluster_label: ClusterLabel::from(0),
                num_posts: 4,
                summary_text: "Builds are slow.".into(),
            },
            PainPointSummary {
                cluster_label: ClusterLabel::from(1),
                num_posts: 0,
                summary_text: "No posts in this cluster.".into(),
            },
            PainPointSummary {
                cluster_label: ClusterLabel::from(2),
                num_posts: 3,
                summary_text: "Docs are stale.".into(),
            },
        ]
        .into()
    }

    struct CannedLlm(&'static str);

    impl LanguageModel for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_parse_cluster_selection() {
        assert_eq!(parse_cluster_selection("1,3,5,10", 10), labels(&[0, 2, 4, 9]));
        assert_eq!(parse_cluster_selection(" 2 , x, 0, 11, 2,1", 10), labels(&[1, 0]));
        assert!(parse_cluster_selection("", 10).is_empty());
    }

    #[test]
    fn test_split_title() {
        let (title, body) = split_title("**PRD Draft: Faster CI**\n\n**Problem Summary:** slow");
        assert_eq!(title, "Faster CI");
        assert_eq!(body, "**Problem Summary:** slow");

        let (title, body) = split_title("just text");
        assert_eq!(title, DEFAULT_TITLE);
        assert_eq!(body, "just text");
    }

    #[test]
    fn test_generate_uses_selected_populated_clusters() {
        let llm = FakeLlm::default();
        let generator = PrdGenerator::new(&llm).unwrap();
        let doc = generator
            .generate("Vibe Coders", "reddit_cursor_hot_500", &summaries(), &labels(&[2, 1, 0]))
            .unwrap();

        assert_eq!(doc.selected_clusters, labels(&[2, 0]));
        assert_eq!(doc.num_posts, 7);
        let prompts = llm.prompts.borrow();
        assert!(prompts[0].contains("**Persona:** Vibe Coders"));
        assert!(prompts[0].contains("- Docs are stale.\n- Builds are slow.\n"));
        assert!(!prompts[0].contains("No posts in this cluster."));
    }

    #[test]
    fn test_generate_rejects_empty_selection() {
        let llm = FakeLlm::default();
        let generator = PrdGenerator::new(&llm).unwrap();
        assert!(generator.generate("p", "d", &summaries(), &labels(&[1])).is_err());
        assert!(llm.prompts.borrow().is_empty());
    }

    #[test]
    fn test_assemble_writes_markdown_and_html() {
        let llm = CannedLlm("**PRD Draft: Faster CI**\n\n**Problem Summary:** builds are slow.");
        let doc = PrdGenerator::new(&llm)
            .unwrap()
            .generate("Data Professionals", "reddit_dataengineering", &summaries(), &labels(&[0, 2]))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let written = MarkdownAssembler::new().unwrap().assemble(&doc, dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let md = fs::read_to_string(dir.path().join(PRD_MARKDOWN_FILE)).unwrap();
        assert!(md.starts_with("# Faster CI\n"));
        assert!(md.contains("| Clusters | 1, 3 |"));
        assert!(md.contains("### Cluster 3 (3 posts)"));

        let html = fs::read_to_string(dir.path().join(PRD_HTML_FILE)).unwrap();
        assert!(html.contains("<h1>Faster CI</h1>"));
        assert!(html.contains("<table>"));
    }
}
