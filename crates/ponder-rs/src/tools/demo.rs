//! A built-in `search_papers` tool over a small canned catalog.
//!
//! Used by `--mock` runs and tests so the whole loop can run without a tool
//! server or network.

use crate::tools::core::FnTool;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default number of papers returned when `limit` is omitted.
pub const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Typed arguments for `search_papers`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SearchPapersArgs {
    /// Topic or keywords to search for (e.g. 'machine learning').
    pub query: String,
    /// Only return papers published in this year.
    #[serde(default)]
    pub year: Option<u32>,
    /// Maximum number of papers to return (default 5).
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Paper {
    pub title: &'static str,
    pub authors: &'static str,
    pub year: u32,
    pub venue: &'static str,
    pub citations: u32,
    #[serde(skip)]
    topics: &'static [&'static str],
}

const CATALOG: &[Paper] = &[
    Paper {
        title: "Language Models are Few-Shot Learners",
        authors: "Brown et al.",
        year: 2020,
        venue: "NeurIPS",
        citations: 30_000,
        topics: &["machine learning", "language models", "gpt-3", "nlp"],
    },
    Paper {
        title: "An Image is Worth 16x16 Words: Transformers for Image Recognition at Scale",
        authors: "Dosovitskiy et al.",
        year: 2020,
        venue: "ICLR 2021",
        citations: 40_000,
        topics: &["machine learning", "computer vision", "vit", "transformers"],
    },
    Paper {
        title: "Denoising Diffusion Probabilistic Models",
        authors: "Ho, Jain, Abbeel",
        year: 2020,
        venue: "NeurIPS",
        citations: 15_000,
        topics: &["machine learning", "generative models", "ddpm", "diffusion"],
    },
    Paper {
        title: "Scaling Laws for Neural Language Models",
        authors: "Kaplan et al.",
        year: 2020,
        venue: "arXiv",
        citations: 3_000,
        topics: &["machine learning", "language models", "scaling"],
    },
    Paper {
        title: "BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding",
        authors: "Devlin et al.",
        year: 2019,
        venue: "NAACL",
        citations: 90_000,
        topics: &["machine learning", "nlp", "transformers"],
    },
    Paper {
        title: "Attention Is All You Need",
        authors: "Vaswani et al.",
        year: 2017,
        venue: "NeurIPS",
        citations: 120_000,
        topics: &["machine learning", "nlp", "transformers", "attention"],
    },
    Paper {
        title: "Highly accurate protein structure prediction with AlphaFold",
        authors: "Jumper et al.",
        year: 2021,
        venue: "Nature",
        citations: 25_000,
        topics: &["machine learning", "biology", "protein folding"],
    },
];

/// Words that say nothing about the topic.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "at", "by", "find", "for", "from", "in", "is", "of", "on", "or",
    "paper", "papers", "research", "the", "to", "with",
];

/// Common abbreviations and the topic they stand for.
const ALIASES: &[(&str, &str)] = &[
    ("ml", "machine learning"),
    ("ai", "machine learning"),
    ("cv", "computer vision"),
    ("llm", "language models"),
    ("llms", "language models"),
];

/// Lowercased topic keywords of a free-text query, with aliases expanded.
fn keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .map(|w| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == w)
                .map_or(w, |(_, topic)| (*topic).to_string())
        })
        .collect()
}

impl Paper {
    /// Any keyword hits the title or a topic. A query without keywords
    /// matches everything.
    fn matches(&self, keywords: &[String]) -> bool {
        let title = self.title.to_lowercase();
        keywords.is_empty()
            || keywords
                .iter()
                .any(|k| title.contains(k.as_str()) || self.topics.iter().any(|t| t.contains(k.as_str())))
    }
}

/// Papers matching the arguments, in catalog order.
pub fn search_papers(args: &SearchPapersArgs) -> Vec<Paper> {
    let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;
    let keywords = keywords(&args.query);
    CATALOG
        .iter()
        .filter(|p| args.year.is_none_or(|y| p.year == y))
        .filter(|p| p.matches(&keywords))
        .take(limit)
        .cloned()
        .collect()
}

/// The `search_papers` tool. Returns a pretty-printed JSON array.
pub fn search_papers_tool() -> FnTool {
    FnTool::new(
        ToolDef::new(
            "search_papers",
            "Search a catalog of research papers by topic, optionally filtered by \
             publication year. Returns title, authors, year, venue and citation count.",
            json_schema_for::<SearchPapersArgs>(),
        ),
        |args: SearchPapersArgs| async move {
            let papers = search_papers(&args);
            serde_json::to_string_pretty(&papers).map_err(|e| e.to_string())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{Tool, ToolSet};
    use serde_json::json;

    fn args(query: &str, year: Option<u32>, limit: Option<u32>) -> SearchPapersArgs {
        SearchPapersArgs {
            query: query.into(),
            year,
            limit,
        }
    }

    #[test]
    fn demo_query_returns_three_2020_papers() {
        let papers = search_papers(&args("machine learning", Some(2020), Some(3)));
        let titles: Vec<_> = papers.iter().map(|p| p.title).collect();
        assert_eq!(titles.len(), 3);
        assert!(titles[0].contains("Few-Shot"));
        assert!(titles[1].contains("16x16"));
        assert!(titles[2].contains("Diffusion"));
    }

    #[test]
    fn filters_by_year_and_topic() {
        assert_eq!(search_papers(&args("protein", None, None)).len(), 1);
        assert!(search_papers(&args("protein", Some(2020), None)).is_empty());
        assert_eq!(search_papers(&args("", None, None)).len(), DEFAULT_SEARCH_LIMIT as usize);
    }

    #[test]
    fn abbreviated_query_finds_papers() {
        let papers = search_papers(&args("ML papers", Some(2020), Some(3)));
        assert_eq!(papers.len(), 3);
        assert!(papers[0].title.contains("Few-Shot"));

        let vision = search_papers(&args("CV papers from 2020", Some(2020), None));
        assert_eq!(vision.len(), 1);
        assert!(vision[0].title.contains("16x16"));
    }

    #[test]
    fn any_keyword_is_enough() {
        let papers = search_papers(&args("diffusion or protein folding", None, None));
        let titles: Vec<_> = papers.iter().map(|p| p.title).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles[0].contains("Diffusion"));
        assert!(titles[1].contains("AlphaFold"));
        assert!(search_papers(&args("quantum chemistry", None, None)).is_empty());
    }

    #[tokio::test]
    async fn tool_returns_json() {
        let tools = ToolSet::new().with(search_papers_tool());
        let outcome = tools
            .execute("search_papers", &json!({"query": "machine learning", "year": 2020, "limit": 3}))
            .await;
        assert!(!outcome.is_error());
        let papers: serde_json::Value = serde_json::from_str(&outcome.text_content()).unwrap();
        assert_eq!(papers.as_array().unwrap().len(), 3);
        assert_eq!(papers[0]["authors"], "Brown et al.");
    }

    #[test]
    fn schema_requires_query() {
        let def = search_papers_tool().definition();
        assert_eq!(def.function.parameters["required"], json!(["query"]));
    }
}
