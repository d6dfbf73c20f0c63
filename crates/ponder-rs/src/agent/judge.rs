//! Heuristic finality check for assistant turns.
//!
//! A model that writes `Final Answer:` has not necessarily finished. The
//! [`CompletionJudge`] only accepts the claim when the turn also shows the
//! three reasoning sections the reflection prompt asks for, each with real
//! content, and nothing in the text points at unfinished work. Patterns cover
//! English and Chinese phrasing.
//!
//! The judge is biased toward false negatives: rejecting a genuine answer
//! costs one more iteration, accepting a half-finished one ends the query.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// The literal the model must write to claim it is done.
pub const DEFAULT_FINALITY_MARKER: &str = "Final Answer:";

/// Number of trailing lines scanned for open questions and follow-up items.
pub const TAIL_LINES: usize = 5;

/// Letters or digits a section body needs to count as more than a heading.
const MIN_SECTION_BODY_CHARS: usize = 2;

// ── Patterns ──────────────────────────────────────────────────────

/// Optional heading decoration: markdown hashes, quotes, emphasis, bullets,
/// numbering.
const HEADING_PREFIX: &str = r"(?im)^[ \t#>*_\-•\d.)、（(]*";

static LEARNED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{HEADING_PREFIX}(?:what (?:have )?we(?:'ve)? (?:have )?learned|key findings|findings so far\
         |我们学到了什么|学到了什么|了解到了什么|已(?:经)?(?:获得|了解)的信息|关键发现)"
    ))
    .expect("learned section regex")
});

static NEED_MORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{HEADING_PREFIX}(?:do we need (?:any )?more (?:information|info|data)\
         |is (?:any )?more information needed|need for more information\
         |是否需要更多(?:的)?信息|需要更多信息吗|还需要更多信息吗)"
    ))
    .expect("need-more section regex")
});

static READY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{HEADING_PREFIX}(?:are we ready (?:for|to give) (?:a |the )?final answer\
         |ready for (?:a |the )?final answer|readiness for (?:a |the )?final answer\
         |是否准备好给出最终答案|准备好给出最终答案了吗|可以给出最终答案了吗)"
    ))
    .expect("ready section regex")
});

static NEEDS_MORE_PHRASING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\btodo\b|\bto-do\b|\bnext steps?\b|\bfollow-up (?:questions?|steps?|actions?)\b",
        r"|\b(?:still|further) needs? to\b|\bneeds? further\b",
        r"|\b(?:more|further) (?:research|investigation|analysis|searching) (?:is |are )?(?:needed|required)\b",
        r"|\blet me (?:check|search|look|verify|find)\b",
        r"|\bI(?: will|'ll) (?:now )?(?:check|search|look|verify|investigate)\b",
        r"|\bremains? (?:unclear|unknown|to be (?:seen|determined|verified))\b",
        r"|\bnot yet (?:clear|known|confirmed|verified)\b",
        r"|待办|下一步|接下来(?:需要|要|我们)|还需要(?:进一步)?(?:查|搜索|验证|确认|分析|调查)",
        r"|需要进一步|尚不清楚|有待(?:确认|验证)",
    ))
    .expect("needs-more phrasing regex")
});

static FOLLOW_UP_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(?:[-*•]|\d+[.)、])\s*(?:check|verify|search|look (?:up|into)|investigate|find",
        r"|explore|confirm|review|query|compare|analy[sz]e|examine|gather|fetch|retrieve",
        r"|查|检查|验证|搜索|查找|确认|调查|分析|探索|获取)",
    ))
    .expect("follow-up item regex")
});

static CONCLUSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:the )?(?:analysis|research|investigation|answer|conclusion) is (?:now )?complete\b",
        r"|\bin conclusion\b|\bto conclude\b",
        r"|\bno (?:more|further|additional) (?:information|research|searching|analysis|steps?|tool calls?) (?:is |are )?(?:needed|required|necessary)\b",
        r"|\bwe have (?:all|enough|sufficient) (?:the )?information\b",
        r"|\bfully answers?(?:ed)? the (?:query|question)\b",
        r"|综上所述|总之|结论(?:是|如下)|分析(?:已经?)?完成|无需(?:更多|进一步)|不需要(?:更多|进一步)",
        r"|已(?:经)?(?:获得|收集)(?:了)?(?:足够|充分)的信息",
    ))
    .expect("conclusion regex")
});

// ── Verdict ───────────────────────────────────────────────────────

/// The reasoning sections a final turn must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Learned,
    NeedMoreInfo,
    ReadyForFinal,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Learned, Section::NeedMoreInfo, Section::ReadyForFinal];

    /// The question the section answers, as the reflection prompt asks it.
    pub fn question(self) -> &'static str {
        match self {
            Section::Learned => "What have we learned?",
            Section::NeedMoreInfo => "Do we need more information?",
            Section::ReadyForFinal => "Are we ready for a Final Answer?",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Section::Learned => &LEARNED_RE,
            Section::NeedMoreInfo => &NEED_MORE_RE,
            Section::ReadyForFinal => &READY_RE,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.question())
    }
}

/// Outcome of judging one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Whether the finality marker appears at all.
    pub marker_present: bool,
    /// Sections without a heading or with an empty body.
    pub missing_sections: Vec<Section>,
    /// Evidence of unfinished work, in the order found.
    pub pending_signals: Vec<String>,
    /// Whether explicit conclusion phrasing was found.
    pub has_conclusion: bool,
}

impl Verdict {
    /// The turn may end the loop.
    pub fn is_accepted(&self) -> bool {
        self.marker_present
            && self.missing_sections.is_empty()
            && (self.pending_signals.is_empty() || self.has_conclusion)
    }

    /// The model claimed to be done but the claim does not hold up.
    pub fn is_premature(&self) -> bool {
        self.marker_present && !self.is_accepted()
    }
}

// ── CompletionJudge ───────────────────────────────────────────────

/// Decides whether an assistant turn genuinely finishes the query.
#[derive(Debug, Clone)]
pub struct CompletionJudge {
    marker: String,
}

impl Default for CompletionJudge {
    fn default() -> Self {
        Self::new(DEFAULT_FINALITY_MARKER)
    }
}

impl CompletionJudge {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether the text claims finality at all.
    pub fn has_marker(&self, text: &str) -> bool {
        !self.marker.is_empty() && text.contains(&self.marker)
    }

    /// Shorthand for `evaluate(text).is_accepted()`.
    pub fn is_final(&self, text: &str) -> bool {
        self.evaluate(text).is_accepted()
    }

    /// Run every check and report what passed. Without the marker nothing
    /// else is analyzed.
    pub fn evaluate(&self, text: &str) -> Verdict {
        if !self.has_marker(text) {
            return Verdict::default();
        }

        let missing_sections = Section::ALL
            .into_iter()
            .filter(|section| !self.section_present(text, *section))
            .collect();

        Verdict {
            marker_present: true,
            missing_sections,
            pending_signals: pending_signals(text),
            has_conclusion: CONCLUSION_RE.is_match(text),
        }
    }

    /// A heading for `section` exists and the text after it, up to the next
    /// heading or the marker, has content.
    fn section_present(&self, text: &str, section: Section) -> bool {
        let boundaries = heading_starts(text);
        section.pattern().find_iter(text).any(|heading| {
            let next_heading = boundaries
                .iter()
                .copied()
                .find(|&start| start >= heading.end())
                .unwrap_or(text.len());
            let next_marker = text
                .get(heading.end()..)
                .and_then(|rest| rest.find(&self.marker))
                .map_or(text.len(), |offset| heading.end() + offset);
            let body = text
                .get(heading.end()..next_heading.min(next_marker))
                .unwrap_or_default();
            is_substantive(body)
        })
    }
}

fn heading_starts(text: &str) -> Vec<usize> {
    let mut starts: Vec<usize> = Section::ALL
        .into_iter()
        .flat_map(|section| section.pattern().find_iter(text).map(|m| m.start()))
        .collect();
    starts.sort_unstable();
    starts
}

/// The part of a line that is not a section heading. Inline answers such
/// as `**Do we need more information?** Yes, ...` keep their answer.
fn strip_heading(line: &str) -> &str {
    let rest = Section::ALL
        .into_iter()
        .find_map(|section| section.pattern().find(line))
        .map_or(line, |heading| line.get(heading.end()..).unwrap_or_default());
    rest.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '?' | '？' | ':' | '：' | '*' | '_' | '#')
    })
    .trim_end()
}

fn is_substantive(body: &str) -> bool {
    let body = body.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '?' | '？' | ':' | '：' | '*' | '_' | '#')
    });
    body.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_SECTION_BODY_CHARS
}

/// Collect signs of unfinished work. Open questions and follow-up items only
/// count near the end of the text; explicit phrasing counts anywhere. Section
/// headings themselves are ignored, the answers written after them are not.
fn pending_signals(text: &str) -> Vec<String> {
    let mut signals = Vec::new();

    let content_lines: Vec<&str> = text
        .lines()
        .map(strip_heading)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    for line in &content_lines {
        if let Some(m) = NEEDS_MORE_PHRASING_RE.find(line) {
            signals.push(format!("unresolved phrasing \"{}\"", m.as_str()));
        }
    }

    let tail_start = content_lines.len().saturating_sub(TAIL_LINES);
    for line in &content_lines[tail_start..] {
        if line.ends_with('?') || line.ends_with('？') {
            signals.push(format!("open question \"{line}\""));
        } else if FOLLOW_UP_ITEM_RE.is_match(line) {
            signals.push(format!("follow-up item \"{line}\""));
        }
    }

    signals
}
