use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::ai_act::{AiActHandler, ScoredSection};
use crate::analysis::RepositoryAnalysis;
use crate::llm::{ChatModel, ChatRequest};

/// Sections retrieved from the regulation per assessment.
pub const DEFAULT_SECTIONS: usize = 5;

const SYSTEM_PROMPT: &str = "You are a technical compliance expert specializing in AI regulations, particularly the EU AI Act.";

fn compliance_prompt(repo_description: &str, sections: &str) -> String {
    format!(
        "Analyze the technical description of a software repository and identify which \
         sections of the EU AI Act are relevant and may apply to it.\n\n\
         Technical description of the repository:\n\n{repo_description}\n\n\
         Relevant sections from the EU AI Act:\n\n{sections}\n\n\
         Based on the description and the sections provided:\n\
         1. Identify whether the repository implements AI systems as defined by the EU AI Act\n\
         2. Determine if any AI capabilities fall under prohibited practices (Article 5)\n\
         3. Assess if the AI system would be classified as high-risk (Article 6)\n\
         4. Identify specific requirements that would apply to the system\n\
         5. Recommend compliance measures that should be implemented\n\n\
         Format your response as a structured compliance analysis with these sections:\n\
         1. AI System Classification\n\
         2. Applicable EU AI Act Sections\n\
         3. Compliance Requirements\n\
         4. Recommended Actions\n\n\
         Cite the relevant sections of the EU AI Act and connect them directly to the \
         technical features of the repository. In the classification section state one of: \
         prohibited, high-risk, limited-risk, minimal-risk, or not an AI system."
    )
}

/// Risk tier stated by the compliance analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Prohibited,
    HighRisk,
    LimitedRisk,
    MinimalRisk,
    NotAiSystem,
    Unknown,
}

static RISK_PATTERNS: Lazy<Vec<(RiskClass, Regex)>> = Lazy::new(|| {
    [
        (RiskClass::Prohibited, r"prohibited"),
        (RiskClass::HighRisk, r"high[\s-]+risk"),
        (RiskClass::LimitedRisk, r"limited[\s-]+risk"),
        (RiskClass::MinimalRisk, r"minimal(?:[\s-]+or[\s-]+no)?[\s-]+risk"),
        (RiskClass::NotAiSystem, r"not\s+(?:an?\s+)?ai[\s-]+system"),
    ]
    .into_iter()
    .filter_map(|(class, pattern)| Regex::new(pattern).ok().map(|re| (class, re)))
    .collect()
});

static NEGATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(?:not|no|non|neither|nor|isn't|doesn't|does not)\b").ok());

/// Negators that follow a tier within its clause, e.g. `prohibited practices: not applicable`.
static TRAILING_NEGATION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r":\s*(?:no|none|n/a)\b|\bnot\s+(?:applicable|relevant)\b|\b(?:do|does|did)\s+not\s+apply\b|\b(?:don't|doesn't)\s+apply\b",
    )
    .ok()
});

/// Clause boundaries looking back from a match. A colon ends the clause.
static LEADING_BREAK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[.\n;:,]|\b(?:but|however|whereas|although)\b").ok());

/// Clause boundaries looking ahead from a match. A colon stays inside the clause.
static TRAILING_BREAK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[.\n;,]|\b(?:but|however|whereas|although)\b").ok());

impl RiskClass {
    /// Read the classification out of a compliance analysis.
    ///
    /// Only the "AI System Classification" section is inspected when present. Mentions
    /// negated within their own clause (split on punctuation and contrast words) are ignored.
    pub fn detect(analysis: &str) -> Self {
        let lowered = analysis.to_ascii_lowercase();
        let section = classification_section(&lowered);
        for (class, pattern) in RISK_PATTERNS.iter() {
            for found in pattern.find_iter(section) {
                if *class == RiskClass::NotAiSystem
                    || !negated(section, found.start(), found.end())
                {
                    return *class;
                }
            }
        }
        RiskClass::Unknown
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Prohibited => "Prohibited",
            Self::HighRisk => "High-risk",
            Self::LimitedRisk => "Limited-risk",
            Self::MinimalRisk => "Minimal-risk",
            Self::NotAiSystem => "Not an AI system",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn classification_section(lowered: &str) -> &str {
    let Some(start) = lowered.find("ai system classification") else {
        return lowered;
    };
    let body_start = start + "ai system classification".len();
    let rest = &lowered[body_start..];
    let end = ["applicable eu ai act sections", "compliance requirements", "recommended actions"]
        .iter()
        .filter_map(|heading| rest.find(heading))
        .min()
        .unwrap_or(rest.len());
    &rest[..end]
}

/// A tier mention is negated when its own clause carries a negator before or after it.
fn negated(section: &str, start: usize, end: usize) -> bool {
    let before = &section[..start];
    let clause_start = LEADING_BREAK
        .as_ref()
        .and_then(|re| re.find_iter(before).last())
        .map(|m| m.end())
        .unwrap_or(0);
    let after = &section[end..];
    let clause_end = TRAILING_BREAK
        .as_ref()
        .and_then(|re| re.find(after))
        .map(|m| m.start())
        .unwrap_or(after.len());

    NEGATION
        .as_ref()
        .is_some_and(|re| re.is_match(&before[clause_start..]))
        || TRAILING_NEGATION
            .as_ref()
            .is_some_and(|re| re.is_match(&after[..clause_end]))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAnalysis {
    pub classification: RiskClass,
    pub analysis: String,
    pub relevant_sections: Vec<ScoredSection>,
}

/// Maps a repository description onto the regulation.
pub struct ComplianceAnalyzer {
    model: Arc<dyn ChatModel>,
    act: Arc<AiActHandler>,
    sections: usize,
}

impl ComplianceAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>, act: Arc<AiActHandler>) -> Self {
        Self {
            model,
            act,
            sections: DEFAULT_SECTIONS,
        }
    }

    pub fn with_sections(mut self, sections: usize) -> Self {
        self.sections = sections.max(1);
        self
    }

    #[instrument(skip_all)]
    pub async fn analyze(&self, repo_analysis: &RepositoryAnalysis) -> Result<ComplianceAnalysis> {
        let description = repo_analysis.repository_summary.as_str();
        let relevant_sections = self
            .act
            .search_relevant_sections(description, self.sections)
            .await
            .context("failed to retrieve EU AI Act sections")?;
        debug!(sections = relevant_sections.len(), "retrieved relevant sections");

        let formatted = format_sections(&relevant_sections);
        let request = ChatRequest::new(SYSTEM_PROMPT, compliance_prompt(description, &formatted));
        let analysis = self
            .model
            .complete(&request)
            .await
            .context("model call failed for compliance analysis")?;
        let classification = RiskClass::detect(&analysis);
        info!(%classification, "compliance analysis finished");

        Ok(ComplianceAnalysis {
            classification,
            analysis,
            relevant_sections,
        })
    }
}

/// `Section: <text>\nSource: <source>` blocks separated by blank lines.
pub fn format_sections(sections: &[ScoredSection]) -> String {
    sections
        .iter()
        .map(|section| {
            format!(
                "Section: {}\nSource: {}",
                section.chunk.text, section.chunk.source
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
