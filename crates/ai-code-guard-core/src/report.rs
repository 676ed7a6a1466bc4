use std::fmt::Write;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ai_act::ScoredSection;
use crate::analysis::{AiContentScan, AnalyzedFile, CategoryScan, UsageReport};
use crate::compliance::RiskClass;
use crate::llm::truncate;
use crate::workflow::{Status, WorkflowState};

/// Characters of each retrieved section shown in human and markdown output.
const SECTION_PREVIEW_CHARS: usize = 400;

/// Format styles supported by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
    Markdown,
    Yaml,
}

/// A retrieved regulation passage as shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source: String,
    pub score: f32,
    pub text: String,
}

impl From<&ScoredSection> for ReportSection {
    fn from(section: &ScoredSection) -> Self {
        Self {
            article: section.chunk.article.clone(),
            title: section.chunk.title.clone(),
            source: section.chunk.source.clone(),
            score: section.score,
            text: section.chunk.text.clone(),
        }
    }
}

/// Serialisable outcome of a compliance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub repo_url: String,
    pub branch: String,
    pub status: Status,
    pub classification: RiskClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_summary: Option<String>,
    #[serde(default)]
    pub file_analyses: Vec<AnalyzedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_analysis: Option<String>,
    #[serde(default)]
    pub relevant_sections: Vec<ReportSection>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&WorkflowState> for ComplianceReport {
    fn from(state: &WorkflowState) -> Self {
        let compliance = state.compliance_analysis.as_ref();
        Self {
            repo_url: state.repo_url.clone(),
            branch: state.branch.clone(),
            status: state.status,
            classification: compliance
                .map(|c| c.classification)
                .unwrap_or(RiskClass::Unknown),
            repository_summary: state
                .repo_analysis
                .as_ref()
                .map(|a| a.repository_summary.clone()),
            file_analyses: state
                .repo_analysis
                .as_ref()
                .map(|a| a.file_analyses.clone())
                .unwrap_or_default(),
            compliance_analysis: compliance.map(|c| c.analysis.clone()),
            relevant_sections: compliance
                .map(|c| c.relevant_sections.iter().map(ReportSection::from).collect())
                .unwrap_or_default(),
            messages: state.messages.iter().map(|m| m.content.clone()).collect(),
            error: (!state.error.is_empty()).then(|| state.error.clone()),
        }
    }
}

impl ComplianceReport {
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Produce a report string from a `ComplianceReport` using the desired format.
pub fn render_report(report: &ComplianceReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Human => render_human(report),
        OutputFormat::Markdown => render_markdown(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(report)?),
    }
}

/// Render `report` and write it to `path`, creating parent directories.
pub fn save_report(report: &ComplianceReport, path: &Path, format: OutputFormat) -> Result<()> {
    let rendered = render_report(report, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write report to {}", path.display()))
}

fn section_label(idx: usize, section: &ReportSection) -> String {
    let mut label = format!("Section {}", idx + 1);
    if let Some(article) = &section.article {
        label.push_str(&format!(" (Article {})", truncate(article, 60)));
    }
    label
}

fn render_human(report: &ComplianceReport) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "Repository: {} (branch: {})", report.repo_url, report.branch)?;
    writeln!(out, "Status: {}", report.status)?;
    writeln!(out, "Classification: {}", report.classification)?;

    if let Some(error) = &report.error {
        writeln!(out, "\nError: {error}")?;
        return Ok(out);
    }

    if let Some(summary) = &report.repository_summary {
        writeln!(out, "\nRepository Summary:")?;
        writeln!(out, "{}", summary.trim())?;
    }

    if !report.file_analyses.is_empty() {
        writeln!(out, "\nFile Analyses:")?;
        for file in &report.file_analyses {
            writeln!(out, "  - {}", file.file_path)?;
            if !file.analysis.ai_capabilities.is_empty() {
                writeln!(
                    out,
                    "    Capabilities: {}",
                    file.analysis.ai_capabilities.join(", ")
                )?;
            }
            writeln!(out, "    Concerns: {}", single_line(&file.analysis.regulatory_concerns))?;
        }
    }

    if let Some(analysis) = &report.compliance_analysis {
        writeln!(out, "\nCompliance Analysis:")?;
        writeln!(out, "{}", analysis.trim())?;
    }

    if !report.relevant_sections.is_empty() {
        writeln!(out, "\nRelevant EU AI Act Sections:")?;
        for (idx, section) in report.relevant_sections.iter().enumerate() {
            writeln!(
                out,
                "  {} [score {:.2}]",
                section_label(idx, section),
                section.score
            )?;
            writeln!(
                out,
                "    {}",
                single_line(&truncate(section.text.trim(), SECTION_PREVIEW_CHARS))
            )?;
        }
    }

    Ok(out)
}

fn render_markdown(report: &ComplianceReport) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "# EU AI Act Compliance Report")?;
    writeln!(out)?;
    writeln!(out, "- **Repository:** {}", report.repo_url)?;
    writeln!(out, "- **Branch:** {}", report.branch)?;
    writeln!(out, "- **Status:** {}", report.status)?;
    writeln!(out, "- **Classification:** {}", report.classification)?;

    if let Some(error) = &report.error {
        writeln!(out, "\n## Error\n\n{error}")?;
        return Ok(out);
    }

    if let Some(summary) = &report.repository_summary {
        writeln!(out, "\n## Repository Analysis\n\n{}", summary.trim())?;
    }

    if !report.file_analyses.is_empty() {
        writeln!(out, "\n### File Analyses\n")?;
        writeln!(out, "| File | AI capabilities | Regulatory concerns |")?;
        writeln!(out, "| --- | --- | --- |")?;
        for file in &report.file_analyses {
            writeln!(
                out,
                "| `{}` | {} | {} |",
                file.file_path,
                table_cell(&file.analysis.ai_capabilities.join(", ")),
                table_cell(&file.analysis.regulatory_concerns)
            )?;
        }
    }

    if let Some(analysis) = &report.compliance_analysis {
        writeln!(out, "\n## Compliance Analysis\n\n{}", analysis.trim())?;
    }

    if !report.relevant_sections.is_empty() {
        writeln!(out, "\n## Relevant EU AI Act Sections")?;
        for (idx, section) in report.relevant_sections.iter().enumerate() {
            writeln!(out, "\n### {}\n", section_label(idx, section))?;
            for line in truncate(section.text.trim(), SECTION_PREVIEW_CHARS).lines() {
                writeln!(out, "> {line}")?;
            }
        }
    }

    Ok(out)
}

fn single_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}

fn table_cell(input: &str) -> String {
    let cell = single_line(input).replace('|', "\\|");
    if cell.trim().is_empty() {
        "-".to_string()
    } else {
        cell
    }
}

/// Render the result of an AI content scan.
pub fn render_ai_content_scan(scan: &AiContentScan, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(scan)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(scan)?),
        OutputFormat::Human | OutputFormat::Markdown => render_scan_human(scan),
    }
}

fn render_category(
    out: &mut String,
    heading: &str,
    with_content: &str,
    context_label: &str,
    category: &CategoryScan,
) -> Result<()> {
    writeln!(out, "\n{heading}:")?;
    writeln!(out, "{}", "-".repeat(30))?;
    writeln!(out, "Files Scanned: {}", category.files_scanned)?;
    writeln!(out, "{with_content}: {}", category.files_with_ai_content)?;
    for file in &category.ai_mentions {
        writeln!(out, "\nFile: {}", file.file_path)?;
        writeln!(out, "Summary: {}", file.summary)?;
        for mention in &file.ai_mentions {
            writeln!(out, "  - {}: {}", mention.kind, mention.mention)?;
            if !mention.context.is_empty() {
                writeln!(out, "    {context_label}: {}", mention.context)?;
            }
        }
    }
    Ok(())
}

fn render_scan_human(scan: &AiContentScan) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "AI Content Scan Results")?;
    writeln!(out, "{}", "=".repeat(50))?;
    render_category(
        &mut out,
        "Documentation Analysis",
        "Files with AI Content",
        "Context",
        &scan.documentation,
    )?;
    render_category(
        &mut out,
        "Dependency Analysis",
        "Files with AI Dependencies",
        "Purpose",
        &scan.dependencies,
    )?;
    writeln!(out, "\nOverall Summary:")?;
    writeln!(out, "{}", "-".repeat(30))?;
    writeln!(out, "Total Files Scanned: {}", scan.summary.total_files_scanned)?;
    writeln!(out, "Total Files with AI Content: {}", scan.summary.total_ai_files)?;
    if !scan.summary.unique_ai_technologies.is_empty() {
        writeln!(out, "\nUnique AI Technologies Found:")?;
        for tech in &scan.summary.unique_ai_technologies {
            writeln!(out, "- {tech}")?;
        }
    }
    Ok(out)
}

/// Render extracted AI use cases.
pub fn render_usage_report(report: &UsageReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(report)?),
        OutputFormat::Human | OutputFormat::Markdown => {
            let mut out = String::new();
            writeln!(out, "Codebase: {}", report.codebase)?;
            if let Some(error) = &report.error {
                writeln!(out, "Error: {error}")?;
            }
            if report.use_cases.is_empty() {
                writeln!(out, "No AI use cases identified.")?;
            }
            for (idx, case) in report.use_cases.iter().enumerate() {
                writeln!(
                    out,
                    "\n{}. {} (confidence {}/10)",
                    idx + 1,
                    case.name,
                    case.ai_confidence_score
                )?;
                writeln!(out, "   Functionality: {}", case.functionality)?;
                writeln!(out, "   Input: {}", case.input_data)?;
                writeln!(out, "   Output: {}", case.output_data)?;
                if !case.files_involved.is_empty() {
                    writeln!(out, "   Files: {}", case.files_involved.join(", "))?;
                }
            }
            Ok(out)
        }
    }
}
