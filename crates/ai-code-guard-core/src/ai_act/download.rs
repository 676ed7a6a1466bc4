use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{info, instrument};

/// Official English PDF of Regulation (EU) 2024/1689.
pub const AI_ACT_URL: &str =
    "https://eur-lex.europa.eu/legal-content/EN/TXT/PDF/?uri=CELEX:32024R1689";

/// Fetch the regulation PDF from `url`, extract its text and write it to `output`.
#[instrument(skip(http))]
pub async fn download_ai_act(http: &Client, url: &str, output: &Path) -> Result<()> {
    info!("downloading EU AI Act");
    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to request {url}"))?
        .error_for_status()
        .with_context(|| format!("EUR-Lex returned an error for {url}"))?;
    let bytes = response
        .bytes()
        .await
        .context("failed to read EU AI Act PDF body")?
        .to_vec();
    info!(bytes = bytes.len(), "downloaded EU AI Act PDF");

    let text = tokio::task::spawn_blocking(move || pdf_to_text(&bytes))
        .await
        .context("PDF extraction task panicked")??;
    write_text(output, &text)?;
    info!(path = %output.display(), chars = text.len(), "saved EU AI Act text");
    Ok(())
}

pub(crate) fn write_text(output: &Path, text: &str) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, text).with_context(|| format!("failed to write {}", output.display()))
}

#[cfg(feature = "pdf")]
fn pdf_to_text(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| anyhow::anyhow!("failed to extract text from PDF: {err}"))?;
    // Form feeds mark page breaks; keep pages separated by blank lines.
    Ok(text
        .split('\x0c')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[cfg(not(feature = "pdf"))]
fn pdf_to_text(_bytes: &[u8]) -> Result<String> {
    anyhow::bail!(
        "this build has no PDF support; rebuild with the `pdf` feature or place the text at the configured path"
    )
}
