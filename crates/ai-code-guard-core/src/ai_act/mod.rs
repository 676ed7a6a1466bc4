//! Retrieval over the text of the EU AI Act.
//!
//! The regulation is downloaded once as PDF, converted to text, split into chunks and
//! embedded into an [`ActIndex`] stored under the data directory. The stored index is
//! reused while both the embedding model and the corpus digest match.

mod download;
mod index;
mod splitter;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::llm::EmbeddingModel;
use crate::settings::GuardSettings;

pub use download::{download_ai_act, AI_ACT_URL};
pub use index::{
    corpus_digest, cosine_similarity, ActIndex, IndexError, IndexedChunk, ScoredSection,
    EMBED_BATCH_SIZE,
};
pub use splitter::{ActChunk, TextSplitter, ACT_SEPARATORS, ACT_SOURCE};

/// Owns the regulation text and its vector index.
pub struct AiActHandler {
    embedder: Arc<dyn EmbeddingModel>,
    http: Client,
    act_path: PathBuf,
    index_path: PathBuf,
    source_url: String,
    splitter: TextSplitter,
    index: OnceCell<ActIndex>,
}

impl AiActHandler {
    pub fn new(settings: &GuardSettings, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ai-code-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("failed to build EUR-Lex HTTP client")?;
        Ok(Self {
            embedder,
            http,
            act_path: settings.ai_act_path(),
            index_path: settings.vectorstore_path(),
            source_url: AI_ACT_URL.to_string(),
            splitter: TextSplitter::default(),
            index: OnceCell::new(),
        })
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn act_path(&self) -> &Path {
        &self.act_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Download the regulation text unless it is already on disk.
    pub async fn ensure_text(&self) -> Result<PathBuf> {
        if !self.act_path.exists() {
            download_ai_act(&self.http, &self.source_url, &self.act_path)
                .await
                .context("Error downloading EU AI Act")?;
        }
        Ok(self.act_path.clone())
    }

    /// Download the regulation text to `output`, replacing any existing file.
    pub async fn download(&self, output: &Path) -> Result<()> {
        download_ai_act(&self.http, &self.source_url, output)
            .await
            .context("Error downloading EU AI Act")
    }

    /// Load the stored index, or build and persist a new one.
    pub async fn process(&self) -> Result<&ActIndex> {
        self.index.get_or_try_init(|| self.load_or_build()).await
    }

    #[instrument(name = "process_ai_act", skip(self))]
    async fn load_or_build(&self) -> Result<ActIndex> {
        self.ensure_text().await?;
        let text = tokio::fs::read_to_string(&self.act_path)
            .await
            .with_context(|| format!("failed to read {}", self.act_path.display()))?;
        let digest = corpus_digest(&text);
        let model = self.embedder.model_id();

        if self.index_path.exists() {
            match ActIndex::load(&self.index_path) {
                Ok(index) if index.is_current(model, &digest) => {
                    debug!(entries = index.len(), "reusing stored vector index");
                    return Ok(index);
                }
                Ok(index) => info!(
                    stored_model = %index.model,
                    model,
                    "stored vector index is stale, rebuilding"
                ),
                Err(err) => warn!(error = %err, "error loading vector index, creating a new one"),
            }
        }

        let chunks = self.splitter.split_act(&text);
        if chunks.is_empty() {
            bail!("EU AI Act text at {} is empty", self.act_path.display());
        }
        info!(chunks = chunks.len(), model, "building vector index");
        let index = ActIndex::build(chunks, self.embedder.as_ref(), digest).await?;
        index.save(&self.index_path)?;
        Ok(index)
    }

    /// The `k` passages most similar to `query`.
    pub async fn search_relevant_sections(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredSection>> {
        let index = self.process().await?;
        let vectors = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .context("failed to embed search query")?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model returned no vector for the query"))?;
        Ok(index.search(&query_vector, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbeddings;
    use crate::settings::FileSettings;
    use std::fs;

    const ACT_TEXT: &str = "REGULATION (EU) 2024/1689\n\nArticle 5\nProhibited AI practices such as social scoring and manipulation.\n\nArticle 6\nClassification rules for high-risk AI systems used in employment and credit scoring.\n\nArticle 50\nTransparency obligations for providers of chatbots and deployers of emotion recognition.";

    fn settings(data_dir: &Path) -> GuardSettings {
        GuardSettings::resolve(
            &FileSettings::default(),
            &[(GuardSettings::PROVIDER_ENV.to_string(), "noop".to_string())]
                .into_iter()
                .collect(),
        )
        .unwrap()
        .with_data_dir(data_dir)
    }

    fn handler(data_dir: &Path) -> AiActHandler {
        AiActHandler::new(&settings(data_dir), Arc::new(HashingEmbeddings::default()))
            .unwrap()
            .with_splitter(TextSplitter::new(120, 0, ACT_SEPARATORS))
            .with_source_url("http://127.0.0.1:9/unreachable.pdf")
    }

    #[tokio::test]
    async fn builds_and_persists_index_from_local_text() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("eu_ai_act.txt"), ACT_TEXT).unwrap();

        let handler = handler(temp.path());
        let index = handler.process().await.unwrap();
        assert!(index.len() >= 3);
        assert!(handler.index_path().exists());

        let hits = handler
            .search_relevant_sections("high-risk employment credit scoring", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.article.as_deref(), Some("6"));
        assert_eq!(hits[0].chunk.source, ACT_SOURCE);
    }

    #[tokio::test]
    async fn changed_corpus_triggers_rebuild() {
        let temp = tempfile::tempdir().unwrap();
        let act_path = temp.path().join("eu_ai_act.txt");
        fs::write(&act_path, ACT_TEXT).unwrap();
        let first = handler(temp.path());
        let first_digest = first.process().await.unwrap().corpus_digest.clone();

        fs::write(&act_path, format!("{ACT_TEXT}\n\nArticle 99\nPenalties.")).unwrap();
        let rebuilt = handler(temp.path());
        let index = rebuilt.process().await.unwrap();
        assert_ne!(index.corpus_digest, first_digest);
        assert!(index
            .entries
            .iter()
            .any(|entry| entry.chunk.article.as_deref() == Some("99")));

        let stored = ActIndex::load(rebuilt.index_path()).unwrap();
        assert_eq!(stored.corpus_digest, index.corpus_digest);
    }

    #[tokio::test]
    async fn corrupt_index_is_rebuilt() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("eu_ai_act.txt"), ACT_TEXT).unwrap();
        let handler = handler(temp.path());
        fs::create_dir_all(handler.index_path().parent().unwrap()).unwrap();
        fs::write(handler.index_path(), "garbage").unwrap();

        let index = handler.process().await.unwrap();
        assert!(!index.is_empty());
        assert!(ActIndex::load(handler.index_path()).is_ok());
    }

    struct CountingEmbeddings {
        inner: HashingEmbeddings,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingModel for CountingEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.embed(texts).await
        }

        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
    }

    #[tokio::test]
    async fn concurrent_searches_build_index_once() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("eu_ai_act.txt"), ACT_TEXT).unwrap();
        let embedder = Arc::new(CountingEmbeddings {
            inner: HashingEmbeddings::default(),
            calls: Default::default(),
        });
        let handler = AiActHandler::new(&settings(temp.path()), embedder.clone())
            .unwrap()
            .with_splitter(TextSplitter::new(120, 0, ACT_SEPARATORS));

        let results = futures::future::join_all(
            ["social scoring", "chatbots", "credit scoring"]
                .into_iter()
                .map(|query| handler.search_relevant_sections(query, 1)),
        )
        .await;
        for hits in results {
            assert_eq!(hits.unwrap().len(), 1);
        }
        // One batch for the index, one call per query.
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_corpus_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("eu_ai_act.txt"), "  \n ").unwrap();
        let err = handler(temp.path()).process().await.unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }
}
