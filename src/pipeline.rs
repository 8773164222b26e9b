// pipeline.rs - fetch -> embed -> compare -> report -> store, one message at a time.
//
// The corpus is read from the store once per run. Every item stored during the run is
// appended to that in-memory corpus, so two near-identical messages in the same batch
// are still compared against each other.
//
// Per-item failures (fetch, embed, store write) are recorded and the run moves on.
// Only listing failures and corpus-read failures abort: without a complete corpus the
// duplicate check would silently under-report.

use serde::Serialize;

use crate::config;
use crate::embeddings::text_prep::prepare_item_text;
use crate::embeddings::Embedder;
use crate::error::{FailureKind, PipelineError};
use crate::item::EmbeddedItem;
use crate::logging::truncate_for_log;
use crate::mail::MailSource;
use crate::similarity::find_similar;
use crate::store::ItemStore;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Inclusive cosine threshold for reporting a near-duplicate.
    pub threshold: f64,
    /// Don't store items that matched something. Off by default: matches are advisory.
    pub skip_on_duplicate: bool,
    /// Process at most this many of the listed ids.
    pub max_items: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threshold: config::similarity::DEFAULT_THRESHOLD,
            skip_on_duplicate: false,
            max_items: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_id: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub item_id: String,
    pub subject: String,
    pub matched_id: String,
    pub matched_page_id: Option<String>,
    pub matched_subject: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Ids returned by the source (after the `max_items` cap).
    pub listed: usize,
    /// Items fetched, embedded and checked against the corpus.
    pub processed: usize,
    /// Items with at least one match at or above the threshold.
    pub duplicates_found: usize,
    pub stored: usize,
    /// Items not stored because of `skip_on_duplicate`.
    pub skipped_duplicates: usize,
    pub failures: Vec<ItemFailure>,
    pub duplicates: Vec<DuplicateReport>,
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Stored { page_id: String },
    SkippedAsDuplicate,
    SkippedOnError(FailureKind),
}

pub struct Pipeline<'a> {
    source: &'a dyn MailSource,
    store: &'a mut dyn ItemStore,
    embedder: &'a dyn Embedder,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn MailSource,
        store: &'a mut dyn ItemStore,
        embedder: &'a dyn Embedder,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            store,
            embedder,
            options,
        }
    }

    pub fn run(&mut self, query: &str) -> Result<RunSummary, PipelineError> {
        let mut ids = self.source.list_item_ids(query).map_err(PipelineError::List)?;
        if let Some(max) = self.options.max_items {
            ids.truncate(max);
        }

        let mut summary = RunSummary {
            listed: ids.len(),
            ..RunSummary::default()
        };
        if ids.is_empty() {
            log::info!("No messages found matching {:?}", query);
            return Ok(summary);
        }

        let mut corpus = self.store.query_all().map_err(PipelineError::CorpusRead)?;
        let comparable = corpus.iter().filter(|e| e.vector.is_some()).count();
        log::info!(
            "Processing {} messages against {} stored items ({} with vectors), threshold={}",
            ids.len(),
            corpus.len(),
            comparable,
            self.options.threshold
        );

        for (n, id) in ids.iter().enumerate() {
            log::debug!("Item {}/{}: {}", n + 1, ids.len(), truncate_for_log(id));
            let outcome = self.process_item(id, &mut corpus, &mut summary);
            log::debug!("Item {} finished: {:?}", truncate_for_log(id), outcome);
        }

        log::info!(
            "Run complete: listed={}, processed={}, duplicatesFound={}, stored={}, skippedDuplicates={}, failures={}",
            summary.listed,
            summary.processed,
            summary.duplicates_found,
            summary.stored,
            summary.skipped_duplicates,
            summary.failures.len()
        );
        Ok(summary)
    }

    fn process_item(&mut self, id: &str, corpus: &mut Vec<EmbeddedItem>, summary: &mut RunSummary) -> ItemOutcome {
        let item = match self.source.fetch_item(id) {
            Ok(item) => item,
            Err(e) => return fail(summary, id, FailureKind::Fetch, e.to_string()),
        };

        let text = prepare_item_text(&item.subject, &item.body);
        let vector = match self.embedder.embed(&text) {
            Ok(v) if v.len() == self.embedder.dims() => v,
            Ok(v) => {
                let msg = format!("embedder returned {} dims, expected {}", v.len(), self.embedder.dims());
                return fail(summary, id, FailureKind::Embed, msg);
            }
            Err(e) => return fail(summary, id, FailureKind::Embed, e.to_string()),
        };
        let mut candidate = EmbeddedItem::new(item, vector);

        let reports = match find_similar(&candidate, corpus, self.options.threshold, self.embedder) {
            Ok(matches) => matches
                .iter()
                .map(|m| DuplicateReport {
                    item_id: m.candidate.id().to_string(),
                    subject: m.candidate.subject().to_string(),
                    matched_id: m.existing.id().to_string(),
                    matched_page_id: m.existing.page_id.clone(),
                    matched_subject: m.existing.subject().to_string(),
                    score: m.score,
                })
                .collect::<Vec<_>>(),
            Err(e) => return fail(summary, id, FailureKind::Embed, e.to_string()),
        };
        summary.processed += 1;

        let is_duplicate = !reports.is_empty();
        if is_duplicate {
            summary.duplicates_found += 1;
            log::info!(
                "Found {} similar items for: {}",
                reports.len(),
                truncate_for_log(candidate.subject())
            );
            for r in &reports {
                log::info!("Similarity: {:.2} - {}", r.score, truncate_for_log(&r.matched_subject));
            }
            summary.duplicates.extend(reports);
        }

        if is_duplicate && self.options.skip_on_duplicate {
            summary.skipped_duplicates += 1;
            log::info!("Not storing near-duplicate: {}", truncate_for_log(candidate.subject()));
            return ItemOutcome::SkippedAsDuplicate;
        }

        match self.store.insert(&candidate) {
            Ok(page_id) => {
                summary.stored += 1;
                log::info!("Stored item: {}", truncate_for_log(candidate.subject()));
                candidate.page_id = Some(page_id.clone());
                corpus.push(candidate);
                ItemOutcome::Stored { page_id }
            }
            Err(e) => fail(summary, id, FailureKind::Store, e.to_string()),
        }
    }
}

fn fail(summary: &mut RunSummary, id: &str, kind: FailureKind, message: String) -> ItemOutcome {
    log::error!("Item {} failed at {}: {}", truncate_for_log(id), kind, message);
    summary.failures.push(ItemFailure {
        item_id: id.to_string(),
        kind,
        message,
    });
    ItemOutcome::SkippedOnError(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbedError, FetchError, StoreError};
    use crate::item::Item;
    use crate::similarity::tests::{item, HashEmbedder};
    use crate::store::memory::MemoryStore;

    const DIMS: usize = 64;

    struct StubSource {
        items: Vec<Item>,
        /// Listed but not fetchable.
        missing: Vec<&'static str>,
        fail_list: bool,
    }

    impl StubSource {
        fn new(items: Vec<Item>) -> Self {
            Self {
                items,
                missing: vec![],
                fail_list: false,
            }
        }
    }

    impl MailSource for StubSource {
        fn list_item_ids(&self, _query: &str) -> Result<Vec<String>, FetchError> {
            if self.fail_list {
                return Err(FetchError::Http("connection refused".into()));
            }
            let mut ids: Vec<String> = self.items.iter().map(|i| i.id.clone()).collect();
            ids.extend(self.missing.iter().map(|s| s.to_string()));
            ids.sort();
            Ok(ids)
        }

        fn fetch_item(&self, id: &str) -> Result<Item, FetchError> {
            self.items
                .iter()
                .find(|i| i.id == id)
                .cloned()
                .ok_or_else(|| FetchError::Missing(id.to_string()))
        }
    }

    /// MemoryStore that refuses chosen writes or the corpus read.
    struct FlakyStore {
        inner: MemoryStore,
        reject_ids: Vec<&'static str>,
        fail_query: bool,
    }

    impl ItemStore for FlakyStore {
        fn query_all(&self) -> Result<Vec<EmbeddedItem>, StoreError> {
            if self.fail_query {
                return Err(StoreError::Status {
                    status: 401,
                    body: "unauthorized".into(),
                });
            }
            self.inner.query_all()
        }

        fn insert(&mut self, item: &EmbeddedItem) -> Result<String, StoreError> {
            if self.reject_ids.contains(&item.id()) {
                return Err(StoreError::Status {
                    status: 400,
                    body: "validation_error".into(),
                });
            }
            self.inner.insert(item)
        }

        fn update(&mut self, page_id: &str, item: &EmbeddedItem) -> Result<(), StoreError> {
            self.inner.update(page_id, item)
        }

        fn archive(&mut self, page_id: &str) -> Result<(), StoreError> {
            self.inner.archive(page_id)
        }
    }

    /// Fails on any text containing "POISON".
    struct PickyEmbedder(HashEmbedder);

    impl Embedder for PickyEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("POISON") {
                return Err(EmbedError(anyhow::anyhow!("tokenizer exploded")));
            }
            self.0.embed(text)
        }

        fn dims(&self) -> usize {
            self.0.dims()
        }

        fn model_name(&self) -> &str {
            "picky"
        }
    }

    fn run(source: &StubSource, store: &mut dyn ItemStore, options: PipelineOptions) -> Result<RunSummary, PipelineError> {
        let engine = HashEmbedder { dims: DIMS };
        Pipeline::new(source, store, &engine, options).run("subject:(SQL)")
    }

    #[test]
    fn test_fetch_failure_skips_only_that_item() {
        let mut source = StubSource::new(vec![
            item("item1", "SQL Interview Questions", "joins and indexes"),
            item("item3", "Weekly newsletter", "gardening tips"),
        ]);
        source.missing = vec!["item2"];
        let mut store = MemoryStore::new();

        let summary = run(&source, &mut store, PipelineOptions::default()).unwrap();

        assert_eq!(summary.listed, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].item_id, "item2");
        assert_eq!(summary.failures[0].kind, FailureKind::Fetch);
        assert_eq!(store.query_all().unwrap().len(), 2);
    }

    #[test]
    fn test_always_stores_and_reports_intra_run_duplicates() {
        let source = StubSource::new(vec![
            item("a", "SQL Interview Questions", "What is a LEFT JOIN?"),
            item("b", "SQL Interview Questions", "What is a LEFT JOIN?"),
        ]);
        let mut store = MemoryStore::new();

        let summary = run(&source, &mut store, PipelineOptions::default()).unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.duplicates_found, 1);
        assert_eq!(summary.duplicates[0].item_id, "b");
        assert_eq!(summary.duplicates[0].matched_id, "a");
        assert!(summary.duplicates[0].matched_page_id.is_some());
        assert!((summary.duplicates[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_skip_on_duplicate_suppresses_storage() {
        let source = StubSource::new(vec![
            item("a", "SQL Interview Questions", "What is a LEFT JOIN?"),
            item("b", "SQL Interview Questions", "What is a LEFT JOIN?"),
            item("c", "Holiday schedule", "Office closed on Friday"),
        ]);
        let mut store = MemoryStore::new();
        let options = PipelineOptions {
            skip_on_duplicate: true,
            ..PipelineOptions::default()
        };

        let summary = run(&source, &mut store, options).unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.skipped_duplicates, 1);
        let ids: Vec<String> = store.query_all().unwrap().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_matches_existing_corpus() {
        let engine = HashEmbedder { dims: DIMS };
        let text = prepare_item_text("SQL Interview Questions", "joins");
        let mut existing = EmbeddedItem::new(item("old", "SQL Interview Questions", "joins"), engine.embed(&text).unwrap());
        existing.page_id = Some("page-old".into());
        let mut store = MemoryStore::from_items(vec![existing]);

        let source = StubSource::new(vec![item("new", "SQL Interview Questions", "joins")]);
        let summary = run(&source, &mut store, PipelineOptions::default()).unwrap();

        assert_eq!(summary.duplicates_found, 1);
        assert_eq!(summary.duplicates[0].matched_page_id.as_deref(), Some("page-old"));
        assert_eq!(store.inserted_count(), 1);
    }

    #[test]
    fn test_unrelated_items_are_not_reported() {
        let source = StubSource::new(vec![
            item("a", "SQL Interview Questions", "joins indexes"),
            item("b", "Holiday schedule", "office closed friday"),
        ]);
        let mut store = MemoryStore::new();
        let options = PipelineOptions {
            threshold: 0.99,
            ..PipelineOptions::default()
        };
        let summary = run(&source, &mut store, options).unwrap();
        assert_eq!(summary.duplicates_found, 0);
        assert!(summary.duplicates.is_empty());
        assert_eq!(summary.stored, 2);
    }

    #[test]
    fn test_list_failure_aborts() {
        let mut source = StubSource::new(vec![item("a", "s", "b")]);
        source.fail_list = true;
        let mut store = MemoryStore::new();
        let err = run(&source, &mut store, PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::List(_)));
    }

    #[test]
    fn test_corpus_read_failure_aborts_before_storing() {
        let source = StubSource::new(vec![item("a", "s", "b")]);
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reject_ids: vec![],
            fail_query: true,
        };
        let err = run(&source, &mut store, PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::CorpusRead(_)));
        assert_eq!(store.inner.inserted_count(), 0);
    }

    #[test]
    fn test_store_write_failure_is_per_item() {
        let source = StubSource::new(vec![
            item("a", "First", "alpha"),
            item("b", "Second", "beta"),
            item("c", "Third", "gamma"),
        ]);
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reject_ids: vec!["b"],
            fail_query: false,
        };
        let summary = run(&source, &mut store, PipelineOptions::default()).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Store);
        assert!(summary.failures[0].message.contains("400"));
    }

    #[test]
    fn test_embed_failure_is_per_item() {
        let source = StubSource::new(vec![item("a", "fine", "ok"), item("b", "POISON", "x")]);
        let mut store = MemoryStore::new();
        let engine = PickyEmbedder(HashEmbedder { dims: DIMS });
        let summary = Pipeline::new(&source, &mut store, &engine, PipelineOptions::default())
            .run("q")
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.failures[0].item_id, "b");
        assert_eq!(summary.failures[0].kind, FailureKind::Embed);
    }

    #[test]
    fn test_empty_item_is_stored_without_matches() {
        // Empty text embeds to the zero vector: every comparison is degenerate and skipped.
        let source = StubSource::new(vec![item("a", "", ""), item("b", "", "")]);
        let mut store = MemoryStore::new();
        let summary = run(&source, &mut store, PipelineOptions::default()).unwrap();
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.duplicates_found, 0);
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn test_max_items_and_empty_listing() {
        let source = StubSource::new(vec![item("a", "x", "1"), item("b", "y", "2"), item("c", "z", "3")]);
        let mut store = MemoryStore::new();
        let options = PipelineOptions {
            max_items: Some(2),
            ..PipelineOptions::default()
        };
        let summary = run(&source, &mut store, options).unwrap();
        assert_eq!(summary.listed, 2);
        assert_eq!(summary.stored, 2);

        let empty = StubSource::new(vec![]);
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reject_ids: vec![],
            fail_query: true,
        };
        // Nothing listed: the corpus is never read, so a broken store doesn't matter.
        let summary = run(&empty, &mut store, PipelineOptions::default()).unwrap();
        assert_eq!(summary.listed, 0);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = RunSummary {
            failures: vec![ItemFailure {
                item_id: "x".into(),
                kind: FailureKind::Fetch,
                message: "gone".into(),
            }],
            ..RunSummary::default()
        };
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["duplicatesFound"], 0);
        assert_eq!(v["failures"][0]["itemId"], "x");
        assert_eq!(v["failures"][0]["kind"], "fetch");
    }
}
