//! Sequential healing over many source files.

use super::{HealOutcome, HealingEngine};
use crate::config::TestFrameworkDescriptor;
use crate::error::{KintsugiError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Tally of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Tests written (verified or not).
    pub generated: Vec<PathBuf>,
    /// Sources the model declined to test.
    pub skipped: Vec<PathBuf>,
    /// Sources whose existing test already passed.
    pub passed_existing: Vec<PathBuf>,
    /// Sources that failed, with the error message.
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.generated.len() + self.skipped.len() + self.passed_existing.len() + self.failures.len()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, source: &Path, outcome: &HealOutcome) {
        let source = source.to_path_buf();
        match outcome {
            HealOutcome::Verified { .. } | HealOutcome::Unverified => self.generated.push(source),
            HealOutcome::Skipped => self.skipped.push(source),
            HealOutcome::AlreadyPassing => self.passed_existing.push(source),
        }
    }
}

impl HealingEngine {
    /// Heal every source in order.
    ///
    /// Per-file failures are recorded and the batch moves on; a fatal error
    /// stops it and is returned.
    pub async fn write_test_files(
        &self,
        sources: &[PathBuf],
        framework: Option<&TestFrameworkDescriptor>,
    ) -> Result<BatchReport> {
        self.write_test_files_with_progress(sources, framework, |_, _| {})
            .await
    }

    /// [`write_test_files`](Self::write_test_files), calling `progress` after
    /// each file.
    pub async fn write_test_files_with_progress<F>(
        &self,
        sources: &[PathBuf],
        framework: Option<&TestFrameworkDescriptor>,
        mut progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&Path, std::result::Result<&HealOutcome, &KintsugiError>),
    {
        let mut report = BatchReport::default();
        info!("Healing {} file(s)", sources.len());

        for source in sources {
            let result = match self.prepare_target(source).await {
                Ok(target) => self.write_test_file(&target, framework).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(outcome) => {
                    progress(source, Ok(&outcome));
                    report.record(source, &outcome);
                }
                Err(err) if err.is_fatal() => {
                    error!("Aborting batch at {}: {}", source.display(), err);
                    progress(source, Err(&err));
                    return Err(err);
                }
                Err(err) => {
                    warn!("Failed to heal {}: {}", source.display(), err);
                    progress(source, Err(&err));
                    report.failures.push((source.clone(), err.to_string()));
                }
            }
        }

        info!(
            "Batch finished: {} generated, {} skipped, {} already passing, {} failed",
            report.generated.len(),
            report.skipped.len(),
            report.passed_existing.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::heal::Collaborators;
    use crate::llm::{MockReply, ProviderFatalClassifier};
    use crate::prompt::SKIP_SENTINEL;
    use crate::testing::{MockChatClient, MockFileStore, MockTestRunner, ADD_SOURCE, FIXED_ADD_TEST};
    use std::sync::Arc;

    fn engine(client: MockChatClient, files: MockFileStore) -> (HealingEngine, Arc<MockChatClient>) {
        let client = Arc::new(client.with_multi_turn(false));
        let engine = HealingEngine::new(
            ProjectConfig::default(),
            Collaborators {
                client: client.clone(),
                files: Arc::new(files),
                runner: Arc::new(MockTestRunner::new()),
                classifier: Arc::new(ProviderFatalClassifier::new()),
            },
        );
        (engine, client)
    }

    #[tokio::test]
    async fn test_batch_records_each_outcome() {
        let files = MockFileStore::new()
            .with_file("src/a.ts", ADD_SOURCE)
            .with_file("src/b.ts", "export type T = string;")
            .with_file("src/c.ts", ADD_SOURCE)
            .with_file("src/c.test.ts", FIXED_ADD_TEST);
        let client = MockChatClient::new()
            .with_reply(FIXED_ADD_TEST)
            .with_reply(SKIP_SENTINEL);
        let (engine, client) = engine(client, files);

        let sources: Vec<PathBuf> = ["src/a.ts", "src/b.ts", "src/c.ts", "src/missing.ts"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let mut seen = Vec::new();
        let report = engine
            .write_test_files_with_progress(&sources, None, |path, _| seen.push(path.to_path_buf()))
            .await
            .unwrap();

        assert_eq!(report.generated, vec![PathBuf::from("src/a.ts")]);
        assert_eq!(report.skipped, vec![PathBuf::from("src/b.ts")]);
        assert_eq!(report.passed_existing, vec![PathBuf::from("src/c.ts")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, PathBuf::from("src/missing.ts"));
        assert_eq!(report.total(), 4);
        assert!(!report.is_success());
        assert_eq!(seen, sources);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_batch() {
        let files = MockFileStore::new()
            .with_file("src/a.ts", ADD_SOURCE)
            .with_file("src/b.ts", ADD_SOURCE);
        let client = MockChatClient::new().with_scripted(MockReply::Quota("insufficient_quota".into()));
        let (engine, client) = engine(client, files);

        let err = engine
            .write_test_files(&[PathBuf::from("src/a.ts"), PathBuf::from("src/b.ts")], None)
            .await
            .unwrap_err();

        assert!(matches!(err, KintsugiError::FatalProvider { .. }));
        assert_eq!(client.call_count(), 1);
    }
}
