//! Chain runner: drive an image through the ordered prompt stages.
//!
//! Each stage renders its template (substituting the previous stage's array
//! for `{documents}`), calls the vision model, and extracts a JSON array
//! from the completion. That array, the *carry*, is the only thing passed
//! forward. After the last stage the carry is normalised into
//! [`DocumentRecord`](crate::output::DocumentRecord)s.
//!
//! ```text
//! Idle ─▶ StagePending(1) ─▶ StageParsed(1) ─▶ … ─▶ StageParsed(n) ─▶ Normalized ─▶ Done
//! ```
//!
//! Stages never overlap for one image. A [`ChainRunner`] holds no mutable
//! state, so one runner can serve many images concurrently; each `run` owns
//! its own carry.

use crate::config::{ChainConfig, ParseFailurePolicy};
use crate::error::{DocChainError, ModelError};
use crate::output::{ChainOutput, ChainStats, StageOutcome, StageReport};
use crate::pipeline::encode::ImagePayload;
use crate::pipeline::extract::extract;
use crate::pipeline::llm::{Completion, VisionModel};
use crate::pipeline::normalize::normalize;
use crate::progress::ProgressCallback;
use crate::prompts::PromptStage;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Position of a run in the chain's lifecycle. Traced at DEBUG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    StagePending(usize),
    StageParsed(usize),
    Normalized,
    Done,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Idle => write!(f, "Idle"),
            ChainState::StagePending(n) => write!(f, "Stage{n}Pending"),
            ChainState::StageParsed(n) => write!(f, "Stage{n}Parsed"),
            ChainState::Normalized => write!(f, "Normalized"),
            ChainState::Done => write!(f, "Done"),
        }
    }
}

/// Runs the configured stages against one image at a time.
pub struct ChainRunner {
    model: Arc<dyn VisionModel>,
    stages: Vec<PromptStage>,
    policy: ParseFailurePolicy,
    skip_empty_stages: bool,
    call_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl ChainRunner {
    /// Capture the stages and policies from `config`.
    pub fn new(model: Arc<dyn VisionModel>, config: &ChainConfig) -> Self {
        Self {
            model,
            stages: config.stages.clone(),
            policy: config.parse_failure_policy,
            skip_empty_stages: config.skip_empty_stages,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn stages(&self) -> &[PromptStage] {
        &self.stages
    }

    /// Run every stage over `image` and return the normalised documents.
    ///
    /// # Errors
    /// - [`DocChainError::StageFailed`]: the model call failed.
    /// - [`DocChainError::ApiTimeout`]: the model call exceeded the timeout.
    /// - [`DocChainError::ParseAborted`]: a completion was unparsable and the
    ///   policy is [`ParseFailurePolicy::Abort`].
    pub async fn run(&self, image: &ImagePayload, label: &str) -> Result<ChainOutput, DocChainError> {
        if let Some(ref cb) = self.progress {
            cb.on_chain_start(label, self.stages.len());
        }

        match self.execute(image, label).await {
            Ok(output) => {
                if let Some(ref cb) = self.progress {
                    cb.on_chain_complete(label, output.documents.len());
                }
                Ok(output)
            }
            Err(e) => {
                warn!("{}: chain failed: {}", label, e);
                if let Some(ref cb) = self.progress {
                    cb.on_chain_error(label, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, image: &ImagePayload, label: &str) -> Result<ChainOutput, DocChainError> {
        let total_start = Instant::now();
        let total = self.stages.len();
        let mut state = ChainState::Idle;
        let mut carry: Vec<Value> = Vec::new();
        let mut reports = Vec::with_capacity(total);
        let mut llm_duration_ms = 0u64;

        info!("{}: running {}-stage chain on {} bytes", label, total, image.len());

        for (idx, stage) in self.stages.iter().enumerate() {
            let stage_num = idx + 1;
            state = advance(label, state, ChainState::StagePending(stage_num));

            if self.skip_empty_stages && stage.uses_carry() && carry.is_empty() {
                info!(
                    "{}: stage {} ({}) skipped, no prior results",
                    label, stage_num, stage.name
                );
                if let Some(ref cb) = self.progress {
                    cb.on_stage_skipped(label, stage_num, total);
                }
                reports.push(StageReport {
                    stage: stage_num,
                    name: stage.name.clone(),
                    outcome: StageOutcome::Skipped,
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms: 0,
                });
                state = advance(label, state, ChainState::StageParsed(stage_num));
                continue;
            }

            let prompt = stage.render(&carry);
            if let Some(ref cb) = self.progress {
                cb.on_stage_start(label, stage_num, total);
            }

            let stage_start = Instant::now();
            let completion = self.call_model(stage_num, &prompt, image).await?;
            let duration_ms = stage_start.elapsed().as_millis() as u64;
            llm_duration_ms += duration_ms;

            let outcome = match extract(&completion.text).into_array(&completion.text) {
                Ok(items) => {
                    debug!(
                        "{}: stage {} ({}) parsed {} items in {}ms",
                        label,
                        stage_num,
                        stage.name,
                        items.len(),
                        duration_ms
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_stage_complete(label, stage_num, total, items.len());
                    }
                    let count = items.len();
                    carry = items;
                    StageOutcome::Parsed { items: count }
                }
                Err(failure) => {
                    warn!(
                        "{}: stage {} ({}) returned unparsable output: {}\n{}",
                        label, stage_num, stage.name, failure.reason, failure.raw_text
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_parse_failure(label, stage_num, &failure.reason);
                    }
                    if self.policy == ParseFailurePolicy::Abort {
                        return Err(DocChainError::ParseAborted {
                            stage: stage_num,
                            reason: failure.reason,
                        });
                    }
                    carry = Vec::new();
                    StageOutcome::ParseFailed(failure)
                }
            };

            reports.push(StageReport {
                stage: stage_num,
                name: stage.name.clone(),
                outcome,
                input_tokens: completion.input_tokens,
                output_tokens: completion.output_tokens,
                duration_ms,
            });
            state = advance(label, state, ChainState::StageParsed(stage_num));
        }

        let documents = normalize(carry);
        state = advance(label, state, ChainState::Normalized);

        let stats = ChainStats {
            stages_run: reports
                .iter()
                .filter(|r| r.outcome != StageOutcome::Skipped)
                .count(),
            stages_skipped: reports
                .iter()
                .filter(|r| r.outcome == StageOutcome::Skipped)
                .count(),
            parse_failures: reports
                .iter()
                .filter(|r| matches!(r.outcome, StageOutcome::ParseFailed(_)))
                .count(),
            documents: documents.len(),
            total_input_tokens: reports.iter().map(|r| r.input_tokens as u64).sum(),
            total_output_tokens: reports.iter().map(|r| r.output_tokens as u64).sum(),
            llm_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "{}: {} documents, {} stages run, {} skipped, {}ms",
            label, stats.documents, stats.stages_run, stats.stages_skipped, stats.total_duration_ms
        );
        advance(label, state, ChainState::Done);

        Ok(ChainOutput {
            label: label.to_string(),
            documents,
            stages: reports,
            stats,
        })
    }

    /// One model call, bounded by the configured timeout.
    async fn call_model(
        &self,
        stage: usize,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<Completion, DocChainError> {
        let start = Instant::now();
        match tokio::time::timeout(self.call_timeout, self.model.complete(prompt, image)).await {
            Ok(Ok(completion)) => Ok(completion),
            // The client's own timeout may fire first; it is the same event.
            Ok(Err(ModelError::Timeout { .. })) | Err(_) => Err(DocChainError::ApiTimeout {
                stage,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
            Ok(Err(source)) => Err(DocChainError::StageFailed { stage, source }),
        }
    }
}

/// Run the configured chain over one image with `model`.
///
/// Shorthand for building a [`ChainRunner`] and calling [`ChainRunner::run`]
/// once; the image is labelled `"image"` in logs and the output.
pub async fn run_chain(
    model: Arc<dyn VisionModel>,
    image: &ImagePayload,
    config: &ChainConfig,
) -> Result<ChainOutput, DocChainError> {
    ChainRunner::new(model, config).run(image, "image").await
}

fn advance(label: &str, from: ChainState, to: ChainState) -> ChainState {
    debug!("{}: {} → {}", label, from, to);
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::GeminiClient;
    use crate::prompts::default_stages;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns queued responses in order and records every prompt.
    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<&str, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str, _image: &ImagePayload) -> Result<Completion, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("model called more times than scripted");
            next.map(|text| Completion {
                text,
                input_tokens: 100,
                output_tokens: 10,
            })
        }
    }

    struct SlowModel;

    #[async_trait]
    impl VisionModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _prompt: &str, _image: &ImagePayload) -> Result<Completion, ModelError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Completion::new("[]"))
        }
    }

    fn image() -> ImagePayload {
        ImagePayload::new(b"fake image".to_vec(), "image/png")
    }

    fn runner(model: Arc<dyn VisionModel>, config: ChainConfig) -> ChainRunner {
        ChainRunner::new(model, &config)
    }

    #[tokio::test]
    async fn energy_bill_yields_one_record() {
        let model = ScriptedModel::new(vec![
            Ok(r#"["Fatura de Energia"]"#),
            Ok("```json\n[{\"document_type\": \"Fatura de Energia\", \"rua\": \"Avenida Paulista, 1000\", \"cpf\": null}]\n```"),
        ]);
        let out = runner(model.clone(), ChainConfig::default())
            .run(&image(), "bill.png")
            .await
            .unwrap();

        assert_eq!(out.documents.len(), 1);
        let doc = &out.documents[0];
        assert_eq!(doc.document_type(), Some("Fatura de Energia"));
        assert_eq!(doc.get("rua"), Some(&json!("Avenida Paulista, 1000")));
        assert!(doc.get("cpf").is_none());

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains(r#"["Fatura de Energia"]"#));
        assert_eq!(out.stats.stages_run, 2);
        assert_eq!(out.stats.total_input_tokens, 200);
        assert_eq!(out.stats.total_output_tokens, 20);
    }

    #[tokio::test]
    async fn empty_classification_skips_extraction() {
        let model = ScriptedModel::new(vec![Ok("[]")]);
        let out = runner(model.clone(), ChainConfig::default())
            .run(&image(), "blank.png")
            .await
            .unwrap();

        assert!(out.documents.is_empty());
        assert_eq!(model.prompts().len(), 1);
        assert_eq!(out.stages[1].outcome, StageOutcome::Skipped);
        assert_eq!(out.stats.stages_skipped, 1);
        assert!(!out.is_degraded());
    }

    #[tokio::test]
    async fn empty_classification_without_skipping_sends_empty_array() {
        let model = ScriptedModel::new(vec![Ok("[]"), Ok("[]")]);
        let config = ChainConfig::builder().skip_empty_stages(false).build().unwrap();
        let out = runner(model.clone(), config).run(&image(), "blank.png").await.unwrap();

        assert!(out.documents.is_empty());
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].trim_end().ends_with("[]"));
    }

    #[tokio::test]
    async fn garbage_classification_continues_with_empty_carry() {
        let model = ScriptedModel::new(vec![Ok("Sorry, I cannot help with that.")]);
        let out = runner(model.clone(), ChainConfig::default())
            .run(&image(), "garbage.png")
            .await
            .unwrap();

        assert!(out.documents.is_empty());
        assert!(out.is_degraded());
        let failures: Vec<_> = out.parse_failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 1);
        assert_eq!(failures[0].1.raw_text, "Sorry, I cannot help with that.");
        assert_eq!(out.stages[1].outcome, StageOutcome::Skipped);
    }

    #[tokio::test]
    async fn garbage_classification_aborts_under_strict_policy() {
        let model = ScriptedModel::new(vec![Ok("[{bad json")]);
        let config = ChainConfig::builder()
            .parse_failure_policy(ParseFailurePolicy::Abort)
            .build()
            .unwrap();
        let err = runner(model.clone(), config)
            .run(&image(), "garbage.png")
            .await
            .unwrap_err();

        assert!(matches!(err, DocChainError::ParseAborted { stage: 1, .. }), "got: {err}");
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn object_instead_of_array_is_a_parse_failure() {
        let model = ScriptedModel::new(vec![Ok(r#"{"document_type": "Procuração"}"#)]);
        let out = runner(model, ChainConfig::default())
            .run(&image(), "obj.png")
            .await
            .unwrap();
        assert!(out.documents.is_empty());
        assert!(matches!(out.stages[0].outcome, StageOutcome::ParseFailed(_)));
    }

    #[tokio::test]
    async fn transport_error_fails_the_chain() {
        let model = ScriptedModel::new(vec![
            Ok(r#"["Procuração"]"#),
            Err(ModelError::Transport("connection reset".into())),
        ]);
        let err = runner(model, ChainConfig::default())
            .run(&image(), "x.png")
            .await
            .unwrap_err();
        match err {
            DocChainError::StageFailed { stage, source } => {
                assert_eq!(stage, 2);
                assert!(matches!(source, ModelError::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn hung_model_call_times_out() {
        let config = ChainConfig::builder().api_timeout_secs(1).build().unwrap();
        let err = runner(Arc::new(SlowModel), config)
            .run(&image(), "slow.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DocChainError::ApiTimeout { stage: 1, .. }), "got: {err}");
    }

    #[tokio::test]
    async fn silent_gemini_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ChainConfig::builder()
            .api_key("k")
            .endpoint(format!("http://{addr}/v1beta"))
            .api_timeout_secs(1)
            .build()
            .unwrap();
        let client = Arc::new(GeminiClient::from_config(&config).unwrap());

        // Client and runner share the deadline; repeat so either firing first is covered.
        for _ in 0..3 {
            let err = runner(client.clone(), config.clone())
                .run(&image(), "silent.png")
                .await
                .unwrap_err();
            assert!(matches!(err, DocChainError::ApiTimeout { stage: 1, .. }), "got: {err}");
        }
    }

    #[tokio::test]
    async fn each_stage_receives_previous_stage_output() {
        let stages = vec![
            PromptStage::new("one", "first"),
            PromptStage::new("two", "second {documents}"),
            PromptStage::new("three", "third {documents}"),
        ];
        let model = ScriptedModel::new(vec![
            Ok(r#"["a"]"#),
            Ok(r#"[{"k": "v"}]"#),
            Ok(r#"[{"k": "w", "z": null}]"#),
        ]);
        let config = ChainConfig::builder().stages(stages).build().unwrap();
        let out = runner(model.clone(), config).run(&image(), "x").await.unwrap();

        assert_eq!(
            model.prompts(),
            vec![
                "first".to_string(),
                r#"second ["a"]"#.to_string(),
                r#"third [{"k":"v"}]"#.to_string(),
            ]
        );
        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.documents[0].keys().collect::<Vec<_>>(), vec!["k"]);
    }

    #[tokio::test]
    async fn parse_failure_in_middle_stage_resets_carry() {
        let stages = vec![
            PromptStage::new("one", "first"),
            PromptStage::new("two", "second {documents}"),
            PromptStage::new("three", "third {documents}"),
        ];
        let model = ScriptedModel::new(vec![Ok(r#"["a"]"#), Ok("not json"), Ok("[]")]);
        let config = ChainConfig::builder()
            .stages(stages)
            .skip_empty_stages(false)
            .build()
            .unwrap();
        runner(model.clone(), config).run(&image(), "x").await.unwrap();
        assert_eq!(model.prompts()[2], "third []");
    }

    #[tokio::test]
    async fn progress_events_follow_the_chain() {
        #[derive(Default)]
        struct Counter {
            starts: AtomicUsize,
            completes: AtomicUsize,
            skipped: AtomicUsize,
            done: AtomicUsize,
        }
        impl crate::progress::ChainProgressCallback for Counter {
            fn on_stage_start(&self, _: &str, _: usize, _: usize) {
                self.starts.fetch_add(1, Ordering::SeqCst);
            }
            fn on_stage_complete(&self, _: &str, _: usize, _: usize, _: usize) {
                self.completes.fetch_add(1, Ordering::SeqCst);
            }
            fn on_stage_skipped(&self, _: &str, _: usize, _: usize) {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            fn on_chain_complete(&self, _: &str, _: usize) {
                self.done.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let config = ChainConfig::builder()
            .progress_callback(counter.clone())
            .build()
            .unwrap();
        let model = ScriptedModel::new(vec![Ok("[]")]);
        runner(model, config).run(&image(), "x").await.unwrap();

        assert_eq!(counter.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counter.completes.load(Ordering::SeqCst), 1);
        assert_eq!(counter.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(counter.done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runner_works_from_sync_context() {
        let model = ScriptedModel::new(vec![Ok(r#"["Procuração"]"#), Ok("[]")]);
        let r = ChainRunner::new(model, &ChainConfig::default());
        assert_eq!(r.stages(), default_stages().as_slice());
        let out = tokio_test::block_on(r.run(&image(), "sync.png")).unwrap();
        assert!(out.documents.is_empty());
        assert_eq!(out.stages[1].outcome, StageOutcome::Parsed { items: 0 });
    }

    #[test]
    fn state_display() {
        assert_eq!(ChainState::StagePending(2).to_string(), "Stage2Pending");
        assert_eq!(ChainState::Done.to_string(), "Done");
    }
}
