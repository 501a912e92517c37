use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use image::ImageReader;
use tracing::{debug, error, info, info_span, warn};

use crate::adapters::{Adapters, GenerationPoll};
use crate::edit::{result_key, EditStatus, FailureReason, ProcessingStage};
use crate::retry::RetryPolicy;
use crate::store::{EditStore, StageUpdate};

use super::config::PipelineConfig;
use super::context::{PipelineContext, StageOutputs};
use super::error::{PipelineError, PipelineWarning, StageError};
use super::progress::{ProgressReporter, StageEvent, StageEventKind};
use super::stages::{self, FailureMode, StageSpec};

const FAILED_MESSAGE: &str = "Edit failed. Please try again.";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        result_ref: Option<String>,
        warnings: Vec<PipelineWarning>,
    },
    Failed(FailureReason),
    /// The edit was already terminal; nothing ran.
    AlreadyTerminal(EditStatus),
}

enum StageResult {
    Advanced,
    Failed(FailureReason),
}

/// Drives one edit through the stage table, checkpointing every transition
/// in the store.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: EditStore,
    adapters: Adapters,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, store: EditStore, adapters: Adapters) -> Self {
        Self {
            config,
            store,
            adapters,
        }
    }

    pub fn store(&self) -> &EditStore {
        &self.store
    }

    /// Runs the edit from its stored stage to a terminal state.
    ///
    /// Safe to call again for the same edit: terminal edits are left alone and
    /// an edit in the middle of the pipeline resumes at its stored stage.
    pub fn run(
        &self,
        edit_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, PipelineError> {
        let edit = self
            .store
            .find(edit_id)?
            .ok_or_else(|| PipelineError::NotFound(edit_id.to_string()))?;

        let _pipeline_span = info_span!("pipeline",
            job_id = %edit.id,
            resume_at = %edit.processing_stage,
        )
        .entered();

        if edit.is_terminal() {
            info!("Edit {} already {}, nothing to do", edit.id, edit.status);
            return Ok(RunOutcome::AlreadyTerminal(edit.status));
        }

        let remaining = stages::remaining(edit.processing_stage);
        if edit.processing_stage != ProcessingStage::Pending {
            info!("Resuming edit {} at {}", edit.id, edit.processing_stage);
        }

        let mut ctx = PipelineContext::new(edit);
        for spec in remaining {
            if let StageResult::Failed(reason) = self.run_stage(spec, &mut ctx, progress)? {
                return self.fail(&mut ctx, reason, progress);
            }
        }

        info!("Edit {} completed", ctx.edit.id);
        progress.report(StageEvent::new(
            &ctx.edit.id,
            ProcessingStage::Completed,
            StageEventKind::Completed,
            ProcessingStage::Completed.message(),
        ));
        Ok(RunOutcome::Completed {
            result_ref: ctx.edit.result_image_ref.clone(),
            warnings: ctx.warnings,
        })
    }

    fn run_stage(
        &self,
        spec: &StageSpec,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<StageResult, PipelineError> {
        let stage = spec.stage;
        let policy = if spec.retries_allowed {
            self.config.retry_policy(stage)
        } else {
            RetryPolicy::NONE
        };
        let max_attempts = policy.attempts();

        let mut attempt = 1;
        loop {
            let _step = info_span!("stage", stage = %stage, attempt).entered();

            let message = if attempt == 1 {
                stage.message().to_string()
            } else {
                format!("{} (attempt {}/{})", stage.message(), attempt, max_attempts)
            };
            ctx.edit = self
                .store
                .update_stage(&ctx.edit.id, StageUpdate::new(stage, message.clone()))?;
            progress.report(
                StageEvent::new(&ctx.edit.id, stage, StageEventKind::Started, message)
                    .with_attempt(attempt, max_attempts),
            );

            ctx.outputs = StageOutputs::default();
            let err = match (spec.handler)(self, ctx) {
                Ok(()) => {
                    self.commit(stage, ctx, attempt, max_attempts, progress)?;
                    return Ok(StageResult::Advanced);
                }
                Err(err) => err,
            };

            if err.is_retryable() && attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Stage {} failed for edit {} ({}), retrying in {:?}",
                    stage, ctx.edit.id, err, delay
                );
                progress.report(
                    StageEvent::new(&ctx.edit.id, stage, StageEventKind::Retrying, "Retrying")
                        .with_attempt(attempt, max_attempts)
                        .with_error(err.message.clone()),
                );
                thread::sleep(delay);
                attempt += 1;
                continue;
            }

            return match spec.on_failure {
                FailureMode::FallBack => {
                    warn!(
                        "Stage {} gave up for edit {} ({}), continuing without it",
                        stage, ctx.edit.id, err
                    );
                    progress.report(
                        StageEvent::new(
                            &ctx.edit.id,
                            stage,
                            StageEventKind::FellBack,
                            "Continuing with the original prompt",
                        )
                        .with_attempt(attempt, max_attempts)
                        .with_error(err.message.clone()),
                    );
                    ctx.warnings.push(PipelineWarning::EnhancementSkipped {
                        stage,
                        error: err.to_string(),
                    });
                    ctx.outputs = StageOutputs::default();
                    self.commit(stage, ctx, attempt, max_attempts, progress)?;
                    Ok(StageResult::Advanced)
                }
                FailureMode::FailJob => Ok(StageResult::Failed(FailureReason::new(
                    stage,
                    err.kind,
                    err.message,
                ))),
            };
        }
    }

    /// Marks `stage` done by moving the edit to the following stage together
    /// with the stage's outputs.
    fn commit(
        &self,
        stage: ProcessingStage,
        ctx: &mut PipelineContext,
        attempt: u32,
        max_attempts: u32,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let next = stage.next().unwrap_or(ProcessingStage::Completed);
        let outputs = std::mem::take(&mut ctx.outputs);
        ctx.edit = self.store.update_stage(
            &ctx.edit.id,
            StageUpdate::new(next, next.message())
                .with_enhanced_prompt(outputs.enhanced_prompt)
                .with_result_image_ref(outputs.result_image_ref),
        )?;
        debug!("Stage {} committed for edit {}", stage, ctx.edit.id);
        progress.report(
            StageEvent::new(&ctx.edit.id, stage, StageEventKind::Succeeded, next.message())
                .with_attempt(attempt, max_attempts),
        );
        Ok(())
    }

    fn fail(
        &self,
        ctx: &mut PipelineContext,
        reason: FailureReason,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, PipelineError> {
        error!("Edit {} failed: {}", ctx.edit.id, reason);
        ctx.edit = self.store.update_status(
            &ctx.edit.id,
            EditStatus::Failed,
            Some(&reason),
            FAILED_MESSAGE,
        )?;
        progress.report(
            StageEvent::new(&ctx.edit.id, reason.stage, StageEventKind::Failed, FAILED_MESSAGE)
                .with_error(reason.message.clone()),
        );
        Ok(RunOutcome::Failed(reason))
    }

    /// Loads the original image into the working buffer unless it is there.
    fn ensure_original(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        if ctx.image.is_none() {
            let bytes = self.adapters.objects.get(&ctx.edit.original_image_ref)?;
            debug!("Loaded {} bytes of original image", bytes.len());
            ctx.image = Some(bytes);
        }
        Ok(())
    }

    // Stage handlers

    pub(super) fn enhance_prompt(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        if !self.config.enhancement_enabled {
            debug!("Prompt enhancement disabled");
            return Ok(());
        }
        if ctx.edit.enhanced_prompt.is_some() {
            debug!("Edit {} already has an enhanced prompt", ctx.edit.id);
            return Ok(());
        }
        let Some(enhancer) = self.adapters.enhancer.as_deref() else {
            debug!("No prompt enhancer configured");
            return Ok(());
        };

        self.ensure_original(ctx)?;
        let image = ctx.image.as_deref().unwrap_or(&[]);
        let enhanced = enhancer.enhance(&ctx.edit.prompt, image)?;
        let enhanced = enhanced.trim();
        if enhanced.is_empty() {
            return Err(StageError::permanent("enhancer returned an empty prompt"));
        }
        ctx.outputs.enhanced_prompt = Some(enhanced.to_string());
        Ok(())
    }

    pub(super) fn fetch_image(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        self.ensure_original(ctx)?;
        let image = ctx.image.as_deref().unwrap_or(&[]);
        let (width, height) = image_dimensions(image)?;
        debug!("Original image is {}x{}", width, height);
        Ok(())
    }

    pub(super) fn generate_image(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        // A run resumed here has no working buffer yet.
        self.ensure_original(ctx)?;
        let image = ctx.image.as_deref().unwrap_or(&[]);
        let generator = self.adapters.generator.as_ref();

        let handle = generator.submit(ctx.edit.effective_prompt(), image)?;
        info!("Waiting for generation {}", handle.id);

        let timeout = self.config.ai_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if let GenerationPoll::Ready(bytes) = generator.poll(&handle)? {
                if bytes.is_empty() {
                    return Err(StageError::permanent("generator returned an empty image"));
                }
                ctx.generated = Some(bytes);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StageError::transient(format!(
                    "generation {} did not finish within {:?}",
                    handle.id, timeout
                )));
            }
            thread::sleep(self.config.ai_poll_interval.min(deadline - now));
        }
    }

    pub(super) fn upload_result(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let key = result_key(&ctx.edit.id);
        let reference = match ctx.generated.as_deref() {
            Some(bytes) => self.adapters.objects.put(&key, bytes)?,
            None => match self.adapters.objects.head(&key)? {
                Some(reference) => {
                    info!("Result for edit {} was already uploaded", ctx.edit.id);
                    reference
                }
                None => {
                    return Err(StageError::permanent(
                        "generated image was lost before upload",
                    ))
                }
            },
        };
        ctx.outputs.result_image_ref = Some(reference);
        Ok(())
    }
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), StageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| StageError::permanent(format!("corrupt image: {}", e)))?
        .into_dimensions()
        .map_err(|e| StageError::permanent(format!("corrupt image: {}", e)))
}
