//! End-to-end pipeline runs against scripted adapters.

mod common;

use editflow::adapters::AdapterError;
use editflow::edit::result_key;
use editflow::pipeline::{NoopProgress, PipelineWarning, StageEventKind};
use editflow::store::StageUpdate;
use editflow::{EditStatus, ErrorKind, ProcessingStage, RunOutcome};

use common::{RecordingProgress, ScriptedEnhancer, ScriptedGenerator, TestHarness};

#[test]
fn test_full_run_completes_with_monotonic_stages() {
    let harness = TestHarness::new();
    let edit = harness.submit_root("make the sky purple");
    let enhancer = ScriptedEnhancer::succeeding();
    let generator = ScriptedGenerator::succeeding();
    let progress = RecordingProgress::new(harness.store.clone());

    let outcome = harness
        .pipeline(Some(&enhancer), &generator)
        .run(&edit.id, &progress)
        .unwrap();

    match outcome {
        RunOutcome::Completed {
            result_ref,
            warnings,
        } => {
            assert!(result_ref.is_some());
            assert!(warnings.is_empty());
        }
        other => panic!("expected completion, got {:?}", other),
    }

    // Every snapshot a poller could have seen moves forward only.
    let ranks: Vec<usize> = progress
        .snapshots()
        .iter()
        .map(|s| s.processing_stage.rank().expect("no failed stage in a clean run"))
        .collect();
    assert!(!ranks.is_empty());
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "ranks {:?}", ranks);

    let started: Vec<ProcessingStage> = progress
        .events()
        .iter()
        .filter(|e| e.kind == StageEventKind::Started)
        .map(|e| e.stage)
        .collect();
    assert_eq!(started, ProcessingStage::PIPELINE.to_vec());

    let status = harness.service.status(&edit.id).unwrap();
    assert_eq!(status.status, EditStatus::Completed);
    assert_eq!(status.processing_stage, ProcessingStage::Completed);
    assert_eq!(status.progress_percent, 100);
    assert!(status.is_complete);
    assert!(harness.objects.contains_key(&result_key(&edit.id)));

    let stored = harness.store.get(&edit.id).unwrap();
    assert_eq!(
        stored.enhanced_prompt.as_deref(),
        Some("Enhanced: make the sky purple")
    );
    assert_eq!(generator.prompts(), vec!["Enhanced: make the sky purple"]);
}

#[test]
fn test_enhancer_failure_falls_back_to_original_prompt() {
    let harness = TestHarness::new();
    let edit = harness.submit_root("add snow");
    let enhancer = ScriptedEnhancer::failing(AdapterError::transient(
        "prompt-enhancer",
        "503 service unavailable",
    ));
    let generator = ScriptedGenerator::succeeding();
    let progress = RecordingProgress::new(harness.store.clone());

    let outcome = harness
        .pipeline(Some(&enhancer), &generator)
        .run(&edit.id, &progress)
        .unwrap();

    // First attempt plus two retries.
    assert_eq!(enhancer.calls(), 3);
    assert_eq!(generator.prompts(), vec!["add snow"]);

    match outcome {
        RunOutcome::Completed { warnings, .. } => {
            assert_eq!(warnings.len(), 1);
            assert!(matches!(
                &warnings[0],
                PipelineWarning::EnhancementSkipped { stage, .. }
                    if *stage == ProcessingStage::EnhancingPrompt
            ));
        }
        other => panic!("expected completion, got {:?}", other),
    }

    assert!(progress
        .events()
        .iter()
        .any(|e| e.kind == StageEventKind::FellBack));
    // Pollers see which attempt the enhancer is on.
    assert!(progress.snapshots().iter().any(|s| {
        s.processing_stage == ProcessingStage::EnhancingPrompt
            && s.detail.as_deref() == Some("Enhancing your prompt with AI... (attempt 3/3)")
    }));
    let stored = harness.store.get(&edit.id).unwrap();
    assert_eq!(stored.status, EditStatus::Completed);
    assert_eq!(stored.enhanced_prompt, None);
}

#[test]
fn test_ai_failure_is_not_retried() {
    let harness = TestHarness::new();
    let edit = harness.submit_root("turn the car red");
    let generator =
        ScriptedGenerator::failing(AdapterError::transient("image-generator", "502 bad gateway"));

    let outcome = harness
        .pipeline(None, &generator)
        .run(&edit.id, &NoopProgress)
        .unwrap();

    assert_eq!(generator.submits(), 1);
    let reason = match outcome {
        RunOutcome::Failed(reason) => reason,
        other => panic!("expected failure, got {:?}", other),
    };
    assert_eq!(reason.stage, ProcessingStage::AiProcessing);
    assert_eq!(reason.kind, ErrorKind::Transient);

    let status = harness.service.status(&edit.id).unwrap();
    assert_eq!(status.status, EditStatus::Failed);
    assert!(status.is_error);
    assert!(!status.is_complete);
    assert_eq!(status.failed_stage, Some(ProcessingStage::AiProcessing));
    // Percentage of the last stage that finished, fetching_image.
    assert_eq!(status.progress_percent, 40);
    assert_eq!(status.message, "Edit failed. Please try again.");
    assert!(status.error.unwrap().contains("502"));
}

#[test]
fn test_resume_at_ai_processing_skips_finished_stages() {
    let harness = TestHarness::new();
    let edit = harness.submit_root("remove the lamp post");

    // A previous worker got through enhancement and fetch before it died.
    harness
        .store
        .update_stage(
            &edit.id,
            StageUpdate::new(ProcessingStage::AiProcessing, "Processing your edit...")
                .with_enhanced_prompt(Some("Remove the lamp post on the left".into())),
        )
        .unwrap();

    let enhancer = ScriptedEnhancer::succeeding();
    let generator = ScriptedGenerator::succeeding();
    let progress = RecordingProgress::new(harness.store.clone());

    let outcome = harness
        .pipeline(Some(&enhancer), &generator)
        .run(&edit.id, &progress)
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(enhancer.calls(), 0);
    assert_eq!(generator.prompts(), vec!["Remove the lamp post on the left"]);

    let stages_run: Vec<ProcessingStage> = progress
        .events()
        .iter()
        .filter(|e| e.kind == StageEventKind::Started)
        .map(|e| e.stage)
        .collect();
    assert_eq!(
        stages_run,
        vec![ProcessingStage::AiProcessing, ProcessingStage::UploadingResult]
    );
}

#[test]
fn test_rerun_of_completed_edit_is_noop() {
    let harness = TestHarness::new();
    let edit = harness.submit_root("brighten");
    let generator = ScriptedGenerator::succeeding();
    let pipeline = harness.pipeline(None, &generator);

    pipeline.run(&edit.id, &NoopProgress).unwrap();
    let before = harness.store.get(&edit.id).unwrap();

    let outcome = pipeline.run(&edit.id, &NoopProgress).unwrap();
    assert_eq!(outcome, RunOutcome::AlreadyTerminal(EditStatus::Completed));
    assert_eq!(generator.submits(), 1);
    assert_eq!(harness.store.get(&edit.id).unwrap(), before);
}

#[test]
fn test_caller_supplied_enhanced_prompt_skips_enhancer() {
    let harness = TestHarness::new();
    let mut request = editflow::SubmitRequest::new(
        "sunset",
        editflow::ImageSource::Bytes(common::png(8, 8)),
    );
    request.enhanced_prompt = Some("  Golden hour sunset over the skyline  ".into());
    let edit = harness.service.submit(request).unwrap();

    let enhancer = ScriptedEnhancer::succeeding();
    let generator = ScriptedGenerator::succeeding();
    harness
        .pipeline(Some(&enhancer), &generator)
        .run(&edit.id, &NoopProgress)
        .unwrap();

    assert_eq!(enhancer.calls(), 0);
    assert_eq!(generator.prompts(), vec!["Golden hour sunset over the skyline"]);
}
