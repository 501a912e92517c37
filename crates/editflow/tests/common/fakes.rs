//! Scripted stand-ins for the external services.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use editflow::adapters::{
    AdapterError, GenerationHandle, GenerationPoll, ImageGenerator, PromptEnhancer,
};
use editflow::pipeline::{ProgressReporter, StageEvent};
use editflow::store::EditStore;
use editflow::StatusSnapshot;

/// A small valid PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([30, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Enhancer that either always succeeds or always fails with one error.
/// Clones share the call counter.
#[derive(Clone)]
pub struct ScriptedEnhancer {
    calls: Arc<AtomicUsize>,
    failure: Option<AdapterError>,
}

impl ScriptedEnhancer {
    pub fn succeeding() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failure: None,
        }
    }

    pub fn failing(error: AdapterError) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failure: Some(error),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PromptEnhancer for ScriptedEnhancer {
    fn enhance(&self, prompt: &str, _image: &[u8]) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(format!("Enhanced: {}", prompt)),
        }
    }
}

/// Generator that answers every submit with a job that is ready on the
/// first poll, or fails every submit. Records the prompts it was given.
#[derive(Clone)]
pub struct ScriptedGenerator {
    submits: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
    failure: Option<AdapterError>,
    output: Vec<u8>,
}

impl ScriptedGenerator {
    pub fn succeeding() -> Self {
        Self {
            submits: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            failure: None,
            output: png(6, 6),
        }
    }

    pub fn failing(error: AdapterError) -> Self {
        Self {
            failure: Some(error),
            ..Self::succeeding()
        }
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ImageGenerator for ScriptedGenerator {
    fn submit(&self, prompt: &str, _image: &[u8]) -> Result<GenerationHandle, AdapterError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(GenerationHandle {
            id: format!("gen-{}", n),
            polling_url: "http://generator.test/poll".into(),
        })
    }

    fn poll(&self, _handle: &GenerationHandle) -> Result<GenerationPoll, AdapterError> {
        Ok(GenerationPoll::Ready(self.output.clone()))
    }
}

/// Records every stage event together with what a poller would have seen
/// right after it.
pub struct RecordingProgress {
    store: EditStore,
    events: Mutex<Vec<StageEvent>>,
    snapshots: Mutex<Vec<StatusSnapshot>>,
}

impl RecordingProgress {
    pub fn new(store: EditStore) -> Self {
        Self {
            store,
            events: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: StageEvent) {
        if let Ok(snapshot) = self.store.snapshot(&event.edit_id) {
            self.snapshots.lock().unwrap().push(snapshot);
        }
        self.events.lock().unwrap().push(event);
    }
}
