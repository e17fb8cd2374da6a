#![allow(dead_code)]

//! Shared fakes and fixtures for the integration tests.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use storyforge::{ChildDescriptor, Config, JobConfig, StorySource};
use storyforge_providers::{
    GeneratedImage, ImageProvider, ImageSeed, ImageSession, ImageTurn, ProviderError,
    TextProvider, TextRequest, TextResult,
};

/// Text provider returning a well-formed narrative (or garbage on demand),
/// counting every call.
pub struct FakeText {
    pub calls: AtomicU32,
    malformed: bool,
}

impl FakeText {
    pub fn good() -> Self {
        Self {
            calls: AtomicU32::new(0),
            malformed: false,
        }
    }

    pub fn malformed() -> Self {
        Self {
            calls: AtomicU32::new(0),
            malformed: true,
        }
    }
}

#[async_trait]
impl TextProvider for FakeText {
    async fn generate(&self, request: TextRequest) -> Result<TextResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.malformed {
            return Ok(TextResult::new("no json here, sorry", "fake", "fake"));
        }
        // Page count is parsed back out of the request so one fake serves
        // any job configuration.
        let page_count = request
            .messages
            .iter()
            .find_map(|m| {
                m.content
                    .split_whitespace()
                    .find_map(|w| w.strip_suffix("-page").and_then(|n| n.parse::<u32>().ok()))
            })
            .unwrap_or(1);
        let pages: Vec<String> = (1..=page_count)
            .map(|i| {
                format!(
                    r#"{{"index": {i}, "text": "Page {i} of the story.", "illustration_directive": "Scene {i}"}}"#
                )
            })
            .collect();
        Ok(TextResult::new(
            format!(r#"{{"title": "The Adventure", "pages": [{}]}}"#, pages.join(",")),
            "fake",
            "fake",
        ))
    }
}

/// One observed image turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub session: u32,
    pub prompt: String,
    pub with_reference: bool,
}

/// Image provider that records every session and turn, and can be told to
/// break the next session after serving N images. Cloning shares state, so
/// tests keep a handle to inspect after handing one to the pipeline.
#[derive(Clone, Default)]
pub struct FakeImages {
    inner: Arc<FakeImagesInner>,
}

#[derive(Default)]
struct FakeImagesInner {
    sessions_opened: AtomicU32,
    turns: Mutex<Vec<Turn>>,
    fail_after: Mutex<Option<u32>>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_opened(&self) -> u32 {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// Break the next opened session after it has served this many images.
    pub fn fail_next_session_after(&self, served: u32) {
        *self.inner.fail_after.lock().unwrap() = Some(served);
    }

    pub fn recorded_turns(&self) -> Vec<Turn> {
        self.inner.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageProvider for FakeImages {
    async fn open_session(
        &self,
        _seed: ImageSeed,
    ) -> Result<Box<dyn ImageSession>, ProviderError> {
        let session = self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_after = self.inner.fail_after.lock().unwrap().take();
        Ok(Box::new(FakeSession {
            shared: Arc::clone(&self.inner),
            session,
            served: 0,
            fail_after,
        }))
    }
}

struct FakeSession {
    shared: Arc<FakeImagesInner>,
    session: u32,
    served: u32,
    fail_after: Option<u32>,
}

#[async_trait]
impl ImageSession for FakeSession {
    async fn next_image(&mut self, turn: ImageTurn) -> Result<GeneratedImage, ProviderError> {
        if Some(self.served) == self.fail_after {
            return Err(ProviderError::Outage("injected mid-session failure".into()));
        }
        self.shared.turns.lock().unwrap().push(Turn {
            session: self.session,
            prompt: turn.prompt,
            with_reference: turn.reference.is_some(),
        });
        self.served += 1;
        Ok(GeneratedImage {
            bytes: format!("s{}t{}", self.session, self.served).into_bytes(),
            mime: "image/png".into(),
            width: 1024,
            height: 1024,
        })
    }
}

/// Configuration rooted in a temp dir, with zero backoff so retry tests do
/// not sleep.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    config.scheduler.backoff_base_secs = 0;
    config.scheduler.backoff_cap_secs = 0;
    config
}

pub fn job_config(page_count: u32) -> JobConfig {
    JobConfig {
        child: ChildDescriptor {
            name: "Mara".into(),
            age: 6,
            appearance: "curly red hair, green eyes".into(),
        },
        pet: None,
        interests: vec!["dinosaurs".into()],
        traits: vec!["curious".into()],
        style: "watercolor".into(),
        story: StorySource::Prompt {
            text: "Mara finds a dinosaur egg in the garden".into(),
        },
        page_count,
        reference_photo: None,
    }
}

/// Drop a small fake photo into the temp dir and return its path.
pub fn write_photo(dir: &TempDir) -> Utf8PathBuf {
    let path = dir.path().join("reference.png");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"\x89PNG fake photo bytes").unwrap();
    Utf8PathBuf::from_path_buf(path).unwrap()
}
