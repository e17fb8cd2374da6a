//! Illustration synthesis stage and its consistency protocol.
//!
//! One image session per stage invocation, indices generated strictly in
//! order, each image persisted before the next is requested. Already
//! complete indices are skipped, so a resume only pays for what is missing.
//! The reference likeness is re-attached on a fixed cadence to counter
//! drift over long sessions; any mid-session error abandons the session and
//! surfaces as a consistency break carrying the persisted count.

use std::fs;
use tracing::{debug, info, warn};

use storyforge_config::PipelineConfig;
use storyforge_providers::{ImageData, ImageProvider, ImageSeed, ImageTurn};
use storyforge_store::ArtifactStore;
use storyforge_types::{
    JobConfig, JobId, Narrative, PageRole, StageError, StoryforgeError, ValidationError,
};

/// Generate every missing illustration for a job.
///
/// # Errors
/// `StageError::ConsistencyBreak` on any mid-session failure,
/// `StageError::Provider` if the session cannot be opened,
/// `ValidationError::ReferencePhoto` if the configured reference photo is
/// unreadable.
pub(crate) async fn run(
    image: &dyn ImageProvider,
    artifacts: &ArtifactStore,
    pipeline: &PipelineConfig,
    job_id: &JobId,
    config: &JobConfig,
    narrative: &Narrative,
) -> Result<(), StoryforgeError> {
    let total = config.illustration_count();
    let reference = load_reference(config)?;

    let mut session = image
        .open_session(ImageSeed {
            directive: subject_directive(config),
            reference: reference.clone(),
        })
        .await
        .map_err(StageError::Provider)?;

    for index in 0..total {
        if artifacts.illustration_complete(job_id, index) {
            debug!(job_id = %job_id, index, "illustration already persisted, skipping");
            continue;
        }

        let prompt = prompt_for(index, config, narrative);
        let reinforce = reference.is_some() && index % pipeline.reinforcement_cadence == 0;
        let turn = ImageTurn {
            prompt: prompt.clone(),
            reference: if reinforce { reference.clone() } else { None },
        };

        debug!(job_id = %job_id, index, reinforce, "requesting illustration");

        match session.next_image(turn).await {
            Ok(generated) => {
                artifacts.put_illustration(
                    job_id,
                    index,
                    &generated.bytes,
                    &prompt,
                    generated.width,
                    generated.height,
                )?;
            }
            Err(e) => {
                let completed = artifacts.illustration_indices(job_id)?.len() as u32;
                warn!(
                    job_id = %job_id,
                    index,
                    completed,
                    total,
                    error = %e,
                    "image session broke"
                );
                return Err(StageError::ConsistencyBreak {
                    completed,
                    total,
                    reason: e.to_string(),
                }
                .into());
            }
        }
    }

    info!(job_id = %job_id, total, "illustration set complete");
    Ok(())
}

/// The appearance-and-style directive that seeds every session for this
/// job. Deterministic for a given config, so a re-opened session after a
/// break is seeded identically.
fn subject_directive(config: &JobConfig) -> String {
    let mut directive = format!(
        "You are illustrating a children's book in a consistent {} style. \
         The main character is {}, age {}.",
        config.style, config.child.name, config.child.age
    );
    if !config.child.appearance.trim().is_empty() {
        directive.push_str(&format!(
            " {} looks like this: {}.",
            config.child.name, config.child.appearance
        ));
    }
    if let Some(pet) = &config.pet {
        directive.push_str(&format!(
            " {} is accompanied by a {} named {}",
            config.child.name, pet.species, pet.name
        ));
        if pet.appearance.trim().is_empty() {
            directive.push('.');
        } else {
            directive.push_str(&format!(" ({}).", pet.appearance));
        }
    }
    directive.push_str(
        " Keep the characters' faces, hair, proportions, clothing and the overall \
         palette identical across every image in this conversation.",
    );
    directive
}

fn prompt_for(index: u32, config: &JobConfig, narrative: &Narrative) -> String {
    match PageRole::of_index(index, config.page_count) {
        PageRole::FrontCover => format!(
            "Front cover: a striking full-page scene introducing {} for the book \
             titled \"{}\". Leave calm space near the top for the title text.",
            config.child.name, narrative.title
        ),
        PageRole::Story(page) => {
            let directive = narrative
                .pages
                .get(page as usize - 1)
                .map_or("the next scene of the story", |p| {
                    p.illustration_directive.as_str()
                });
            format!("Story page {page}: {directive}")
        }
        PageRole::BackCover => format!(
            "Back cover: a quiet closing scene of {} at the end of the adventure, \
             same setting as the story, suitable behind a short farewell text.",
            config.child.name
        ),
    }
}

/// Load the configured reference photo, if any.
fn load_reference(config: &JobConfig) -> Result<Option<ImageData>, ValidationError> {
    let Some(path) = &config.reference_photo else {
        return Ok(None);
    };
    let mime = match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        other => {
            return Err(ValidationError::ReferencePhoto {
                reason: format!("unsupported extension {other:?} for {path}"),
            });
        }
    };
    let bytes = fs::read(path).map_err(|e| ValidationError::ReferencePhoto {
        reason: format!("cannot read {path}: {e}"),
    })?;
    Ok(Some(ImageData {
        mime: mime.to_string(),
        bytes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use storyforge_providers::{GeneratedImage, ImageSession, ProviderError};
    use storyforge_store::StorePaths;
    use storyforge_types::{ChildDescriptor, NarrativePage, PetDescriptor, StorySource};
    use tempfile::TempDir;

    fn config(page_count: u32) -> JobConfig {
        JobConfig {
            child: ChildDescriptor {
                name: "Mara".into(),
                age: 6,
                appearance: "curly red hair, green eyes".into(),
            },
            pet: Some(PetDescriptor {
                name: "Biscuit".into(),
                species: "dog".into(),
                appearance: "small and scruffy".into(),
            }),
            interests: vec![],
            traits: vec![],
            style: "watercolor".into(),
            story: StorySource::Prompt {
                text: "a garden adventure".into(),
            },
            page_count,
            reference_photo: None,
        }
    }

    fn narrative(pages: u32) -> Narrative {
        Narrative {
            title: "The Garden Egg".into(),
            pages: (1..=pages)
                .map(|index| NarrativePage {
                    index,
                    text: format!("Page {index}."),
                    illustration_directive: format!("Mara in scene {index}"),
                })
                .collect(),
        }
    }

    /// Records every turn; optionally fails at a given index.
    struct FakeProvider {
        turns: Arc<Mutex<Vec<(String, bool)>>>,
        fail_at: Option<u32>,
    }

    struct FakeSession {
        turns: Arc<Mutex<Vec<(String, bool)>>>,
        fail_at: Option<u32>,
        served: u32,
    }

    #[async_trait]
    impl ImageProvider for FakeProvider {
        async fn open_session(
            &self,
            _seed: ImageSeed,
        ) -> Result<Box<dyn ImageSession>, ProviderError> {
            Ok(Box::new(FakeSession {
                turns: Arc::clone(&self.turns),
                fail_at: self.fail_at,
                served: 0,
            }))
        }
    }

    #[async_trait]
    impl ImageSession for FakeSession {
        async fn next_image(&mut self, turn: ImageTurn) -> Result<GeneratedImage, ProviderError> {
            if Some(self.served) == self.fail_at {
                return Err(ProviderError::Outage("mid-session 503".into()));
            }
            self.served += 1;
            self.turns
                .lock()
                .unwrap()
                .push((turn.prompt, turn.reference.is_some()));
            Ok(GeneratedImage {
                bytes: format!("img:{}", self.served).into_bytes(),
                mime: "image/png".into(),
                width: 512,
                height: 512,
            })
        }
    }

    fn artifacts(dir: &TempDir) -> ArtifactStore {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        ArtifactStore::new(StorePaths::new(root))
    }

    #[tokio::test]
    async fn generates_all_indices_in_order() {
        let dir = TempDir::new().unwrap();
        let store = artifacts(&dir);
        let job_id = JobId::new();
        let turns = Arc::new(Mutex::new(Vec::new()));
        let provider = FakeProvider {
            turns: Arc::clone(&turns),
            fail_at: None,
        };

        run(
            &provider,
            &store,
            &PipelineConfig::default(),
            &job_id,
            &config(3),
            &narrative(3),
        )
        .await
        .unwrap();

        let turns = turns.lock().unwrap();
        assert_eq!(turns.len(), 5);
        assert!(turns[0].0.starts_with("Front cover"));
        assert!(turns[1].0.contains("Mara in scene 1"));
        assert!(turns[4].0.starts_with("Back cover"));
        assert_eq!(
            store.illustration_indices(&job_id).unwrap(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn skips_already_persisted_indices() {
        let dir = TempDir::new().unwrap();
        let store = artifacts(&dir);
        let job_id = JobId::new();
        for index in [0, 1] {
            store
                .put_illustration(&job_id, index, b"old", "p", 512, 512)
                .unwrap();
        }

        let turns = Arc::new(Mutex::new(Vec::new()));
        let provider = FakeProvider {
            turns: Arc::clone(&turns),
            fail_at: None,
        };

        run(
            &provider,
            &store,
            &PipelineConfig::default(),
            &job_id,
            &config(3),
            &narrative(3),
        )
        .await
        .unwrap();

        // Only indices 2..=4 hit the provider; 0 and 1 are untouched.
        assert_eq!(turns.lock().unwrap().len(), 3);
        assert_eq!(store.read_illustration_bytes(&job_id, 0).unwrap(), b"old");
    }

    #[tokio::test]
    async fn mid_session_failure_is_a_consistency_break() {
        let dir = TempDir::new().unwrap();
        let store = artifacts(&dir);
        let job_id = JobId::new();
        let provider = FakeProvider {
            turns: Arc::new(Mutex::new(Vec::new())),
            fail_at: Some(2),
        };

        let err = run(
            &provider,
            &store,
            &PipelineConfig::default(),
            &job_id,
            &config(3),
            &narrative(3),
        )
        .await
        .unwrap_err();

        match err {
            StoryforgeError::Stage(StageError::ConsistencyBreak {
                completed, total, ..
            }) => {
                assert_eq!(completed, 2);
                assert_eq!(total, 5);
            }
            other => panic!("expected ConsistencyBreak, got {other}"),
        }
        // What was persisted before the break survives.
        assert_eq!(store.illustration_indices(&job_id).unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn reinforcement_follows_cadence_with_reference() {
        let dir = TempDir::new().unwrap();
        let store = artifacts(&dir);
        let job_id = JobId::new();

        let photo = dir.path().join("mara.png");
        std::fs::File::create(&photo)
            .unwrap()
            .write_all(b"\x89PNG-ish")
            .unwrap();
        let mut cfg = config(8);
        cfg.reference_photo = Some(Utf8PathBuf::from_path_buf(photo).unwrap());

        let turns = Arc::new(Mutex::new(Vec::new()));
        let provider = FakeProvider {
            turns: Arc::clone(&turns),
            fail_at: None,
        };

        run(
            &provider,
            &store,
            &PipelineConfig::default(),
            &job_id,
            &cfg,
            &narrative(8),
        )
        .await
        .unwrap();

        // Default cadence is 5: indices 0 and 5 carry the reference.
        let reinforced: Vec<usize> = turns
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, (_, with_ref))| *with_ref)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reinforced, vec![0, 5]);
    }

    #[tokio::test]
    async fn no_reference_means_no_reinforcement_turns() {
        let dir = TempDir::new().unwrap();
        let store = artifacts(&dir);
        let job_id = JobId::new();
        let turns = Arc::new(Mutex::new(Vec::new()));
        let provider = FakeProvider {
            turns: Arc::clone(&turns),
            fail_at: None,
        };

        run(
            &provider,
            &store,
            &PipelineConfig::default(),
            &job_id,
            &config(6),
            &narrative(6),
        )
        .await
        .unwrap();

        assert!(turns.lock().unwrap().iter().all(|(_, with_ref)| !with_ref));
    }

    #[test]
    fn unreadable_reference_photo_rejected() {
        let mut cfg = config(3);
        cfg.reference_photo = Some(Utf8PathBuf::from("/nonexistent/mara.png"));
        assert!(matches!(
            load_reference(&cfg),
            Err(ValidationError::ReferencePhoto { .. })
        ));

        cfg.reference_photo = Some(Utf8PathBuf::from("/tmp/mara.bmp"));
        assert!(load_reference(&cfg).is_err());
    }

    #[test]
    fn directive_names_style_child_and_pet() {
        let d = subject_directive(&config(3));
        assert!(d.contains("watercolor"));
        assert!(d.contains("Mara"));
        assert!(d.contains("curly red hair"));
        assert!(d.contains("Biscuit"));
    }
}
