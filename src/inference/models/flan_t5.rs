use std::sync::Mutex;

use anyhow::{Error, Result};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tracing::{debug, warn};

use crate::inference::model_config::GenerationConfig;
use crate::inference::models::model::{ModelBase, ModelSource};
use crate::inference::task::ask::AskHandler;
use crate::inference::text_pipeline::{select_device, Seq2SeqPipeline, SnapshotFiles};

const TOKENIZER_FILENAME: &str = "tokenizer.json";
const CONFIG_FILENAME: &str = "config.json";
const WEIGHTS_FILENAME: &str = "model.safetensors";

/// A FLAN-T5 checkpoint fine-tuned on vocabulary questions.
pub struct FlanT5Model {
    base: ModelBase,
    // One generation at a time per device
    generator_pipeline: Mutex<Seq2SeqPipeline>,
}

impl FlanT5Model {
    #[tracing::instrument(level = "info", skip(generation_config))]
    pub fn new(base: ModelBase, cpu: bool, generation_config: GenerationConfig) -> Result<Self> {
        let files = resolve_snapshot(&base.source)?;
        let device = select_device(cpu)?;
        let generator_pipeline =
            Seq2SeqPipeline::with_t5_safetensors(&files, device, generation_config)?;

        Ok(FlanT5Model {
            base,
            generator_pipeline: Mutex::new(generator_pipeline),
        })
    }

    pub fn base(&self) -> &ModelBase {
        &self.base
    }
}

fn resolve_snapshot(source: &ModelSource) -> Result<SnapshotFiles> {
    match source {
        ModelSource::Local(dir) => {
            let files = SnapshotFiles {
                tokenizer: dir.join(TOKENIZER_FILENAME),
                config: dir.join(CONFIG_FILENAME),
                weights: dir.join(WEIGHTS_FILENAME),
            };
            for path in [&files.tokenizer, &files.config, &files.weights] {
                if !path.is_file() {
                    anyhow::bail!("Model snapshot file {} not found", path.display());
                }
            }
            Ok(files)
        }
        ModelSource::Hub { repo_id, revision } => {
            let repo = Api::new()?.repo(Repo::with_revision(
                repo_id.clone(),
                RepoType::Model,
                revision.clone(),
            ));
            Ok(SnapshotFiles {
                tokenizer: repo.get(TOKENIZER_FILENAME)?,
                config: repo.get(CONFIG_FILENAME)?,
                weights: repo.get(WEIGHTS_FILENAME)?,
            })
        }
    }
}

impl AskHandler for FlanT5Model {
    #[tracing::instrument(level = "info", skip(self, prompt))]
    fn run_ask(&self, prompt: &str) -> Result<String, Error> {
        let mut pipeline = self.generator_pipeline.lock().unwrap_or_else(|poisoned| {
            warn!("Model lock was poisoned by a failed generation, reusing it");
            poisoned.into_inner()
        });
        let generation = pipeline.generate(prompt)?;
        debug!(
            "Generated {} tokens (cap {}) in {:.2}s",
            generation.generated_tokens,
            pipeline.generation_config().max_new_tokens,
            generation.inference_time
        );

        Ok(generation.text)
    }
}
