use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::inference::beam_search::{BeamSearch, Seq2SeqModel};
use crate::inference::model_config::GenerationConfig;

/// Files making up a model snapshot, resolved on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub weights: PathBuf,
}

#[derive(Debug)]
pub struct Generation {
    pub text: String,
    pub generated_tokens: usize,
    pub inference_time: f64,
}

/// Prefers an accelerator when one was compiled in and is present.
pub fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

struct T5Backend {
    model: t5::T5ForConditionalGeneration,
    device: Device,
    decoder_start_token: u32,
    eos_token: u32,
}

impl Seq2SeqModel for T5Backend {
    fn encode(&mut self, input_ids: &[u32]) -> Result<Tensor> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        Ok(self.model.encode(&input)?)
    }

    fn next_token_logits(
        &mut self,
        encoder_output: &Tensor,
        hypotheses: &[Vec<u32>],
    ) -> Result<Tensor> {
        let beams = hypotheses.len();
        let Some(length) = hypotheses.first().map(Vec::len) else {
            bail!("No hypotheses to score");
        };
        let (_, seq_len, hidden) = encoder_output.dims3()?;
        let flat: Vec<u32> = hypotheses.iter().flatten().copied().collect();
        let decoder_input = Tensor::from_vec(flat, (beams, length), &self.device)?;
        let encoder_output = encoder_output
            .broadcast_as((beams, seq_len, hidden))?
            .contiguous()?;

        // The whole hypothesis is fed every step, a stale cache would double it
        self.model.clear_kv_cache();
        let logits = self.model.decode(&decoder_input, &encoder_output)?;
        Ok(logits.to_dtype(DType::F32)?)
    }

    fn decoder_start_token(&self) -> u32 {
        self.decoder_start_token
    }

    fn eos_token(&self) -> u32 {
        self.eos_token
    }
}

/// Long prompts lose their tail instead of failing to encode.
fn limit_input_length(tokenizer: &mut Tokenizer, max_input_tokens: usize) -> Result<()> {
    tokenizer
        .with_padding(None)
        .with_truncation(Some(TruncationParams {
            max_length: max_input_tokens,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Invalid truncation settings: {e}"))?;
    Ok(())
}

// Adapted from
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/t5/main.rs
pub struct Seq2SeqPipeline {
    backend: T5Backend,
    tokenizer: Tokenizer,
    search: BeamSearch,
    generation_config: GenerationConfig,
}

impl Seq2SeqPipeline {
    pub fn with_t5_safetensors(
        files: &SnapshotFiles,
        device: Device,
        generation_config: GenerationConfig,
    ) -> Result<Seq2SeqPipeline> {
        let config = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let mut config: t5::Config = serde_json::from_str(&config)
            .with_context(|| format!("Invalid model config {}", files.config.display()))?;
        // Beams are rescored in one batch per step instead of extending a cache
        config.use_cache = false;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;
        limit_input_length(&mut tokenizer, generation_config.max_input_tokens)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)?
        };
        let model = t5::T5ForConditionalGeneration::load(vb, &config)?;
        info!(
            "Loaded T5 model with {} layers on {:?}",
            config.num_layers, device
        );

        let decoder_start_token = config
            .decoder_start_token_id
            .unwrap_or(config.pad_token_id) as u32;
        let backend = T5Backend {
            model,
            device,
            decoder_start_token,
            eos_token: config.eos_token_id as u32,
        };

        Ok(Seq2SeqPipeline {
            backend,
            tokenizer,
            search: BeamSearch::new(generation_config),
            generation_config,
        })
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    pub fn generate(&mut self, prompt: &str) -> Result<Generation> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("Cannot encode prompt: {e}"))?;
        let input_ids = encoding.get_ids();
        if input_ids.is_empty() {
            bail!("Prompt is empty");
        }
        debug!("Encoded prompt into {} tokens", input_ids.len());

        let start_gen = Instant::now();
        let output = self.search.generate(&mut self.backend, input_ids)?;
        let text = self
            .tokenizer
            .decode(&output, true)
            .map_err(|e| anyhow!("Cannot decode tokens: {e}"))?;

        Ok(Generation {
            text,
            generated_tokens: output.len(),
            inference_time: start_gen.elapsed().as_secs_f64(),
        })
    }
}
