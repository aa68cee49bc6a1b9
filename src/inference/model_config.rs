/// Decoding parameters for every request. They are fixed for the lifetime of
/// the process, callers cannot change them.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub max_input_tokens: usize,
    pub no_repeat_ngram_size: usize,
    pub num_beams: usize,
    pub temperature: f64,
    pub repetition_penalty: f32,
    pub length_penalty: f64,
    pub early_stopping: bool,
}

impl Default for GenerationConfig {
    #[tracing::instrument(level = "trace", skip())]
    fn default() -> Self {
        Self {
            max_new_tokens: 150,
            max_input_tokens: 512,
            no_repeat_ngram_size: 4,
            num_beams: 10,
            temperature: 0.3,
            repetition_penalty: 2.0,
            length_penalty: 1.0,
            early_stopping: true,
        }
    }
}
