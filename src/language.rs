use tracing::debug;
use whatlang::Lang;

/// Sent instead of a model answer when a prompt is not in English.
pub const REDIRECT_MESSAGE: &str =
    "Sorry, I can only help with questions in English. Could you please rephrase your question in English?";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub lang: Lang,
    /// Between 0.0 and 1.0
    pub confidence: f64,
}

pub trait LanguageDetector: Send + Sync {
    /// Returns `None` when the language cannot be determined.
    fn detect(&self, text: &str) -> Option<Detection>;
}

/// Trigram based detection, no model files involved.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<Detection> {
        whatlang::detect(text).map(|info| Detection {
            lang: info.lang(),
            confidence: info.confidence(),
        })
    }
}

/// Lets through prompts that are confidently English.
pub struct LanguageGate {
    detector: Box<dyn LanguageDetector>,
    min_confidence: f64,
}

impl LanguageGate {
    pub fn new(detector: Box<dyn LanguageDetector>, min_confidence: f64) -> Self {
        Self {
            detector,
            min_confidence,
        }
    }

    pub fn whatlang(min_confidence: f64) -> Self {
        Self::new(Box::new(WhatlangDetector), min_confidence)
    }

    /// Unknown languages are refused like any other non-English input.
    pub fn admits(&self, text: &str) -> bool {
        match self.detector.detect(text) {
            Some(detection) => {
                debug!(
                    "Detected {} with confidence {:.2}",
                    detection.lang.code(),
                    detection.confidence
                );
                detection.lang == Lang::Eng && detection.confidence >= self.min_confidence
            }
            None => {
                debug!("Language detection failed, treating prompt as unknown");
                false
            }
        }
    }
}
