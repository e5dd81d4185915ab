//! Kokoro speech engine: text → phonemes → ONNX inference → rodio playback.
//!
//! 1. Segment → phonemes (misaki-rs G2P)
//! 2. Phonemes → token IDs (tokenizer.json vocabulary)
//! 3. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 4. Audio → rodio Sink, blocking until playback drains

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use ndarray::{Array1, Array2, Array3};
use ndarray_npy::NpzReader;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, info};

use super::{lock, SpeechEngine, SpeechError};
use crate::config::SpeechConfig;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const STYLE_DIM: usize = 256;
/// Words per minute that map to Kokoro speed 1.0.
const NATURAL_RATE: f32 = 200.0;
const DEFAULT_VOICE: &str = "af_heart";

pub struct KokoroEngine {
    // ort 2.0 Session::run needs &mut
    session: Mutex<Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    /// Voice name → style vectors indexed by token count, shape (510, 256).
    styles: HashMap<String, Array2<f32>>,
    voice_names: Vec<String>,
    voice: Mutex<String>,
    speed: Mutex<f32>,
    // Kept alive for the engine's lifetime
    output: OutputStream,
}

impl KokoroEngine {
    /// Load model, voices, tokenizer and phonemizer, and open the audio device.
    /// Blocking; run it on the blocking pool.
    pub fn load(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let t0 = Instant::now();
        let model_path = SpeechConfig::resolve(&config.model_path, "kokoro-v1.0.onnx");
        let voices_path = SpeechConfig::resolve(&config.voices_path, "voices-v1.0.bin");
        let tokenizer_path = SpeechConfig::resolve(&config.tokenizer_path, "tokenizer.json");

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_vocab(&tokenizer_path)?;

        info!("Loading voices from {}", voices_path.display());
        let styles = load_styles(&voices_path)?;
        let mut voice_names: Vec<String> = styles.keys().cloned().collect();
        voice_names.sort();
        let voice = if styles.contains_key(DEFAULT_VOICE) {
            DEFAULT_VOICE.to_string()
        } else {
            voice_names
                .first()
                .cloned()
                .ok_or_else(|| SpeechError::Load("voices file holds no voices".into()))?
        };

        info!("Loading ONNX model from {}", model_path.display());
        let session = Session::builder()
            .map_err(|e| SpeechError::Load(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SpeechError::Load(format!("optimization level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| SpeechError::Load(format!("thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| SpeechError::Load(format!("{}: {e}", model_path.display())))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        let output = OutputStreamBuilder::open_default_stream()
            .map_err(|e| SpeechError::Audio(e.to_string()))?;

        info!(
            "Kokoro loaded in {}ms: {} tokens, {} voices (default {voice})",
            t0.elapsed().as_millis(),
            vocab.len(),
            voice_names.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            styles,
            voice_names,
            voice: Mutex::new(voice),
            speed: Mutex::new(1.0),
            output,
        })
    }

    fn tokenize(&self, phonemes: &str) -> Vec<i64> {
        // Unknown characters are dropped; 0 pads both ends.
        let mut ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        ids.push(0);
        ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        ids.push(0);
        ids.truncate(MAX_TOKENS);
        ids
    }

    fn synthesize(&self, text: &str) -> Result<Vec<f32>, SpeechError> {
        let (phonemes, _) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| SpeechError::Synthesis(format!("phonemization: {e}")))?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        let token_ids = self.tokenize(&phonemes);
        let n_tokens = token_ids.len();

        let voice = lock(&self.voice).clone();
        let styles = self
            .styles
            .get(&voice)
            .ok_or_else(|| SpeechError::UnknownVoice(voice.clone()))?;
        let style_idx = n_tokens.saturating_sub(2).min(styles.nrows() - 1);
        let style: Vec<f32> = styles.row(style_idx).to_vec();
        let speed = *lock(&self.speed);

        let synthesis = |e: &dyn std::fmt::Display| SpeechError::Synthesis(e.to_string());
        let tokens = Tensor::from_array(
            Array2::from_shape_vec((1, n_tokens), token_ids).map_err(|e| synthesis(&e))?,
        )
        .map_err(|e| synthesis(&e))?;
        let style = Tensor::from_array(
            Array2::from_shape_vec((1, STYLE_DIM), style).map_err(|e| synthesis(&e))?,
        )
        .map_err(|e| synthesis(&e))?;
        let speed = Tensor::from_array(Array1::from_vec(vec![speed])).map_err(|e| synthesis(&e))?;

        let mut session = lock(&self.session);
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens,
                "style" => style,
                "speed" => speed
            ])
            .map_err(|e| SpeechError::Synthesis(format!("inference: {e}")))?;

        let first = outputs
            .iter()
            .next()
            .ok_or_else(|| SpeechError::Synthesis("model produced no output".into()))?;
        let (_, audio) = first.1.try_extract_tensor::<f32>().map_err(|e| synthesis(&e))?;

        let samples = audio.to_vec();
        debug!(
            "Synthesized {} samples ({:.1}s) for {n_tokens} tokens",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }
}

impl SpeechEngine for KokoroEngine {
    fn voices(&self) -> Vec<String> {
        self.voice_names.clone()
    }

    fn set_rate(&self, words_per_minute: u32) -> Result<(), SpeechError> {
        let speed = (words_per_minute as f32 / NATURAL_RATE).clamp(0.5, 2.0);
        *lock(&self.speed) = speed;
        debug!("Speech rate {words_per_minute} wpm → speed {speed:.2}");
        Ok(())
    }

    fn set_voice(&self, voice: &str) -> Result<(), SpeechError> {
        if !self.styles.contains_key(voice) {
            return Err(SpeechError::UnknownVoice(voice.to_string()));
        }
        *lock(&self.voice) = voice.to_string();
        debug!("Voice set to {voice}");
        Ok(())
    }

    fn say_and_wait(&self, text: &str) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let samples = self.synthesize(text)?;
        if samples.is_empty() {
            return Ok(());
        }

        let sink = Sink::connect_new(self.output.mixer());
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
        sink.sleep_until_end();
        Ok(())
    }
}

/// Character → token ID map from tokenizer.json (`model.vocab`).
fn load_vocab(path: &Path) -> Result<HashMap<char, i64>, SpeechError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| SpeechError::Load(format!("{}: {e}", path.display())))?;
    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| SpeechError::Load(format!("tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| SpeechError::Load("missing model.vocab in tokenizer.json".into()))?;

    vocab
        .iter()
        .filter_map(|(token, id)| token.chars().next().map(|ch| (ch, id)))
        .map(|(ch, id)| {
            id.as_i64()
                .map(|id| (ch, id))
                .ok_or_else(|| SpeechError::Load(format!("token id for {ch:?} is not an integer")))
        })
        .collect()
}

/// Voice style arrays from the NPZ bundle, each (510, 1, 256) squeezed to (510, 256).
fn load_styles(path: &Path) -> Result<HashMap<String, Array2<f32>>, SpeechError> {
    let file = fs::File::open(path)
        .map_err(|e| SpeechError::Load(format!("{}: {e}", path.display())))?;
    let mut npz = NpzReader::new(file).map_err(|e| SpeechError::Load(format!("voices NPZ: {e}")))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| SpeechError::Load(format!("voices NPZ entries: {e}")))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut styles = HashMap::with_capacity(names.len());
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| SpeechError::Load(format!("voice '{name}': {e}")))?;
        let (rows, cols) = (arr.shape()[0], arr.shape()[2]);
        let squeezed = arr
            .into_shape_with_order((rows, cols))
            .map_err(|e| SpeechError::Load(format!("voice '{name}': {e}")))?;
        styles.insert(name, squeezed);
    }
    Ok(styles)
}
