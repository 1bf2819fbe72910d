use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

pub const DEFAULT_MODEL_ID: &str = "all-minilm-l6-v2";
const MODEL_DIR_NAME: &str = "logsift";

/// Text → vector function used by the indexing and query paths.
///
/// Implementations return exactly one vector per input text, in input order,
/// each of length [`Embedder::dimension`].
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    Fast,
    Stub,
}

impl EmbeddingMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported embedding mode '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }

    pub fn from_env() -> Result<Self> {
        let raw = env::var("LOGSIFT_EMBEDDING_MODE").unwrap_or_else(|_| "fast".to_string());
        Self::parse(&raw)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Stub => "stub",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModelId(String);

impl Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ModelId {
    fn from_raw(model_name: &str) -> Self {
        let model_name = model_name.trim().to_ascii_lowercase();
        let normalized = match model_name.as_str() {
            "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" | "minilm" => {
                DEFAULT_MODEL_ID.to_string()
            }
            "bge-small-en-v1.5" => "bge-small".to_string(),
            other => other.to_string(),
        };
        Self(normalized)
    }

    fn spec(&self) -> Result<ModelSpec> {
        let (dimension, max_length) = match self.0.as_str() {
            DEFAULT_MODEL_ID => (384, 256),
            "bge-small" => (384, 512),
            other => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Unknown embedding model '{other}' (known: {DEFAULT_MODEL_ID}, bge-small)"
                )))
            }
        };
        Ok(ModelSpec {
            id: self.clone(),
            dimension,
            max_length,
            max_batch: 32,
        })
    }
}

#[derive(Clone)]
struct ModelSpec {
    id: ModelId,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

impl ModelSpec {
    fn assets_in(&self, model_dir: &Path) -> ModelAssets {
        let model_dir = model_dir.join(self.id.to_string());
        ModelAssets {
            model_path: model_dir.join("model.onnx"),
            tokenizer_path: model_dir.join("tokenizer.json"),
        }
    }
}

struct ModelAssets {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
}

/// Resolve the directory holding `<model-id>/model.onnx` and `<model-id>/tokenizer.json`.
pub fn model_dir() -> PathBuf {
    if let Ok(path) = env::var("LOGSIFT_MODEL_DIR") {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var("XDG_CACHE_HOME") {
        return PathBuf::from(path).join(MODEL_DIR_NAME).join("models");
    }
    env::var("HOME")
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(".cache")
        .join(MODEL_DIR_NAME)
        .join("models")
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_batch: usize,
    dimension: usize,
}

fn embedding_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> VectorStoreError {
    move |err| VectorStoreError::EmbeddingError(format!("{context}: {err}"))
}

impl OrtBackend {
    fn new(spec: &ModelSpec, model_dir: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let assets = spec.assets_in(model_dir);
        if !assets.model_path.exists() || !assets.tokenizer_path.exists() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {} (set LOGSIFT_MODEL_DIR or pass --model-dir).",
                spec.id,
                assets.model_path.display(),
                assets.tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&assets.tokenizer_path)
            .map_err(embedding_error("Tokenizer load failed"))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(embedding_error("Tokenizer truncation failed"))?;

        let session = Session::builder()
            .map_err(embedding_error("ORT session setup failed"))?
            // Inference shares the machine with journald and the interactive prompt.
            .with_intra_threads(intra_threads())
            .map_err(embedding_error("Failed to set ORT intra threads"))?
            .with_inter_threads(1)
            .map_err(embedding_error("Failed to set ORT inter threads"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(embedding_error("Failed to set optimization level"))?
            .commit_from_file(&assets.model_path)
            .map_err(embedding_error("Failed to load ONNX model"))?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(chunk.to_vec(), true)
                .map_err(embedding_error("Tokenization failed"))?;
            let ids = token_matrix(&encodings, Encoding::get_ids)?;
            let mask = token_matrix(&encodings, Encoding::get_attention_mask)?;
            let states = self.forward(&ids, &mask)?;
            vectors.extend(pool_token_states(&states, &mask, self.dimension)?);
        }
        Ok(vectors)
    }

    /// One forward pass. Returns the `[batch, seq, hidden]` token states.
    fn forward(&self, ids: &Array2<i64>, mask: &Array2<i64>) -> Result<Array3<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VectorStoreError::LockPoisoned("ONNX session"))?;

        let mut feed: HashMap<String, DynTensor> = HashMap::new();
        for input in session.inputs() {
            let array = match input.name() {
                "input_ids" => ids.clone(),
                "attention_mask" => mask.clone(),
                // Log lines are single segments.
                "token_type_ids" => Array2::zeros(ids.dim()),
                other => {
                    return Err(VectorStoreError::EmbeddingError(format!(
                        "Unsupported ONNX input '{other}'"
                    )))
                }
            };
            let tensor = Tensor::from_array(array.into_dyn())
                .map_err(embedding_error("Failed to build input tensor"))?
                .upcast();
            feed.insert(input.name().to_string(), tensor);
        }

        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(embedding_error("ONNX forward failed"))?;
        if outputs.len() == 0 {
            return Err(VectorStoreError::EmbeddingError(
                "ONNX returned no outputs".to_string(),
            ));
        }
        let states = outputs[0]
            .try_extract_array::<f32>()
            .map_err(embedding_error("Failed to decode ONNX output"))?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .map_err(embedding_error("Expected [batch, seq, hidden] output"))?;
        Ok(states)
    }
}

fn intra_threads() -> usize {
    match std::thread::available_parallelism().map_or(1, usize::from) {
        0..=4 => 1,
        5..=12 => 2,
        _ => 4,
    }
}

/// Stack one per-token field of every encoding into a `[batch, seq]` matrix.
fn token_matrix(encodings: &[Encoding], field: fn(&Encoding) -> &[u32]) -> Result<Array2<i64>> {
    let seq_len = encodings.first().map_or(0, Encoding::len);
    let flat: Vec<i64> = encodings
        .iter()
        .flat_map(|encoding| field(encoding).iter().map(|v| i64::from(*v)))
        .collect();
    Array2::from_shape_vec((encodings.len(), seq_len), flat)
        .map_err(embedding_error("Inconsistent sequence lengths after padding"))
}

/// Masked mean over each sample's tokens, L2-normalized.
fn pool_token_states(
    states: &Array3<f32>,
    mask: &Array2<i64>,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(states.len_of(Axis(0)));
    for (tokens, row) in states.outer_iter().zip(mask.outer_iter()) {
        let mut pooled = mean_pool(tokens, row);
        if pooled.len() != dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: pooled.len(),
            });
        }
        normalize(&mut pooled);
        vectors.push(pooled);
    }
    Ok(vectors)
}

fn mean_pool(tokens: ArrayView2<'_, f32>, mask: ArrayView1<'_, i64>) -> Vec<f32> {
    let mut sum = Array1::<f32>::zeros(tokens.ncols());
    let mut kept = 0.0f32;
    for (token, _) in tokens
        .outer_iter()
        .zip(mask.iter())
        .filter(|(_, flag)| **flag != 0)
    {
        sum += &token;
        kept += 1.0;
    }
    if kept > 0.0 {
        sum /= kept;
    }
    sum.to_vec()
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic unit vector seeded from the text bytes.
fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let seed = fnv1a_64(text.as_bytes());
    let mut vec: Vec<f32> = (0..dimension as u64)
        .map(|i| {
            let bits = mix64(seed ^ i.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA));
            // top 24 bits, spread over [-1, 1)
            (bits >> 40) as f32 / (1u32 << 23) as f32 - 1.0
        })
        .collect();
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

const fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Embedding model backed by ONNX Runtime, or a deterministic stub.
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    dimension: usize,
}

enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub,
}

impl EmbeddingModel {
    /// Load `model_id` from `model_dir` (fast mode) or build a stub of the
    /// model's dimension. Fails if the model is unknown or its assets are missing.
    pub fn load(mode: EmbeddingMode, model_id: &str, model_dir: &Path) -> Result<Self> {
        let spec = ModelId::from_raw(model_id).spec()?;
        match mode {
            EmbeddingMode::Stub => {
                log::info!("Using stub embeddings (dim {})", spec.dimension);
                Ok(Self::stub(spec.dimension))
            }
            EmbeddingMode::Fast => {
                let backend = OrtBackend::new(&spec, model_dir)?;
                Ok(Self {
                    dimension: spec.dimension,
                    backend: EmbeddingBackend::Ort(Arc::new(backend)),
                })
            }
        }
    }

    #[must_use]
    pub const fn stub(dimension: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Stub,
            dimension,
        }
    }

    #[must_use]
    pub const fn is_stub(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Stub)
    }
}

#[async_trait]
impl Embedder for EmbeddingModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        match &self.backend {
            EmbeddingBackend::Stub => Ok(texts
                .iter()
                .map(|text| stub_embed(text, self.dimension))
                .collect()),
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                let owned = texts.to_vec();
                spawn_blocking(move || backend.embed_batch_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_modes() {
        assert_eq!(EmbeddingMode::parse("STUB").unwrap(), EmbeddingMode::Stub);
        assert_eq!(EmbeddingMode::parse(" fast ").unwrap(), EmbeddingMode::Fast);
        assert!(EmbeddingMode::parse("gpu").is_err());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = EmbeddingModel::load(EmbeddingMode::Stub, "nope", Path::new("."));
        assert!(err.is_err());
    }

    #[test]
    fn missing_assets_fail_fast_mode() {
        let dir = tempfile::tempdir().unwrap();
        let err = EmbeddingModel::load(EmbeddingMode::Fast, DEFAULT_MODEL_ID, dir.path())
            .err()
            .expect("missing model must fail");
        assert!(err.to_string().contains("missing"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn stub_is_deterministic_and_normalized() {
        let model = EmbeddingModel::load(EmbeddingMode::Stub, "minilm", Path::new(".")).unwrap();
        assert!(model.is_stub());
        assert_eq!(model.dimension(), 384);

        let texts = vec!["disk full".to_string(), "disk full".to_string(), "ok".to_string()];
        let vectors = model.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[1]);
        assert_ne!(vectors[0], vectors[2]);

        let norm: f32 = vectors[2].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn embed_single_matches_batch() {
        let model = EmbeddingModel::stub(8);
        let single = model.embed("sshd: accepted key").await.unwrap();
        let batch = model
            .embed_batch(&["sshd: accepted key".to_string()])
            .await
            .unwrap();
        assert_eq!(single, batch[0]);
    }

    #[test]
    fn mean_pool_ignores_masked_tokens() {
        let sample = ndarray::arr2(&[[1.0f32, 3.0], [3.0, 5.0], [100.0, 100.0]]);
        let pooled = mean_pool(sample.view(), ndarray::arr1(&[1, 1, 0]).view());
        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn token_states_pool_to_unit_vectors() {
        let states = ndarray::arr3(&[
            [[3.0f32, 0.0], [3.0, 8.0]],
            [[0.0, 2.0], [9.0, 9.0]],
        ]);
        let mask = ndarray::arr2(&[[1i64, 1], [1, 0]]);

        let vectors = pool_token_states(&states, &mask, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.6, 0.8], vec![0.0, 1.0]]);

        let err = pool_token_states(&states, &mask, 3).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    #[ignore = "Requires ONNX model assets under LOGSIFT_MODEL_DIR"]
    async fn test_embed_batch_onnx() {
        let model =
            EmbeddingModel::load(EmbeddingMode::Fast, DEFAULT_MODEL_ID, &model_dir()).unwrap();
        let texts = vec!["hello world".to_string(), "foo bar".to_string()];
        let embeddings = model.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        for emb in embeddings {
            assert_eq!(emb.len(), model.dimension());
        }
    }
}
