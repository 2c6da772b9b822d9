// embedder.rs — Public facade: resolve the model, own one engine, embed texts.

use std::collections::BTreeMap;

use crate::embeddings::download::ModelResolver;
use crate::embeddings::engine::{EmbeddingEngine, GgufBertEngine};
use crate::embeddings::source::{CachedModelFile, ModelReference};
use crate::embeddings::types::{EmbedderConfig, EmbeddingVector, NormalizationType, TokenizeOptions, TokenizedBatch};
use crate::error::{EmbedderError, Result};

/// Owns exactly one loaded engine for its whole lifetime. Construction either yields a
/// usable embedder or fails; there is no half-initialized state.
pub struct Embedder<E: EmbeddingEngine = GgufBertEngine> {
    engine: E,
    config: EmbedderConfig,
    model: CachedModelFile,
}

impl<E: EmbeddingEngine> Embedder<E> {
    pub fn new(reference: ModelReference, config: EmbedderConfig, resolver: &ModelResolver) -> Result<Self> {
        // Directory check happens before any download or engine work.
        reference.validate()?;

        let model = resolver.resolve(&reference)?;
        log::info!(
            "Initializing embedder for {} (pooling={}, normalization={})",
            model.path.display(),
            config.pooling,
            config.normalization
        );

        let engine = E::load(&model.path, config.pooling)?;
        Ok(Self {
            engine,
            config,
            model,
        })
    }

    /// One vector per input text, same order.
    pub fn embed_texts<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<EmbeddingVector>> {
        self.embed_texts_with(texts, self.config.normalization)
    }

    /// Like [`Embedder::embed_texts`], with a normalization other than the configured one.
    /// The loaded engine is shared, so one embedder serves every normalization.
    pub fn embed_texts_with<S: AsRef<str>>(
        &self,
        texts: &[S],
        normalization: NormalizationType,
    ) -> Result<Vec<EmbeddingVector>> {
        let texts = non_empty(texts)?;
        let vectors = self.engine.embed(&texts, normalization)?;
        if vectors.len() != texts.len() {
            return Err(EmbedderError::Engine(format!(
                "engine returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    pub fn tokenize<S: AsRef<str>>(&self, texts: &[S], options: TokenizeOptions) -> Result<TokenizedBatch> {
        let texts = non_empty(texts)?;
        self.engine
            .tokenize(&texts, options.add_special_tokens, options.enable_padding)
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.engine.metadata()
    }

    pub fn config(&self) -> EmbedderConfig {
        self.config
    }

    pub fn model(&self) -> &CachedModelFile {
        &self.model
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

fn non_empty<S: AsRef<str>>(texts: &[S]) -> Result<Vec<&str>> {
    if texts.is_empty() {
        return Err(EmbedderError::empty_texts());
    }
    Ok(texts.iter().map(AsRef::as_ref).collect())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::embeddings::download::ResolverConfig;
    use crate::embeddings::normalize::{euclidean_norm, normalize};
    use crate::embeddings::types::{PoolingType, TokenizedText};

    const FAKE_DIMS: usize = 384;
    const FAKE_MAX_LEN: usize = 12;

    thread_local! {
        static LOADS: Cell<usize> = const { Cell::new(0) };
    }

    /// Deterministic stand-in: one "token" per whitespace-separated word, vectors derived
    /// from byte values so different texts get different embeddings.
    struct FakeEngine {
        path: PathBuf,
        pooling: PoolingType,
    }

    impl EmbeddingEngine for FakeEngine {
        fn load(path: &Path, pooling: PoolingType) -> Result<Self> {
            LOADS.with(|n| n.set(n.get() + 1));
            if !path.is_file() {
                return Err(EmbedderError::Load(format!("no such model {}", path.display())));
            }
            Ok(Self {
                path: path.to_path_buf(),
                pooling,
            })
        }

        fn tokenize(&self, texts: &[&str], add_special_tokens: bool, enable_padding: bool) -> Result<TokenizedBatch> {
            if texts.is_empty() {
                return Err(EmbedderError::empty_texts());
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut tokens: Vec<u32> = t.split_whitespace().map(|w| w.len() as u32 + 10).collect();
                    if add_special_tokens {
                        tokens.insert(0, 1);
                        tokens.push(2);
                    }
                    tokens.truncate(FAKE_MAX_LEN);
                    let mut attention_mask = vec![1; tokens.len()];
                    if enable_padding {
                        tokens.resize(FAKE_MAX_LEN, 0);
                        attention_mask.resize(FAKE_MAX_LEN, 0);
                    }
                    TokenizedText {
                        tokens,
                        attention_mask,
                    }
                })
                .collect())
        }

        fn embed(&self, texts: &[&str], normalization: NormalizationType) -> Result<Vec<EmbeddingVector>> {
            if texts.is_empty() {
                return Err(EmbedderError::empty_texts());
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let raw: Vec<f32> = (0..FAKE_DIMS)
                        .map(|i| {
                            let b = t.as_bytes().get(i % t.len().max(1)).copied().unwrap_or(0);
                            f32::from(b) + i as f32 * 0.01
                        })
                        .collect();
                    normalize(&raw, normalization)
                })
                .collect())
        }

        fn metadata(&self) -> BTreeMap<String, String> {
            BTreeMap::from([
                ("general.name".to_string(), "fake".to_string()),
                ("general.architecture".to_string(), "bert".to_string()),
                ("general.pooling".to_string(), self.pooling.to_string()),
                ("general.path".to_string(), self.path.display().to_string()),
            ])
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf, ModelResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let model = tmp.path().join("all-MiniLM-L6-v2.Q4_0.gguf");
        fs::write(&model, b"GGUF").unwrap();
        // Unroutable endpoint: any accidental network access fails fast.
        let resolver = ModelResolver::new(
            ResolverConfig::new(tmp.path().join("cache")).with_endpoint("http://127.0.0.1:9"),
        );
        (tmp, model, resolver)
    }

    fn fake(model: &Path, config: EmbedderConfig, resolver: &ModelResolver) -> Embedder<FakeEngine> {
        Embedder::new(ModelReference::local(model), config, resolver).unwrap()
    }

    #[test]
    fn test_embed_texts_one_vector_per_text_in_order() {
        let (_tmp, model, resolver) = setup();
        let embedder = fake(&model, EmbedderConfig::default(), &resolver);

        let texts = ["Hello, world!", "Another sentence", "third"];
        let out = embedder.embed_texts(&texts).unwrap();
        assert_eq!(out.len(), 3);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v.len(), FAKE_DIMS);
            assert!((euclidean_norm(v) - 1.0).abs() < 1e-4);
            assert_eq!(v, &embedder.embed_texts(&[texts[i]]).unwrap()[0]);
        }
    }

    #[test]
    fn test_normalization_none_is_passed_through() {
        let (_tmp, model, resolver) = setup();
        let cfg = EmbedderConfig::new(PoolingType::Mean, NormalizationType::None);
        let embedder = fake(&model, cfg, &resolver);
        let out = embedder.embed_texts(&["Hello, world!".to_string()]).unwrap();
        assert!(euclidean_norm(&out[0]) > 1.0);
    }

    #[test]
    fn test_per_call_normalization_overrides_config() {
        let (_tmp, model, resolver) = setup();
        let embedder = fake(&model, EmbedderConfig::default(), &resolver);
        let text = ["Hello, world!"];

        let raw = embedder.embed_texts_with(&text, NormalizationType::None).unwrap();
        let l2 = embedder.embed_texts_with(&text, NormalizationType::Euclidean).unwrap();
        assert!(euclidean_norm(&raw[0]) > 1.0);
        assert!((euclidean_norm(&l2[0]) - 1.0).abs() < 1e-4);
        assert_eq!(l2, embedder.embed_texts(&text).unwrap());
    }

    #[test]
    fn test_pooling_is_handed_to_engine_load() {
        let (_tmp, model, resolver) = setup();
        let cfg = EmbedderConfig::new(PoolingType::Last, NormalizationType::Euclidean);
        let embedder = fake(&model, cfg, &resolver);
        assert_eq!(embedder.metadata().get("general.pooling").map(String::as_str), Some("last"));
        assert_eq!(embedder.config(), cfg);
        assert_eq!(embedder.model().path, model);
    }

    #[test]
    fn test_empty_inputs_fail_with_exact_message() {
        let (_tmp, model, resolver) = setup();
        let embedder = fake(&model, EmbedderConfig::default(), &resolver);
        let empty: [&str; 0] = [];

        let err = embedder.embed_texts(&empty).unwrap_err();
        assert!(matches!(err, EmbedderError::Input(_)));
        assert_eq!(err.to_string(), "texts are empty");

        let err = embedder.tokenize(&empty, TokenizeOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "texts are empty");
    }

    #[test]
    fn test_tokenize_padding_and_special_tokens() {
        let (_tmp, model, resolver) = setup();
        let embedder = fake(&model, EmbedderConfig::default(), &resolver);

        let with = embedder.tokenize(&["a b c"], TokenizeOptions::default()).unwrap();
        let without = embedder
            .tokenize(
                &["a b c"],
                TokenizeOptions {
                    add_special_tokens: false,
                    enable_padding: true,
                },
            )
            .unwrap();

        for rec in with.iter().chain(without.iter()) {
            assert_eq!(rec.tokens.len(), FAKE_MAX_LEN);
            assert_eq!(rec.attention_mask.len(), FAKE_MAX_LEN);
        }
        assert_eq!(with[0].real_token_count(), 5);
        assert_eq!(without[0].real_token_count(), 3);
    }

    #[test]
    fn test_directory_fails_before_engine_load() {
        let (tmp, _model, resolver) = setup();
        LOADS.with(|n| n.set(0));

        let err = Embedder::<FakeEngine>::new(
            ModelReference::local(tmp.path()),
            EmbedderConfig::default(),
            &resolver,
        )
        .err()
        .unwrap();

        assert!(matches!(err, EmbedderError::Configuration(_)));
        assert_eq!(LOADS.with(|n| n.get()), 0);
    }

    #[test]
    fn test_load_failure_is_fatal_to_construction() {
        let (tmp, _model, resolver) = setup();
        let err = Embedder::<FakeEngine>::new(
            ModelReference::local(tmp.path().join("missing.gguf")),
            EmbedderConfig::default(),
            &resolver,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmbedderError::Load(_)));
    }

    #[test]
    fn test_remote_reference_served_from_cache() {
        let (tmp, _model, resolver) = setup();
        let models = tmp.path().join("cache").join("models");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("snowflake-arctic-embed-s-f16.gguf"), b"GGUF").unwrap();

        let reference = ModelReference::from_parts(
            "snowflake-arctic-embed-s-f16.gguf",
            Some("ChristianAzinn/snowflake-arctic-embed-s-gguf"),
            None,
        );
        let embedder = Embedder::<FakeEngine>::new(reference, EmbedderConfig::default(), &resolver).unwrap();
        assert_eq!(embedder.model().path, models.join("snowflake-arctic-embed-s-f16.gguf"));
        assert!(!embedder.model().downloaded);
    }

    #[test]
    fn test_remote_download_failure_is_fatal_to_construction() {
        let (_tmp, _model, resolver) = setup();
        LOADS.with(|n| n.set(0));
        let err = Embedder::<FakeEngine>::new(
            ModelReference::remote("org/repo", "never-cached.gguf"),
            EmbedderConfig::default(),
            &resolver,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmbedderError::Transport { .. }), "got {err:?}");
        assert_eq!(LOADS.with(|n| n.get()), 0);
    }

    #[test]
    fn test_real_engine_through_facade() {
        let (tmp, _model, resolver) = setup();
        let path = tmp.path().join("tiny-bert.gguf");
        crate::embeddings::engine::tests::write_tiny_bert_gguf(&path, "bert");

        let embedder: Embedder =
            Embedder::new(ModelReference::local(&path), EmbedderConfig::default(), &resolver).unwrap();
        let out = embedder.embed_texts(&["Hello, world!", "Another sentence"]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.len() == embedder.engine().dimensions()));

        let md = embedder.metadata();
        assert!(md.contains_key("general.name"));
        assert!(md.contains_key("general.architecture"));
    }
}
