// types.rs — Value types shared by the facade, the resolver and the engine.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{EmbedderError, Result};

/// How per-token outputs collapse into one vector per text.
/// Integer tags match the llama.cpp pooling enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PoolingType {
    None,
    #[default]
    Mean,
    Cls,
    Last,
}

impl PoolingType {
    pub fn tag(self) -> u32 {
        match self {
            PoolingType::None => 0,
            PoolingType::Mean => 1,
            PoolingType::Cls => 2,
            PoolingType::Last => 3,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(PoolingType::None),
            1 => Ok(PoolingType::Mean),
            2 => Ok(PoolingType::Cls),
            3 => Ok(PoolingType::Last),
            other => Err(EmbedderError::Configuration(format!("unknown pooling type tag {other}"))),
        }
    }
}

impl fmt::Display for PoolingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolingType::None => "none",
            PoolingType::Mean => "mean",
            PoolingType::Cls => "cls",
            PoolingType::Last => "last",
        };
        f.write_str(name)
    }
}

impl FromStr for PoolingType {
    type Err = EmbedderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(PoolingType::None),
            "mean" => Ok(PoolingType::Mean),
            "cls" => Ok(PoolingType::Cls),
            "last" => Ok(PoolingType::Last),
            other => match other.parse::<u32>() {
                Ok(tag) => PoolingType::from_tag(tag),
                Err(_) => Err(EmbedderError::Configuration(format!("unknown pooling type '{s}'"))),
            },
        }
    }
}

/// Post-processing applied to each pooled vector.
/// Integer tags match llama.cpp's `embd_normalize`: -1 none, 0 max-abs int16,
/// 1 taxicab, 2 euclidean, >2 p-norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NormalizationType {
    None,
    MaxAbsInt16,
    Taxicab,
    #[default]
    Euclidean,
    PNorm(PNormExponent),
}

/// Exponent of a p-norm. Always in `3..=i32::MAX` so its tag never collides with the named
/// normalizations (1 and 2 are `Taxicab` and `Euclidean`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PNormExponent(u32);

impl PNormExponent {
    pub fn new(p: u32) -> Result<Self> {
        if p > 2 && i32::try_from(p).is_ok() {
            Ok(Self(p))
        } else {
            Err(EmbedderError::Configuration(format!(
                "p-norm exponent must be in 3..={}, got {p}",
                i32::MAX
            )))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl NormalizationType {
    pub fn p_norm(p: u32) -> Result<Self> {
        Ok(NormalizationType::PNorm(PNormExponent::new(p)?))
    }

    pub fn tag(self) -> i32 {
        match self {
            NormalizationType::None => -1,
            NormalizationType::MaxAbsInt16 => 0,
            NormalizationType::Taxicab => 1,
            NormalizationType::Euclidean => 2,
            NormalizationType::PNorm(p) => p.0 as i32,
        }
    }

    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            -1 => Ok(NormalizationType::None),
            0 => Ok(NormalizationType::MaxAbsInt16),
            1 => Ok(NormalizationType::Taxicab),
            2 => Ok(NormalizationType::Euclidean),
            p if p > 2 => Ok(NormalizationType::PNorm(PNormExponent(p as u32))),
            other => Err(EmbedderError::Configuration(format!(
                "unknown normalization type tag {other}"
            ))),
        }
    }
}

impl fmt::Display for NormalizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationType::None => f.write_str("none"),
            NormalizationType::MaxAbsInt16 => f.write_str("maxabsint16"),
            NormalizationType::Taxicab => f.write_str("taxicab"),
            NormalizationType::Euclidean => f.write_str("euclidean"),
            NormalizationType::PNorm(p) => write!(f, "p{}", p.0),
        }
    }
}

impl FromStr for NormalizationType {
    type Err = EmbedderError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "none" => Ok(NormalizationType::None),
            "maxabsint16" | "max_abs_int16" => Ok(NormalizationType::MaxAbsInt16),
            "taxicab" | "l1" => Ok(NormalizationType::Taxicab),
            "euclidean" | "l2" => Ok(NormalizationType::Euclidean),
            other => {
                let digits = other.strip_prefix('p').unwrap_or(other);
                match digits.parse::<i32>() {
                    Ok(tag) => NormalizationType::from_tag(tag),
                    Err(_) => Err(EmbedderError::Configuration(format!(
                        "unknown normalization type '{s}'"
                    ))),
                }
            }
        }
    }
}

/// Supplied once at facade creation; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmbedderConfig {
    pub pooling: PoolingType,
    pub normalization: NormalizationType,
}

impl EmbedderConfig {
    pub fn new(pooling: PoolingType, normalization: NormalizationType) -> Self {
        Self {
            pooling,
            normalization,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    pub add_special_tokens: bool,
    pub enable_padding: bool,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            enable_padding: true,
        }
    }
}

/// One tokenized text. `tokens` and `attention_mask` always have equal length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenizedText {
    pub tokens: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl TokenizedText {
    /// Number of real (non-padding) positions.
    pub fn real_token_count(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

pub type TokenizedBatch = Vec<TokenizedText>;

pub type EmbeddingVector = Vec<f32>;
