// normalize.rs — Post-pooling vector normalization.

use crate::config;
use crate::embeddings::types::NormalizationType;

/// Normalize `v` per `norm`. A zero norm maps every component to 0.
pub fn normalize(v: &[f32], norm: NormalizationType) -> Vec<f32> {
    let divisor: f64 = match norm {
        NormalizationType::None => return v.to_vec(),
        NormalizationType::MaxAbsInt16 => {
            let max_abs = v.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
            f64::from(max_abs) / f64::from(config::embedding::MAX_ABS_INT16_SCALE)
        }
        NormalizationType::Taxicab => v.iter().map(|x| f64::from(x.abs())).sum(),
        NormalizationType::Euclidean => v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt(),
        NormalizationType::PNorm(p) => {
            let p = f64::from(p.get());
            v.iter()
                .map(|x| f64::from(x.abs()).powf(p))
                .sum::<f64>()
                .powf(1.0 / p)
        }
    };

    let scale = if divisor > 0.0 { 1.0 / divisor } else { 0.0 };
    v.iter().map(|x| (f64::from(*x) * scale) as f32).collect()
}

pub fn euclidean_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
