/// Deterministic offline embedder based on character n-gram feature hashing.
///
/// Every unigram and bigram of the lower-cased text (whitespace skipped) is
/// hashed with SHA-256 into a signed bucket, then the vector is
/// L2-normalized. The hash is explicit rather than `std`'s randomized or
/// version-dependent hashers, so the same text always maps to the same
/// vector across processes and toolchains. Texts sharing characters land
/// close together, which is enough for tests and for running without a
/// downloaded model.
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError, l2_normalize_in_place};

pub struct HashingEmbedder {
    dimensions: usize,
    name: String,
}

impl HashingEmbedder {
    /// Create a new `HashingEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            name: format!("hashing-ngram-{dimensions}"),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(prefix);
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        ((h % self.dimensions as u64) as usize, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return Ok(embedding);
        }

        let chars: Vec<char> = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        let mut buf = String::new();
        for (i, c) in chars.iter().enumerate() {
            buf.clear();
            buf.push(*c);
            let (idx, sign) = self.bucket(&buf);
            embedding[idx] += sign;

            if let Some(next) = chars.get(i + 1) {
                buf.push(*next);
                let (idx, sign) = self.bucket(&buf);
                embedding[idx] += sign;
            }
        }

        l2_normalize_in_place(&mut embedding);
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn normalized(&self) -> bool {
        true
    }
}
