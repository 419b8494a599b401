//! Hashed TF-IDF embedding fallback
//!
//! Fast, deterministic, and dependency-free. Good for tests and for
//! installs that never configure a remote provider. Uses the feature
//! hashing trick so the vector length is independent of vocabulary.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

/// TF-IDF style embedder using feature hashing
pub struct TfIdfEmbedder {
    dimension: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn hash_index(token: &str, dimension: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimension
    }

    /// Signed hashing reduces the impact of index collisions.
    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}#sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for TfIdfEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0_f32; self.dimension];

        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut term_freq: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in &term_freq {
            let tf = (1.0 + count / doc_len).ln();
            // Longer tokens tend to be rarer; cheap IDF stand-in
            let idf = 1.0 + token.len() as f32 * 0.1;

            let idx = Self::hash_index(token, self.dimension);
            vector[idx] += tf * idf * Self::hash_sign(token);
        }

        // Bigrams capture short phrases that single terms miss
        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            let idx = Self::hash_index(&bigram, self.dimension);
            vector[idx] += 0.5 * Self::hash_sign(&bigram);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "tfidf"
    }
}
