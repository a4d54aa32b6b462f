//! Embedding model variants and their numeric contracts.
//!
//! Every supported network is a [`ModelVariant`] tag; [`ModelDescriptor`]
//! carries the input size, output dimensionality, normalization policy and
//! tuned acceptance thresholds for that network.

use crate::types::Thresholds;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pixel normalization applied before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// `(c - 128) / 128` per channel.
    FixedAffine,
    /// Per-image mean / population std over the whole buffer.
    Standardize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    #[default]
    #[serde(rename = "facenet")]
    FaceNet,
    #[serde(rename = "facenet-quantized")]
    FaceNetQuantized,
    #[serde(rename = "facenet-512")]
    FaceNet512,
    #[serde(rename = "facenet-512-quantized")]
    FaceNet512Quantized,
    #[serde(rename = "mobilefacenet")]
    MobileFaceNet,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 5] = [
        ModelVariant::FaceNet,
        ModelVariant::FaceNetQuantized,
        ModelVariant::FaceNet512,
        ModelVariant::FaceNet512Quantized,
        ModelVariant::MobileFaceNet,
    ];

    /// Stable tag used in configuration and on the command line.
    pub fn tag(self) -> &'static str {
        match self {
            ModelVariant::FaceNet => "facenet",
            ModelVariant::FaceNetQuantized => "facenet-quantized",
            ModelVariant::FaceNet512 => "facenet-512",
            ModelVariant::FaceNet512Quantized => "facenet-512-quantized",
            ModelVariant::MobileFaceNet => "mobilefacenet",
        }
    }

    /// Look up this variant's row in the descriptor table.
    pub fn descriptor(self) -> &'static ModelDescriptor {
        let row = match self {
            ModelVariant::FaceNet => 0,
            ModelVariant::FaceNetQuantized => 1,
            ModelVariant::FaceNet512 => 2,
            ModelVariant::FaceNet512Quantized => 3,
            ModelVariant::MobileFaceNet => 4,
        };
        &MODEL_TABLE[row]
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ModelVariant::ALL
            .into_iter()
            .find(|v| v.tag() == wanted)
            .ok_or_else(|| format!("unknown model variant: {s}"))
    }
}

/// Immutable configuration of one embedding network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub variant: ModelVariant,
    /// Human-readable name, also stamped on produced embeddings.
    pub name: &'static str,
    /// Model file name, resolved by the model loader.
    pub asset: &'static str,
    pub cosine_threshold: f32,
    pub l2_threshold: f32,
    /// Embedding length.
    pub output_dims: usize,
    /// Square input side in pixels.
    pub input_dims: usize,
    pub normalization: Normalization,
}

impl ModelDescriptor {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            cosine: self.cosine_threshold,
            l2: self.l2_threshold,
        }
    }
}

static MODEL_TABLE: [ModelDescriptor; 5] = [
    ModelDescriptor {
        variant: ModelVariant::FaceNet,
        name: "FaceNet",
        asset: "facenet.onnx",
        cosine_threshold: 0.4,
        l2_threshold: 10.0,
        output_dims: 128,
        input_dims: 160,
        normalization: Normalization::Standardize,
    },
    ModelDescriptor {
        variant: ModelVariant::FaceNetQuantized,
        name: "FaceNet Quantized",
        asset: "facenet_int_quantized.onnx",
        cosine_threshold: 0.4,
        l2_threshold: 10.0,
        output_dims: 128,
        input_dims: 160,
        normalization: Normalization::Standardize,
    },
    ModelDescriptor {
        variant: ModelVariant::FaceNet512,
        name: "FaceNet-512",
        asset: "facenet_512.onnx",
        cosine_threshold: 0.3,
        l2_threshold: 23.56,
        output_dims: 512,
        input_dims: 160,
        normalization: Normalization::Standardize,
    },
    ModelDescriptor {
        variant: ModelVariant::FaceNet512Quantized,
        name: "FaceNet-512 Quantized",
        asset: "facenet_512_int_quantized.onnx",
        cosine_threshold: 0.3,
        l2_threshold: 23.56,
        output_dims: 512,
        input_dims: 160,
        normalization: Normalization::Standardize,
    },
    ModelDescriptor {
        variant: ModelVariant::MobileFaceNet,
        name: "MobileFaceNet",
        asset: "mobile_face_net.onnx",
        cosine_threshold: 0.4,
        l2_threshold: 10.0,
        output_dims: 192,
        input_dims: 112,
        normalization: Normalization::FixedAffine,
    },
];

/// All known descriptors, in table order.
pub fn all_descriptors() -> &'static [ModelDescriptor] {
    &MODEL_TABLE
}
