//! Frozen convolutional feature extractor.
//!
//! A VGG16-style feature stack whose intermediate activations drive the
//! style and content losses. The stack is exposed as an ordered sequence of
//! layers addressable by position (convolutions at indices 0, 2, 5, 7, 10,
//! 12, 14, 17, 19, 21, 24, 26, 28, pooling at 4, 9, 16, 23, 30), preceded by
//! a normalization stage that maps `[0, 1]` pixels to the distribution the
//! pretrained weights were trained on.
//!
//! The extractor is pure read-only state: parameters are mapped to `no_grad`
//! at construction and never updated, so one instance can be shared across
//! any number of concurrent runs.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::Error;
use std::path::Path;

const NORMALIZATION_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const NORMALIZATION_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Default content layer selection: conv4_2.
pub const DEFAULT_CONTENT_LAYERS: &[usize] = &[19];
/// Default style layer selection: conv1_1 through conv5_1.
pub const DEFAULT_STYLE_LAYERS: &[usize] = &[0, 5, 10, 17, 24];

/// Maps raw pixel tensors to the pretrained network's input distribution,
/// per-channel `(x - mean) / std`.
struct Normalization<B: Backend> {
    mean: Tensor<B, 4>,
    std: Tensor<B, 4>,
}

impl<B: Backend> Normalization<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            mean: Tensor::<B, 1>::from_floats(NORMALIZATION_MEAN, device).reshape([1, 3, 1, 1]),
            std: Tensor::<B, 1>::from_floats(NORMALIZATION_STD, device).reshape([1, 3, 1, 1]),
        }
    }

    fn forward(&self, img: Tensor<B, 4>) -> Tensor<B, 4> {
        (img - self.mean.clone()) / self.std.clone()
    }
}

/// The 13 convolutions of the VGG16 feature stack.
#[derive(Module, Debug)]
pub(crate) struct VggFeatures<B: Backend> {
    // Block 1: 3 -> 64
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    // Block 2: 64 -> 128
    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    // Block 3: 128 -> 256
    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    // Block 4: 256 -> 512
    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    // Block 5: 512 -> 512
    conv5_1: Conv2d<B>,
    conv5_2: Conv2d<B>,
    conv5_3: Conv2d<B>,
}

impl<B: Backend> VggFeatures<B> {
    fn new(device: &B::Device) -> Self {
        let conv_config = |in_ch, out_ch| {
            Conv2dConfig::new([in_ch, out_ch], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_bias(true)
        };

        Self {
            conv1_1: conv_config(3, 64).init(device),
            conv1_2: conv_config(64, 64).init(device),
            conv2_1: conv_config(64, 128).init(device),
            conv2_2: conv_config(128, 128).init(device),
            conv3_1: conv_config(128, 256).init(device),
            conv3_2: conv_config(256, 256).init(device),
            conv3_3: conv_config(256, 256).init(device),
            conv4_1: conv_config(256, 512).init(device),
            conv4_2: conv_config(512, 512).init(device),
            conv4_3: conv_config(512, 512).init(device),
            conv5_1: conv_config(512, 512).init(device),
            conv5_2: conv_config(512, 512).init(device),
            conv5_3: conv_config(512, 512).init(device),
        }
    }
}

/// One position in the ordered feature stack.
pub(crate) enum Layer<'a, B: Backend> {
    Conv(&'a Conv2d<B>),
    Relu,
    Pool(&'a MaxPool2d),
}

impl<'a, B: Backend> Layer<'a, B> {
    pub(crate) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(x),
            Self::Relu => relu(x),
            Self::Pool(pool) => pool.forward(x),
        }
    }
}

/// A frozen, pretrained feature extractor.
///
/// Instantiate one per process (random weights via [`Extractor::new`] or
/// pretrained weights via [`Extractor::from_file`]) and share it read-only
/// across transfer sessions.
pub struct Extractor<B: Backend> {
    norm: Normalization<B>,
    features: VggFeatures<B>,
    pool: MaxPool2d,
    device: B::Device,
}

impl<B: Backend> Extractor<B> {
    /// Creates an extractor with randomly initialized weights.
    ///
    /// Useful for tests and smoke runs; for actual stylization the stack
    /// must carry pretrained weights, see [`Extractor::from_file`].
    pub fn new(device: &B::Device) -> Self {
        Self {
            norm: Normalization::new(device),
            features: VggFeatures::new(device).no_grad(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            device: device.clone(),
        }
    }

    /// Creates an extractor from a pretrained weight record in burn's named
    /// MessagePack format.
    pub fn from_file<P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Self, Error> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let features = VggFeatures::new(device)
            .load_file(path.as_ref().to_path_buf(), &recorder, device)
            .map_err(Error::Weights)?
            .no_grad();

        Ok(Self {
            norm: Normalization::new(device),
            features,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            device: device.clone(),
        })
    }

    pub(crate) fn device(&self) -> &B::Device {
        &self.device
    }

    /// The ordered layer sequence, convolutions interleaved with their
    /// activations and block pooling.
    pub(crate) fn layers(&self) -> Vec<Layer<'_, B>> {
        let f = &self.features;
        vec![
            Layer::Conv(&f.conv1_1),
            Layer::Relu,
            Layer::Conv(&f.conv1_2),
            Layer::Relu,
            Layer::Pool(&self.pool),
            Layer::Conv(&f.conv2_1),
            Layer::Relu,
            Layer::Conv(&f.conv2_2),
            Layer::Relu,
            Layer::Pool(&self.pool),
            Layer::Conv(&f.conv3_1),
            Layer::Relu,
            Layer::Conv(&f.conv3_2),
            Layer::Relu,
            Layer::Conv(&f.conv3_3),
            Layer::Relu,
            Layer::Pool(&self.pool),
            Layer::Conv(&f.conv4_1),
            Layer::Relu,
            Layer::Conv(&f.conv4_2),
            Layer::Relu,
            Layer::Conv(&f.conv4_3),
            Layer::Relu,
            Layer::Pool(&self.pool),
            Layer::Conv(&f.conv5_1),
            Layer::Relu,
            Layer::Conv(&f.conv5_2),
            Layer::Relu,
            Layer::Conv(&f.conv5_3),
            Layer::Relu,
            Layer::Pool(&self.pool),
        ]
    }

    /// Number of addressable layers in the feature stack.
    pub fn layer_count(&self) -> usize {
        self.layers().len()
    }

    pub(crate) fn normalize(&self, img: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(img)
    }

    /// Evaluates the stack up to and including `layer_index` and returns the
    /// activation at that position.
    pub fn extract(&self, img: Tensor<B, 4>, layer_index: usize) -> Result<Tensor<B, 4>, Error> {
        let layers = self.layers();
        if layer_index >= layers.len() {
            return Err(Error::LayerOutOfRange {
                index: layer_index,
                layer_count: layers.len(),
            });
        }

        let mut x = self.normalize(img);
        for layer in layers.into_iter().take(layer_index + 1) {
            x = layer.forward(x);
        }

        Ok(x)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::tensor::TensorData;

    type TestBackend = burn::backend::NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn stack_has_vgg16_geometry() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let layers = extractor.layers();

        assert_eq!(layers.len(), 31);

        let conv_positions: Vec<usize> = layers
            .iter()
            .enumerate()
            .filter_map(|(i, l)| matches!(l, Layer::Conv(_)).then(|| i))
            .collect();
        assert_eq!(
            conv_positions,
            vec![0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28]
        );

        let pool_positions: Vec<usize> = layers
            .iter()
            .enumerate()
            .filter_map(|(i, l)| matches!(l, Layer::Pool(_)).then(|| i))
            .collect();
        assert_eq!(pool_positions, vec![4, 9, 16, 23, 30]);
    }

    #[test]
    fn normalization_matches_constants() {
        let data = vec![0.5f32; 3 * 2 * 2];
        let img = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(data, [1, 3, 2, 2]),
            &device(),
        );

        let extractor = Extractor::<TestBackend>::new(&device());
        let out = extractor.normalize(img).into_data().to_vec::<f32>().unwrap();

        for channel in 0..3 {
            let expected =
                (0.5 - NORMALIZATION_MEAN[channel]) / NORMALIZATION_STD[channel];
            for i in 0..4 {
                assert!((out[channel * 4 + i] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn extract_follows_stage_shapes() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let img = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device());

        // conv1_1 keeps the resolution and widens to 64 channels
        let a = extractor.extract(img.clone(), 0).unwrap();
        assert_eq!(a.dims(), [1, 64, 32, 32]);

        // the first pool halves the resolution
        let a = extractor.extract(img.clone(), 4).unwrap();
        assert_eq!(a.dims(), [1, 64, 16, 16]);

        // conv2_1 widens to 128 channels
        let a = extractor.extract(img, 5).unwrap();
        assert_eq!(a.dims(), [1, 128, 16, 16]);
    }

    #[test]
    fn extract_rejects_out_of_range_index() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let img = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device());

        assert!(matches!(
            extractor.extract(img, 31),
            Err(Error::LayerOutOfRange { .. })
        ));
    }
}
