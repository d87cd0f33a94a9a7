//! Loss construction over the feature stack.
//!
//! `LossModel::build` walks the extractor's layer sequence once, captures
//! frozen targets at the selected positions (raw activations for content,
//! Gram matrices for style) and remembers how far the walk has to go: the
//! sequence is truncated right after the last probe-bearing layer, anything
//! past that point is never evaluated again.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::extractor::Extractor;

/// Channel self-correlation of a feature activation.
///
/// The `(batch, channels, height, width)` activation is flattened to a
/// `(channels, height * width)` matrix `F`; the result is `F * F^T` scaled by
/// `1 / (channels * height * width)` so values are comparable across feature
/// map sizes.
pub fn gram_matrix<B: Backend>(activation: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = activation.dims();

    let features = activation.reshape([batch * channels, height * width]);
    let gram = features.clone().matmul(features.transpose());

    gram.div_scalar((batch * channels * height * width) as f32)
}

pub(crate) fn mse<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).mean()
}

/// Measures how far an activation has drifted from the content image's
/// activation at one layer.
struct ContentProbe<B: Backend> {
    layer: usize,
    target: Tensor<B, 4>,
}

/// Measures how far an activation's Gram matrix has drifted from the style
/// image's Gram matrix at one layer.
struct StyleProbe<B: Backend> {
    layer: usize,
    target: Tensor<B, 2>,
}

/// Per-evaluation loss readout, summed over the probes of each kind.
pub(crate) struct LossReadout<B: Backend> {
    pub style: Tensor<B, 1>,
    pub content: Tensor<B, 1>,
}

/// The truncated, probe-instrumented feature walk.
pub(crate) struct LossModel<'a, B: Backend> {
    extractor: &'a Extractor<B>,
    /// Number of layers the evaluation walk visits; 0 when no probe exists.
    truncate_at: usize,
    content_probes: Vec<ContentProbe<B>>,
    style_probes: Vec<StyleProbe<B>>,
}

impl<'a, B: Backend> LossModel<'a, B> {
    /// Walks the layer sequence, capturing a detached target at every
    /// selected index. Layer indices must have been validated against
    /// `extractor.layer_count()` beforehand.
    pub(crate) fn build(
        extractor: &'a Extractor<B>,
        style: &Tensor<B, 4>,
        content: &Tensor<B, 4>,
        content_layers: &[usize],
        style_layers: &[usize],
    ) -> Self {
        let last_probe = content_layers.iter().chain(style_layers.iter()).copied().max();
        let truncate_at = last_probe.map_or(0, |index| index + 1);

        let mut content_probes = Vec::with_capacity(content_layers.len());
        let mut style_probes = Vec::with_capacity(style_layers.len());

        if truncate_at > 0 {
            let mut cx = extractor.normalize(content.clone());
            let mut sx = extractor.normalize(style.clone());

            for (i, layer) in extractor.layers().into_iter().take(truncate_at).enumerate() {
                cx = layer.forward(cx);
                sx = layer.forward(sx);

                if content_layers.contains(&i) {
                    content_probes.push(ContentProbe {
                        layer: i,
                        target: cx.clone().detach(),
                    });
                }

                if style_layers.contains(&i) {
                    style_probes.push(StyleProbe {
                        layer: i,
                        target: gram_matrix(sx.clone()).detach(),
                    });
                }
            }
        }

        Self {
            extractor,
            truncate_at,
            content_probes,
            style_probes,
        }
    }

    /// Whether any layer carries a probe. Without probes the objective is
    /// identically zero and optimization has no gradient signal.
    pub(crate) fn has_probes(&self) -> bool {
        self.truncate_at > 0
    }

    /// Evaluates the truncated walk on a working image and reads out the
    /// summed style and content losses.
    pub(crate) fn evaluate(&self, image: Tensor<B, 4>) -> LossReadout<B> {
        let device = image.device();
        let mut style = Tensor::zeros([1], &device);
        let mut content = Tensor::zeros([1], &device);

        let mut x = self.extractor.normalize(image);
        for (i, layer) in self
            .extractor
            .layers()
            .into_iter()
            .take(self.truncate_at)
            .enumerate()
        {
            x = layer.forward(x);

            for probe in self.content_probes.iter().filter(|p| p.layer == i) {
                content = content + mse(x.clone(), probe.target.clone());
            }

            for probe in self.style_probes.iter().filter(|p| p.layer == i) {
                style = style + mse(gram_matrix(x.clone()), probe.target.clone());
            }
        }

        LossReadout { style, content }
    }
}
