use crate::*;

use burn::tensor::backend::AutodiffBackend;
use log::info;
use std::sync::Arc;

use crate::loss::LossModel;
use crate::optimize::PixelOptimizer;

/// Style transfer session.
///
/// Calling `run()` will optimize a copy of the content image towards the
/// style image's feature statistics and return the result, consuming the
/// session in the process. You can provide a `TransferProgress`
/// implementation to get an update with the current losses after every
/// evaluation of the objective.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
///
/// let device = Default::default();
/// let extractor =
///     Arc::new(neural_style::Extractor::<neural_style::CpuBackend>::from_file(
///         "weights/vgg16.mpk",
///         &device,
///     ).expect("failed to load weights"));
///
/// let session = neural_style::Session::builder()
///     .extractor(extractor)
///     .content(&"imgs/content.jpg")
///     .style(&"imgs/style.jpg")
///     .style_weight(1_000_000.0)
///     .iterations(300)
///     .build().expect("failed to build session");
///
/// let stylized = session.run(None);
/// stylized.save("out/stylized.jpg").expect("failed to save image");
/// ```
pub struct Session<B: AutodiffBackend> {
    content: burn::tensor::Tensor<B, 4>,
    style: burn::tensor::Tensor<B, 4>,
    extractor: Arc<Extractor<B>>,
    params: Parameters,
}

impl<B: AutodiffBackend> Session<B> {
    /// Creates a new session with default parameters.
    pub fn builder<'a>() -> SessionBuilder<'a, B> {
        SessionBuilder::default()
    }

    /// Runs the optimization and returns the stylized image.
    pub fn run(self, progress: Option<Box<dyn TransferProgress>>) -> TransferredImage {
        info!(
            "transferring style at {}px, style weight {}, content weight {}, {} iterations",
            self.params.output_size,
            self.params.style_weight,
            self.params.content_weight,
            self.params.iterations
        );

        let model = LossModel::build(
            &self.extractor,
            &self.style,
            &self.content,
            &self.params.content_layers,
            &self.params.style_layers,
        );

        let optimizer = PixelOptimizer::new(
            &model,
            self.params.style_weight,
            self.params.content_weight,
        );
        let (image, stats) = optimizer.run(self.content.clone(), self.params.iterations, progress);

        TransferredImage {
            image: utils::tensor_to_image(image),
            stats,
        }
    }
}

/// Builds a session by setting parameters and adding input images, calling
/// `build` will load both images and verify that the configuration can
/// produce a valid run.
pub struct SessionBuilder<'a, B: AutodiffBackend> {
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    extractor: Option<Arc<Extractor<B>>>,
    params: Parameters,
}

impl<'a, B: AutodiffBackend> Default for SessionBuilder<'a, B> {
    fn default() -> Self {
        Self {
            content: None,
            style: None,
            extractor: None,
            params: Parameters::default(),
        }
    }
}

impl<'a, B: AutodiffBackend> SessionBuilder<'a, B> {
    /// Creates a new `SessionBuilder`, can also be created via
    /// `Session::builder()`
    pub fn new() -> Self {
        Self::default()
    }

    /// The image whose spatial structure is preserved.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.content = Some(img.into());
        self
    }

    /// The image whose texture and color statistics are applied.
    pub fn style<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.style = Some(img.into());
        self
    }

    /// The shared frozen feature extractor driving both losses.
    ///
    /// Build it once at startup and clone the `Arc` into every session; no
    /// run ever mutates it.
    pub fn extractor(mut self, extractor: Arc<Extractor<B>>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Side length in pixels of the square working resolution. Both images
    /// are resized to this resolution without preserving aspect ratio.
    ///
    /// Default: 512
    pub fn output_size(mut self, side: u32) -> Self {
        self.params.output_size = side;
        self
    }

    /// Multiplier on the style loss. Larger values trade structure for
    /// texture.
    ///
    /// Default: 1_000_000
    pub fn style_weight(mut self, weight: f32) -> Self {
        self.params.style_weight = weight;
        self
    }

    /// Multiplier on the content loss.
    ///
    /// Default: 1
    pub fn content_weight(mut self, weight: f32) -> Self {
        self.params.content_weight = weight;
        self
    }

    /// How many objective evaluations the optimizer may spend.
    ///
    /// Default: 300
    pub fn iterations(mut self, count: usize) -> Self {
        self.params.iterations = count;
        self
    }

    /// Feature layer indices where content loss is measured. An empty
    /// selection simply drops the content term.
    pub fn content_layers(mut self, layers: impl Into<Vec<usize>>) -> Self {
        self.params.content_layers = layers.into();
        self
    }

    /// Feature layer indices where style loss is measured. An empty
    /// selection simply drops the style term; with both selections empty
    /// the optimizer has no gradient signal and the output equals the
    /// content image.
    pub fn style_layers(mut self, layers: impl Into<Vec<usize>>) -> Self {
        self.params.style_layers = layers.into();
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or
    /// input images were specified.
    pub fn build(self) -> Result<Session<B>, Error> {
        self.check_parameters_validity()?;

        let extractor = self
            .extractor
            .ok_or(Error::MissingInput("extractor"))?;

        for &index in self
            .params
            .content_layers
            .iter()
            .chain(self.params.style_layers.iter())
        {
            if index >= extractor.layer_count() {
                return Err(Error::LayerOutOfRange {
                    index,
                    layer_count: extractor.layer_count(),
                });
            }
        }

        let content = self.content.ok_or(Error::MissingInput("content image"))?;
        let style = self.style.ok_or(Error::MissingInput("style image"))?;

        let device = extractor.device().clone();
        let content = utils::decode(content, self.params.output_size, &device)?;
        let style = utils::decode(style, self.params.output_size, &device)?;

        Ok(Session {
            content,
            style,
            extractor,
            params: self.params,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        if self.params.output_size == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: 16384.0,
                value: self.params.output_size as f32,
                name: "output-size",
            }));
        }

        if self.params.style_weight < 0.0 || self.params.style_weight.is_nan() {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: f32::INFINITY,
                value: self.params.style_weight,
                name: "style-weight",
            }));
        }

        if self.params.content_weight < 0.0 || self.params.content_weight.is_nan() {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: f32::INFINITY,
                value: self.params.content_weight,
                name: "content-weight",
            }));
        }

        if self.params.iterations == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: f32::INFINITY,
                value: self.params.iterations as f32,
                name: "iterations",
            }));
        }

        Ok(())
    }
}

/// Last observed state of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    /// Number of objective evaluations performed.
    pub iterations: usize,
    /// Weighted style loss at the last evaluation.
    pub style_loss: f32,
    /// Weighted content loss at the last evaluation.
    pub content_loss: f32,
}

/// The current state of the optimization loop.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    /// Objective evaluations performed so far.
    pub iteration: usize,
    /// Total evaluations the run will perform.
    pub total: usize,
    /// Weighted style loss at this evaluation.
    pub style_loss: f32,
    /// Weighted content loss at this evaluation.
    pub content_loss: f32,
}

/// Allows the optimizer to update external callers with the current
/// progress of the transfer
pub trait TransferProgress {
    fn update(&mut self, info: ProgressUpdate);
}

impl<G> TransferProgress for G
where
    G: FnMut(ProgressUpdate) + Send,
{
    fn update(&mut self, info: ProgressUpdate) {
        self(info)
    }
}
