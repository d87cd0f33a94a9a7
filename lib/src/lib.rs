// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `neural-style` is a light API for neural style transfer: given a content
//! image and a style image, it synthesizes an output that keeps the spatial
//! structure of the first while adopting the texture and color statistics of
//! the second, by optimizing pixel values directly against feature losses
//! from a frozen, pretrained convolutional network.
//!
//! First, you build a process-wide [`Extractor`] (once, at startup) and a
//! `Session` via a `SessionBuilder`, which follows the builder pattern.
//! Calling `build` on the `SessionBuilder` loads both input images and
//! checks for various errors.
//!
//! `Session` has a `run()` method that drives the optimization and returns
//! the result as a `TransferredImage`, which you can save, stream, or
//! inspect.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! let device = Default::default();
//! // Load the frozen feature extractor once per process
//! let extractor = Arc::new(
//!     neural_style::Extractor::<neural_style::CpuBackend>::from_file(
//!         "weights/vgg16.mpk",
//!         &device,
//!     )
//!     .expect("failed to load weights"),
//! );
//!
//! // Create a new session with default parameters
//! let session = neural_style::Session::builder()
//!     .extractor(extractor)
//!     .content(&"imgs/content.jpg")
//!     .style(&"imgs/style.jpg")
//!     // Build the session
//!     .build()
//!     .expect("failed to build session");
//!
//! // Optimize the image
//! let stylized = session.run(None);
//!
//! // Save the stylized image to disk
//! stylized
//!     .save("out/stylized.jpg")
//!     .expect("failed to save stylized image");
//! ```
mod errors;
mod extractor;
mod loss;
mod optimize;
pub mod session;
mod utils;

pub use image;
use std::path::Path;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;

pub use errors::Error;
pub use extractor::{Extractor, DEFAULT_CONTENT_LAYERS, DEFAULT_STYLE_LAYERS};
pub use loss::gram_matrix;
pub use session::{ProgressUpdate, RunStats, Session, SessionBuilder, TransferProgress};
pub use utils::{load_dynamic_image, ImageSource};

/// The default CPU tensor backend with autodiff.
pub type CpuBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

/// Run configuration, immutable for the duration of one transfer.
struct Parameters {
    output_size: u32,
    style_weight: f32,
    content_weight: f32,
    iterations: usize,
    content_layers: Vec<usize>,
    style_layers: Vec<usize>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            output_size: 512,
            style_weight: 1_000_000.0,
            content_weight: 1.0,
            iterations: 300,
            content_layers: DEFAULT_CONTENT_LAYERS.to_vec(),
            style_layers: DEFAULT_STYLE_LAYERS.to_vec(),
        }
    }
}

/// An image produced by a `Session::run()`
pub struct TransferredImage {
    image: image::RgbImage,
    stats: RunStats,
}

impl TransferredImage {
    /// Saves the stylized image to the specified path, in the format implied
    /// by the path's extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(parent_path)?;
        }

        self.image.save(path)?;
        Ok(())
    }

    /// Writes the stylized image to the specified stream
    pub fn write<W: std::io::Write>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        let dyn_img = self.into_image();
        Ok(dyn_img.write_to(writer, fmt)?)
    }

    /// The evaluation count and final losses of the run that produced this
    /// image
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Returns the stylized output image
    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(self.image)
    }
}

impl AsRef<image::RgbImage> for TransferredImage {
    fn as_ref(&self) -> &image::RgbImage {
        &self.image
    }
}

/// Transfers the style of one image file onto the content of another and
/// writes the result to `output_path`.
///
/// This is the one-call composition of the session API: decode both inputs
/// at the given square `resolution`, optimize for `iterations` evaluations
/// with the given loss weights, clamp, and encode to the output path in the
/// format implied by its extension. Any failure aborts the whole run; no
/// partial output is written.
pub fn transfer<B: AutodiffBackend>(
    extractor: Arc<Extractor<B>>,
    content_path: impl AsRef<Path>,
    style_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    resolution: u32,
    style_weight: f32,
    content_weight: f32,
    iterations: usize,
) -> Result<(), Error> {
    let session = Session::builder()
        .extractor(extractor)
        .content(ImageSource::from_path(content_path.as_ref()))
        .style(ImageSource::from_path(style_path.as_ref()))
        .output_size(resolution)
        .style_weight(style_weight)
        .content_weight(content_weight)
        .iterations(iterations)
        .build()?;

    session.run(None).save(output_path)
}
