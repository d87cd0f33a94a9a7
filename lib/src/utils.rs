use crate::Error;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

/// Decodes an image source into a `(1, 3, side, side)` tensor with channel
/// values scaled to `[0, 1]`.
///
/// The image is forced to 3-channel color and resized to a square without
/// preserving the aspect ratio, so that any two decoded images have
/// shape-compatible feature maps.
pub(crate) fn decode<B: Backend>(
    src: ImageSource<'_>,
    side: u32,
    device: &B::Device,
) -> Result<Tensor<B, 4>, Error> {
    let img = load_dynamic_image(src)?.to_rgb();

    let img = if img.width() != side || img.height() != side {
        image::imageops::resize(&img, side, side, image::imageops::CatmullRom)
    } else {
        img
    };

    let side = side as usize;
    let pixels = side * side;
    let raw = img.into_raw();

    // interleaved row-major RGB -> planar channels
    let mut data = vec![0.0f32; 3 * pixels];
    for (i, px) in raw.chunks_exact(3).enumerate() {
        for (c, value) in px.iter().enumerate() {
            data[c * pixels + i] = f32::from(*value) / 255.0;
        }
    }

    Ok(Tensor::from_data(
        TensorData::new(data, [1, 3, side, side]),
        device,
    ))
}

/// Drops the batch dimension and quantizes a `[0, 1]` tensor back into an
/// 8-bit color image.
pub(crate) fn tensor_to_image<B: Backend>(tensor: Tensor<B, 4>) -> image::RgbImage {
    let [_, _, height, width] = tensor.dims();
    let pixels = height * width;

    let data = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .expect("image tensor converts to f32");

    let mut img = image::RgbImage::new(width as u32, height as u32);
    for (i, px) in img.pixels_mut().enumerate() {
        for c in 0..3 {
            let value = data[c * pixels + i].clamp(0.0, 1.0);
            px[c] = (value * 255.0).round() as u8;
        }
    }

    img
}
