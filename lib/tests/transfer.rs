use neural_style as ns;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

type Backend = ns::CpuBackend;

fn extractor() -> Arc<ns::Extractor<Backend>> {
    Arc::new(ns::Extractor::new(&Default::default()))
}

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("neural-style-e2e");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn solid(side: u32, color: [u8; 3]) -> ns::image::RgbImage {
    ns::image::RgbImage::from_pixel(side, side, ns::image::Rgb(color))
}

fn gradient(side: u32) -> ns::image::RgbImage {
    ns::image::RgbImage::from_fn(side, side, |x, y| {
        ns::image::Rgb([(x * 7) as u8, (y * 7) as u8, ((x + y) * 3) as u8])
    })
}

#[test]
fn corrupt_content_is_fatal_and_writes_nothing() {
    let content = temp_path("corrupt_content.jpg");
    std::fs::write(&content, b"this is not an image").unwrap();

    let style = temp_path("corrupt_style.png");
    solid(16, [0, 0, 255]).save(&style).unwrap();

    let output = temp_path("corrupt_output.png");

    let result = ns::transfer(
        extractor(),
        &content,
        &style,
        &output,
        16,
        1_000_000.0,
        1.0,
        3,
    );

    assert!(matches!(result, Err(ns::Error::Image(_))));
    assert!(!output.exists());
}

#[test]
fn empty_selections_return_the_content_unchanged() {
    let content_img = gradient(32);
    let style_img = solid(32, [0, 0, 255]);

    let session = ns::Session::builder()
        .extractor(extractor())
        .content(ns::image::DynamicImage::ImageRgb8(content_img.clone()))
        .style(ns::image::DynamicImage::ImageRgb8(style_img))
        .output_size(32)
        .content_layers(Vec::new())
        .style_layers(Vec::new())
        .iterations(3)
        .build()
        .unwrap();

    let stylized = session.run(None);

    // with no probes there is no gradient signal, the output is the content
    // tensor bit for bit
    assert_eq!(stylized.as_ref(), &content_img);
}

#[test]
fn zero_style_weight_preserves_content() {
    let content_img = gradient(32);
    let style_img = solid(32, [0, 0, 255]);

    let session = ns::Session::builder()
        .extractor(extractor())
        .content(ns::image::DynamicImage::ImageRgb8(content_img.clone()))
        .style(ns::image::DynamicImage::ImageRgb8(style_img))
        .output_size(32)
        .style_weight(0.0)
        .content_layers(vec![5])
        .style_layers(vec![0, 5])
        .iterations(8)
        .build()
        .unwrap();

    let stylized = session.run(None);

    // the content term starts at its optimum and the style term is weighted
    // to zero, so no gradient ever moves the image
    let out = stylized.as_ref();
    let mut mse = 0.0f64;
    for (a, b) in out.pixels().zip(content_img.pixels()) {
        for c in 0..3 {
            let d = f64::from(a[c]) - f64::from(b[c]);
            mse += d * d;
        }
    }
    mse /= f64::from(32 * 32 * 3);
    assert!(mse < 1.0, "content drifted, mse {}", mse);

    assert!(stylized.stats().content_loss < 1e-6);
}

#[test]
fn style_objective_changes_the_image() {
    let content = temp_path("red_content.png");
    solid(48, [255, 0, 0]).save(&content).unwrap();

    let style = temp_path("blue_style.png");
    solid(48, [0, 0, 255]).save(&style).unwrap();

    let first_style_loss = Arc::new(Mutex::new(None::<f32>));
    let seen = first_style_loss.clone();
    let progress: Box<dyn ns::TransferProgress> = Box::new(move |info: ns::ProgressUpdate| {
        let mut first = seen.lock().unwrap();
        if first.is_none() {
            *first = Some(info.style_loss);
        }
    });

    let session = ns::Session::builder()
        .extractor(extractor())
        .content(&content)
        .style(&style)
        .output_size(48)
        .style_weight(1_000_000.0)
        .content_weight(1.0)
        .content_layers(vec![5])
        .style_layers(vec![0, 5])
        .iterations(20)
        .build()
        .unwrap();

    let stylized = session.run(Some(progress));

    assert_eq!(stylized.stats().iterations, 21);

    // the style statistics of a blue image differ from those of a red one,
    // so the run starts with a real objective...
    let first = first_style_loss.lock().unwrap().unwrap();
    assert!(first > 0.0);

    // ...and a non-trivial, in-range change must have happened
    let out = stylized.as_ref();
    assert_eq!(out.dimensions(), (48, 48));
    let changed = out
        .pixels()
        .any(|p| p[0] != 255 || p[1] != 0 || p[2] != 0);
    assert!(changed, "the working image never moved");
}

#[test]
fn transfer_writes_an_output_file() {
    let content = temp_path("transfer_content.png");
    gradient(32).save(&content).unwrap();

    let style = temp_path("transfer_style.png");
    solid(32, [0, 0, 255]).save(&style).unwrap();

    let output = temp_path("transfer_output.jpg");
    let _ = std::fs::remove_file(&output);

    ns::transfer(
        extractor(),
        &content,
        &style,
        &output,
        32,
        1_000_000.0,
        1.0,
        3,
    )
    .unwrap();

    let written = ns::image::open(&output).unwrap().to_rgb();
    assert_eq!(written.dimensions(), (32, 32));
}

#[test]
fn progress_reports_every_evaluation() {
    let content_img = gradient(16);
    let style_img = solid(16, [0, 0, 255]);

    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let progress: Box<dyn ns::TransferProgress> = Box::new(move |info: ns::ProgressUpdate| {
        let so_far = seen.fetch_add(1, Ordering::SeqCst) + 1;
        // the counter increases by exactly one per evaluation
        assert_eq!(info.iteration, so_far);
    });

    let session = ns::Session::builder()
        .extractor(extractor())
        .content(ns::image::DynamicImage::ImageRgb8(content_img))
        .style(ns::image::DynamicImage::ImageRgb8(style_img))
        .output_size(16)
        .content_layers(vec![0])
        .style_layers(vec![0])
        .iterations(6)
        .build()
        .unwrap();

    let _ = session.run(Some(progress));
    assert_eq!(count.load(Ordering::SeqCst), 7);
}

#[test]
fn builder_rejects_bad_configurations() {
    let content = ns::image::DynamicImage::ImageRgb8(gradient(16));
    let style = ns::image::DynamicImage::ImageRgb8(solid(16, [0, 0, 255]));

    // negative style weight
    let result = ns::Session::builder()
        .extractor(extractor())
        .content(content.clone())
        .style(style.clone())
        .style_weight(-1.0)
        .build();
    assert!(matches!(result, Err(ns::Error::InvalidRange(_))));

    // probe index beyond the feature stack
    let result = ns::Session::builder()
        .extractor(extractor())
        .content(content.clone())
        .style(style.clone())
        .style_layers(vec![31])
        .build();
    assert!(matches!(result, Err(ns::Error::LayerOutOfRange { .. })));

    // missing extractor
    let result = ns::Session::<Backend>::builder()
        .content(content)
        .style(style)
        .build();
    assert!(matches!(result, Err(ns::Error::MissingInput(_))));
}
