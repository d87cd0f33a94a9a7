use neural_style as ns;
use std::sync::Arc;

fn main() -> Result<(), ns::Error> {
    let device = Default::default();

    // load the frozen feature extractor, once per process
    let extractor = Arc::new(ns::Extractor::<ns::CpuBackend>::from_file(
        "weights/vgg16.mpk",
        &device,
    )?);

    // create a new session
    let session = ns::Session::builder()
        .extractor(extractor)
        // the image whose layout we keep
        .content(&"imgs/building.jpg")
        // the image whose look we borrow
        .style(&"imgs/van_gogh.jpg")
        .build()?;

    // optimize the image
    let stylized = session.run(None);

    // save the image to the disk
    stylized.save("out/01.jpg")
}
