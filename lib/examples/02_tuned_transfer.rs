use neural_style as ns;
use std::sync::Arc;

fn main() -> Result<(), ns::Error> {
    let device = Default::default();
    let extractor = Arc::new(ns::Extractor::<ns::CpuBackend>::from_file(
        "weights/vgg16.mpk",
        &device,
    )?);

    let session = ns::Session::builder()
        .extractor(extractor)
        .content(&"imgs/building.jpg")
        .style(&"imgs/van_gogh.jpg")
        // work at a smaller resolution for a faster run
        .output_size(256)
        // let the texture dominate the layout a little more than the default
        .style_weight(5_000_000.0)
        .content_weight(1.0)
        // measure content a block earlier than the default conv4_2, which
        // keeps finer structural detail
        .content_layers(vec![10])
        // drop the deepest style probe
        .style_layers(vec![0, 5, 10, 17])
        .iterations(150)
        .build()?;

    let stylized = session.run(None);

    stylized.save("out/02.jpg")
}
