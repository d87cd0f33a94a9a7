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
        .build()?;

    // print the losses every 50 evaluations
    let progress: Box<dyn ns::TransferProgress> = Box::new(|info: ns::ProgressUpdate| {
        if info.iteration % 50 == 0 {
            println!(
                "iteration {}/{}: style loss {:.4}, content loss {:.4}",
                info.iteration, info.total, info.style_loss, info.content_loss
            );
        }
    });

    let stylized = session.run(Some(progress));

    let stats = stylized.stats();
    println!(
        "finished after {} evaluations, final style loss {:.4}",
        stats.iterations, stats.style_loss
    );

    stylized.save("out/03.jpg")
}
