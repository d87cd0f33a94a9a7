use structopt::StructOpt;

use std::path::PathBuf;
use std::sync::Arc;

use neural_style::{
    image::ImageOutputFormat as ImgFmt, CpuBackend, Error, Extractor, ImageSource, ProgressUpdate,
    Session, TransferProgress,
};

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(90),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

#[derive(StructOpt)]
#[structopt(
    name = "neural-style",
    about = "Transfers the style of one image onto the content of another",
    rename_all = "kebab-case"
)]
struct Opt {
    /// The image whose spatial structure is preserved
    #[structopt(long, parse(from_os_str))]
    content: PathBuf,
    /// The image whose texture and color statistics are applied
    #[structopt(long, parse(from_os_str))]
    style: PathBuf,
    /// The path to save the stylized image to, the file extension of the
    /// path determines the image format used. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    /// The format to save the stylized image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "jpg",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// Side length in pixels of the square working resolution; both input
    /// images are resized to it without preserving aspect ratio
    #[structopt(long, default_value = "512")]
    size: u32,
    /// Multiplier on the style loss, larger values trade structure for texture
    #[structopt(long, default_value = "1000000")]
    style_weight: f32,
    /// Multiplier on the content loss
    #[structopt(long, default_value = "1")]
    content_weight: f32,
    /// How many objective evaluations the optimizer may spend
    #[structopt(long, default_value = "300")]
    iterations: usize,
    /// Comma separated feature layer indices where content loss is measured,
    /// overriding the default selection
    #[structopt(long, use_delimiter = true)]
    content_layers: Option<Vec<usize>>,
    /// Comma separated feature layer indices where style loss is measured,
    /// overriding the default selection
    #[structopt(long, use_delimiter = true)]
    style_layers: Option<Vec<usize>>,
    /// Pretrained feature extractor weights in burn's named MessagePack
    /// format. Without this the features are randomly initialized, which is
    /// only useful for smoke testing
    #[structopt(long, parse(from_os_str))]
    weights: Option<PathBuf>,
    /// Don't draw the progress bar
    #[structopt(long)]
    no_progress: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let device = Default::default();
    let extractor: Arc<Extractor<CpuBackend>> = Arc::new(match &args.weights {
        Some(path) => Extractor::from_file(path, &device)?,
        None => {
            log::warn!("no --weights given, using randomly initialized features; expect noise rather than style");
            Extractor::new(&device)
        }
    });

    let mut sb = Session::builder()
        .extractor(extractor)
        .content(ImageSource::from_path(&args.content))
        .style(ImageSource::from_path(&args.style))
        .output_size(args.size)
        .style_weight(args.style_weight)
        .content_weight(args.content_weight)
        .iterations(args.iterations);

    if let Some(layers) = args.content_layers {
        sb = sb.content_layers(layers);
    }

    if let Some(layers) = args.style_layers {
        sb = sb.style_layers(layers);
    }

    let session = sb.build()?;

    let progress: Option<Box<dyn TransferProgress>> = if !args.no_progress {
        Some(Box::new(ProgressOutput::new(args.iterations as u64 + 1)))
    } else {
        None
    };

    let stylized = session.run(progress);
    let stats = stylized.stats();

    if args.output_path.to_str() == Some("-") {
        let out = std::io::stdout();
        let mut out = out.lock();
        stylized.write(&mut out, args.out_fmt)?;
    } else {
        // This won't respect the output format specified by the user,
        // only the extension on the path they specify, but that makes
        // more sense, and is probably better than detecting and emitting
        // an error
        stylized.save(&args.output_path)?;
    }

    log::info!(
        "style transfer complete after {} evaluations, style loss {:.4}, content loss {:.4}",
        stats.iterations,
        stats.style_loss,
        stats.content_loss
    );

    Ok(())
}

use indicatif::{ProgressBar, ProgressStyle};

struct ProgressOutput {
    pb: ProgressBar,
}

impl ProgressOutput {
    fn new(total: u64) -> Self {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .progress_chars("##-"),
        );

        Self { pb }
    }
}

impl Drop for ProgressOutput {
    fn drop(&mut self) {
        self.pb.finish();
    }
}

impl TransferProgress for ProgressOutput {
    fn update(&mut self, update: ProgressUpdate) {
        self.pb.set_position(update.iteration as u64);
        self.pb.set_message(&format!(
            "style {:.4} content {:.4}",
            update.style_loss, update.content_loss
        ));
    }
}
