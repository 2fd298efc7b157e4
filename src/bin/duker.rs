//! duker - mask the faces in one image file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use duker::{
    detect::DetectorBuilder, Emitted, Encoding, FaceService, Region, RegionDetector, Sink,
    StubDetector,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Paint the duke glyph over every face in an image")]
struct Args {
    /// Input image (PNG, JPEG, BMP or GIF).
    input: PathBuf,

    /// Where to write the masked image. Defaults to `<input>.duker.<ext>`.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Output encoding (png|jpeg|bmp). Defaults to the output extension, then PNG.
    #[arg(long)]
    format: Option<String>,

    /// Detect and transform, but write nothing; print the face count.
    #[arg(long)]
    dry_run: bool,

    /// SeetaFace classifier model. Defaults to the bundled frontal-face model.
    #[arg(long, env = "DUKER_CLASSIFIER_FILE")]
    classifier_file: Option<PathBuf>,

    /// Fixed region `x,y,w,h` to mask instead of running the classifier. Repeatable.
    #[arg(long = "region", value_parser = parse_region, value_name = "X,Y,W,H")]
    regions: Vec<Region>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let detector: Arc<dyn RegionDetector> = if args.regions.is_empty() {
        let mut builder = DetectorBuilder::new();
        if let Some(path) = &args.classifier_file {
            builder = builder.classifier_file(path);
        }
        Arc::new(builder.build()?)
    } else {
        Arc::new(StubDetector::new(args.regions.clone()))
    };
    let service = FaceService::with_detector(detector);

    let payload = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    if args.dry_run {
        let dispatched = service.handle(&payload, Sink::Discard)?;
        println!("{}", dispatched.region_count);
        return Ok(());
    }

    let encoding = output_encoding(args.format.as_deref(), args.output.as_ref())?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input, encoding));

    let dispatched = service.handle(&payload, Sink::Respond(encoding))?;
    let Emitted::Body(body) = dispatched.emitted else {
        return Err(anyhow!("respond sink produced no body"));
    };
    std::fs::write(&output, &body.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!(
        "{} faces masked, wrote {} ({})",
        dispatched.region_count,
        output.display(),
        body.encoding.content_type()
    );
    Ok(())
}

fn output_encoding(format: Option<&str>, output: Option<&PathBuf>) -> Result<Encoding> {
    if let Some(name) = format {
        return Encoding::from_name(name).ok_or_else(|| anyhow!("unsupported format: {}", name));
    }
    let from_ext = output
        .and_then(|p| p.extension())
        .and_then(|ext| ext.to_str())
        .and_then(Encoding::from_name);
    Ok(from_ext.unwrap_or_default())
}

fn default_output(input: &std::path::Path, encoding: Encoding) -> PathBuf {
    let ext = match encoding {
        Encoding::Png => "png",
        Encoding::Jpeg => "jpg",
        Encoding::Bmp => "bmp",
    };
    input.with_extension(format!("duker.{ext}"))
}

fn parse_region(value: &str) -> std::result::Result<Region, String> {
    let fields: Vec<u32> = value
        .split(',')
        .map(|f| f.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid region '{value}': {e}"))?;
    match fields.as_slice() {
        [x, y, w, h] => Ok(Region::new(*x, *y, *w, *h)),
        _ => Err(format!("region '{value}' must be x,y,w,h")),
    }
}
