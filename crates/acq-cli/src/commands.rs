use std::fs;
use std::path::Path;
use std::sync::Arc;

use acq_datastore::{Datastore, DatastoreConfig, InMemoryStorage, SaveMode};
use acq_types::{Coords, Image, SummaryMetadata};
use anyhow::Context;
use colored::Colorize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Info(args) => cmd_info(args, &cli.format),
        Command::Ls(args) => cmd_ls(args, &cli.format),
        Command::Generate(args) => cmd_generate(args, config),
        Command::Convert(args) => cmd_convert(args, config),
        Command::Config => cmd_config(&config, &cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DatastoreConfig> {
    let Some(path) = path else {
        return Ok(DatastoreConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// A stack export is a single `.acqstack` file (or a directory holding
/// one); anything else is treated as a plane series.
fn detect_mode(path: &Path) -> SaveMode {
    let is_stack = |p: &Path| p.extension().is_some_and(|ext| ext == "acqstack");
    if path.is_file() || is_stack(path) {
        return SaveMode::StackFile;
    }
    let holds_stack = fs::read_dir(path)
        .map(|entries| entries.flatten().any(|entry| is_stack(entry.path().as_path())))
        .unwrap_or(false);
    if holds_stack {
        SaveMode::StackFile
    } else {
        SaveMode::PlaneSeries
    }
}

fn resolve_mode(explicit: Option<&str>, path: &Path) -> anyhow::Result<SaveMode> {
    match explicit {
        Some(name) => Ok(name.parse()?),
        None => Ok(detect_mode(path)),
    }
}

fn cmd_info(args: InfoArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mode = resolve_mode(args.mode.as_deref(), &args.path)?;
    let store = Datastore::load(mode, &args.path)
        .with_context(|| format!("opening {}", args.path.display()))?;
    let summary = store.summary_metadata()?.unwrap_or_default();
    let images = store.num_images()?;
    let mut axes = Vec::new();
    for axis in store.axes()? {
        let length = store.axis_length(&axis)?;
        axes.push((axis, length));
    }

    if *format == OutputFormat::Json {
        let axes: serde_json::Map<String, serde_json::Value> = axes
            .into_iter()
            .map(|(axis, length)| (axis, length.into()))
            .collect();
        let out = serde_json::json!({
            "mode": mode.short_name(),
            "images": images,
            "axes": axes,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", "Dataset".bold(), args.path.display());
    println!("  Format: {}", mode.to_string().cyan());
    println!("  Name: {}", summary.name.as_deref().unwrap_or("(unnamed)"));
    println!("  Images: {}", images.to_string().bold());
    if axes.is_empty() {
        println!("  Axes: {}", "none".dimmed());
    }
    for (axis, length) in &axes {
        println!("  {:<10} {}", format!("{axis}:").yellow(), length);
    }
    if !summary.axis_order.is_empty() {
        println!("  Axis order: {}", summary.axis_order.join(" > "));
    }
    if let Some(dims) = &summary.intended_dimensions {
        println!("  Intended: {dims}");
    }
    Ok(())
}

fn cmd_ls(args: LsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mode = resolve_mode(args.mode.as_deref(), &args.path)?;
    let store = Datastore::load(mode, &args.path)
        .with_context(|| format!("opening {}", args.path.display()))?;

    let mut coords = match &args.filter {
        Some(filter) => {
            let partial: Coords = filter
                .parse()
                .with_context(|| format!("bad filter {filter:?}"))?;
            store
                .images_matching(&partial)?
                .into_iter()
                .map(|image| image.coords)
                .collect()
        }
        None => store.unordered_coords()?,
    };
    coords.sort();

    if *format == OutputFormat::Json {
        let listed: Vec<String> = coords.iter().map(ToString::to_string).collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }
    for c in &coords {
        println!("{c}");
    }
    println!("{} coordinates", coords.len().to_string().bold());
    Ok(())
}

fn cmd_generate(args: GenerateArgs, config: DatastoreConfig) -> anyhow::Result<()> {
    let mode: SaveMode = args.mode.parse()?;
    let store = Datastore::with_config(config).with_storage(Arc::new(InMemoryStorage::new()));

    let name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "generated".into());
    let channel_names = (0..args.channels).map(|c| format!("Ch{c}")).collect();
    store.set_summary_metadata(
        SummaryMetadata::default()
            .with_name(name)
            .with_channel_names(channel_names)
            .with_z_step_um(1.0),
    )?;

    let plane_len = plane_byte_len(args.width, args.height)?;
    for position in 0..args.positions {
        for time in 0..args.time {
            for z in 0..args.z {
                for channel in 0..args.channels {
                    let coords = Coords::builder()
                        .stage_position(position)
                        .time(time)
                        .z(z)
                        .channel(channel)
                        .build();
                    let seed = (position + time + z + channel) as u8;
                    let pixels: Vec<u8> = (0..plane_len)
                        .map(|i| seed.wrapping_add(i as u8))
                        .collect();
                    let image = Image::new(coords, args.width, args.height, 2, pixels)
                        .with_metadata("Exposure-ms", "10");
                    store.put_image(image)?;
                }
            }
        }
    }

    let saved = store.save(mode, &args.path)?;
    println!(
        "{} Generated {} images as {} in {}",
        "✓".green().bold(),
        saved.num_images()?.to_string().bold(),
        mode.to_string().cyan(),
        args.path.display()
    );
    Ok(())
}

/// Bytes in one 16-bit plane of the given size.
fn plane_byte_len(width: u32, height: u32) -> anyhow::Result<usize> {
    usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
        .and_then(|pixels| pixels.checked_mul(2))
        .with_context(|| format!("a {width}x{height} plane is too large"))
}

fn cmd_convert(args: ConvertArgs, config: DatastoreConfig) -> anyhow::Result<()> {
    let from = resolve_mode(args.from.as_deref(), &args.source)?;
    let to: SaveMode = args.to.parse()?;
    let source = Datastore::load_with_config(from, &args.source, config)
        .with_context(|| format!("opening {}", args.source.display()))?;
    let saved = source
        .save(to, &args.destination)
        .with_context(|| format!("saving to {}", args.destination.display()))?;
    println!(
        "{} Converted {} images: {} → {}",
        "✓".green().bold(),
        saved.num_images()?.to_string().bold(),
        from.to_string().yellow(),
        to.to_string().cyan()
    );
    Ok(())
}

fn cmd_config(config: &DatastoreConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}
