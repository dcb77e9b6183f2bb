// myq2-demotool — command line front end for myq2-demo

mod cli;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rayon::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use myq2_demo::{dm2, extract, mvd, Demo, DemoError, DemoFormat, DemoResult, Dm2Reader, MvdReader, ParseOptions};
use myq2_wire::{MessageKind, ServerMessage, WireError};

use cli::{CliArgs, Command};

fn init_logging(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.log_filter());

    let options = match &args.config {
        Some(path) => match ParseOptions::load(path) {
            Ok(options) => options,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ParseOptions::default(),
    };

    let result = match args.command {
        Command::Info { file } => cmd_info(&file, options),
        Command::Frames { file, messages } => cmd_frames(&file, options, messages),
        Command::Extract { file, player, segment, output } => cmd_extract(&file, options, player, segment, &output),
        Command::Rewrite { file, output, gzip } => cmd_rewrite(&file, options, &output, gzip),
        Command::Batch { files } => cmd_batch(&files, options),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn describe(index: usize, demo: &Demo) -> String {
    let players: Vec<String> = demo
        .players()
        .into_iter()
        .map(|(slot, name)| format!("{}:{}", slot, name))
        .collect();
    format!(
        "[{}] map {:?} protocol {} flags {:?} frames {} players [{}]",
        index,
        demo.map_name(),
        demo.serverdata.protocol,
        demo.profile.flags,
        demo.frame_count,
        players.join(", ")
    )
}

fn cmd_info(file: &Path, options: ParseOptions) -> DemoResult<()> {
    let (format, demos) = myq2_demo::parse_file(file, options)?;
    println!("{}: {:?}, {} level(s)", file.display(), format, demos.len());
    for (i, demo) in demos.iter().enumerate() {
        println!("{}", describe(i, demo));
    }
    Ok(())
}

fn print_message(m: &ServerMessage) {
    match m {
        ServerMessage::Frame(f) => println!(
            "frame {:>6} delta {:>6} players {:>3} entities {:>4}{}",
            f.number,
            f.delta.map_or_else(|| "-".to_string(), |d| d.to_string()),
            f.players.len(),
            f.entities.len(),
            if f.valid { "" } else { " (invalid)" }
        ),
        ServerMessage::ServerData(sd) => println!("serverdata protocol {} count {} game {:?}", sd.protocol, sd.server_count, sd.game_dir),
        ServerMessage::Print(p) => print!("print {}: {}", p.level, p.text),
        ServerMessage::CenterPrint(s) => println!("centerprint: {}", s),
        ServerMessage::Layout(s) => println!("layout: {}", s),
        _ => {}
    }
}

/// Streams the file through the dispatcher without keeping frames.
fn cmd_frames(file: &Path, options: ParseOptions, messages: bool) -> DemoResult<()> {
    let options = ParseOptions { retain_frames: false, ..options };
    let mut kinds = vec![MessageKind::ServerData, MessageKind::Frame];
    if messages {
        kinds.extend([MessageKind::Print, MessageKind::CenterPrint, MessageKind::Layout]);
    }

    let format = sniff(file)?;
    let reader = BufReader::new(File::open(file)?);
    if format.is_multi_view() {
        let mut parser = MvdReader::with_options(reader, options)?;
        for kind in &kinds {
            parser.dispatcher_mut().register(*kind, print_message);
        }
        let result = drain(|| parser.read_packet());
        let segments = parser.finish();
        info!("{} level(s)", segments.len());
        result
    } else {
        let mut parser = Dm2Reader::with_options(reader, options);
        for kind in &kinds {
            parser.dispatcher_mut().register(*kind, print_message);
        }
        let result = drain(|| parser.read_lump());
        if let Some(demo) = parser.finish() {
            info!("{} frames", demo.frame_count);
        }
        result
    }
}

fn drain(mut step: impl FnMut() -> DemoResult<bool>) -> DemoResult<()> {
    while step()? {}
    Ok(())
}

fn sniff(file: &Path) -> DemoResult<DemoFormat> {
    use std::io::Read;
    let mut head = [0u8; 4];
    let got = File::open(file)?.take(4).read(&mut head)?;
    DemoFormat::detect(&head[..got])
        .ok_or_else(|| DemoError::decode(0, "header", WireError::InvalidFormat("file too short".into())))
}

fn cmd_extract(file: &Path, options: ParseOptions, player: u8, segment: usize, output: &Path) -> DemoResult<()> {
    let (format, demos) = myq2_demo::parse_file(file, options)?;
    if !format.is_multi_view() {
        warn!("{} is already single-view", file.display());
    }
    let Some(source) = demos.get(segment) else {
        return Err(DemoError::decode(
            0,
            "serverdata",
            WireError::InvalidFormat(format!("no level {} (have {})", segment, demos.len())),
        ));
    };
    let view = extract::single_view(source, player)?;
    let mut out = BufWriter::new(File::create(output)?);
    dm2::write_demo(&view, &mut out)?;
    info!("wrote {} frames to {}", view.frames.len(), output.display());
    Ok(())
}

fn cmd_rewrite(file: &Path, options: ParseOptions, output: &Path, gzip: bool) -> DemoResult<()> {
    let (format, demos) = myq2_demo::parse_file(file, options)?;
    let mut out = BufWriter::new(File::create(output)?);
    if format.is_multi_view() {
        mvd::write_demo(&demos, &mut out, gzip || format == DemoFormat::MultiViewGzip)?;
    } else {
        if gzip {
            warn!("single-view demos are written uncompressed");
        }
        for demo in &demos {
            dm2::write_demo(demo, &mut out)?;
        }
    }
    info!("rewrote {} level(s) to {}", demos.len(), output.display());
    Ok(())
}

fn cmd_batch(files: &[PathBuf], options: ParseOptions) -> DemoResult<()> {
    let results: Vec<(&PathBuf, DemoResult<(DemoFormat, Vec<Demo>)>)> = files
        .par_iter()
        .map(|file| (file, myq2_demo::parse_file(file, options.clone())))
        .collect();

    let mut failed = 0;
    for (file, result) in results {
        match result {
            Ok((format, demos)) => {
                let frames: usize = demos.iter().map(|d| d.frame_count).sum();
                println!("{}: {:?}, {} level(s), {} frames", file.display(), format, demos.len(), frames);
            }
            Err(e) => {
                failed += 1;
                println!("{}: error: {}", file.display(), e);
            }
        }
    }
    info!("{} of {} files parsed", files.len() - failed, files.len());
    if failed > 0 {
        return Err(DemoError::decode(
            0,
            "batch",
            WireError::InvalidFormat(format!("{} file(s) failed", failed)),
        ));
    }
    Ok(())
}
