// cli.rs — command line of myq2-demotool

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "myq2-demotool", version, about = "Inspect, convert and re-encode Quake 2 demos")]
pub struct CliArgs {
    /// Parser options file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output; repeat for trace.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize each level of a demo.
    Info {
        file: PathBuf,
    },

    /// Stream frames and messages as they are decoded.
    Frames {
        file: PathBuf,

        /// Also show prints, centerprints and layouts.
        #[arg(long)]
        messages: bool,
    },

    /// Write one player's view of a multi-view demo as a .dm2.
    Extract {
        file: PathBuf,

        /// Player slot to follow.
        #[arg(short, long)]
        player: u8,

        /// Level index for streams with several.
        #[arg(short, long, default_value_t = 0)]
        segment: usize,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Decode and write a demo again in its own container.
    Rewrite {
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Gzip a multi-view output.
        #[arg(long)]
        gzip: bool,
    },

    /// Parse many demos in parallel and report one line per file.
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl CliArgs {
    /// Default filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract() {
        let args = CliArgs::parse_from([
            "myq2-demotool", "-v", "extract", "duel.mvd2", "--player", "3", "-o", "duel.dm2",
        ]);
        assert_eq!(args.log_filter(), "debug");
        match args.command {
            Command::Extract { player, segment, output, .. } => {
                assert_eq!(player, 3);
                assert_eq!(segment, 0);
                assert_eq!(output, PathBuf::from("duel.dm2"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_batch_needs_files() {
        assert!(CliArgs::try_parse_from(["myq2-demotool", "batch"]).is_err());
        let args = CliArgs::try_parse_from(["myq2-demotool", "--config", "opts.toml", "batch", "a.dm2", "b.dm2"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("opts.toml")));
        assert!(matches!(args.command, Command::Batch { ref files } if files.len() == 2));
    }
}
