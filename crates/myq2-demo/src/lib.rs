// myq2-demo — Quake 2 demo containers
//
// Single-view .dm2 recordings and multi-view MVD2 recordings: readers that
// rebuild full frames from the delta stream, writers that produce them
// again, and per-message callbacks during a parse.

pub mod assembler;
pub mod config;
pub mod demo;
pub mod dispatch;
pub mod dm2;
pub mod error;
pub mod extract;
pub mod mvd;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub use assembler::{FrameAssembler, MvdAssembler};
pub use config::{ParseOptions, UnknownPlayerPolicy};
pub use demo::Demo;
pub use dispatch::Dispatcher;
pub use dm2::Dm2Reader;
pub use error::{DemoError, DemoResult};
pub use mvd::MvdReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoFormat {
    SingleView,
    MultiView,
    /// Gzip wrapped; only multi-view streams are compressed.
    MultiViewGzip,
}

impl DemoFormat {
    /// Guesses the container from the first bytes of a file.
    pub fn detect(head: &[u8]) -> Option<Self> {
        if head.starts_with(&mvd::GZIP_MAGIC) {
            Some(DemoFormat::MultiViewGzip)
        } else if head.starts_with(&mvd::MVD_MAGIC.to_le_bytes()) {
            Some(DemoFormat::MultiView)
        } else if head.len() >= 4 {
            Some(DemoFormat::SingleView)
        } else {
            None
        }
    }

    pub fn is_multi_view(self) -> bool {
        self != DemoFormat::SingleView
    }
}

/// Parses any supported demo file. Single-view files yield one segment.
pub fn parse_file(path: impl AsRef<Path>, options: ParseOptions) -> DemoResult<(DemoFormat, Vec<Demo>)> {
    let path = path.as_ref();
    let mut head = [0u8; 4];
    let got = dm2::read_full(&mut File::open(path)?, &mut head)?;
    let format = DemoFormat::detect(&head[..got]).ok_or_else(|| {
        DemoError::decode(0, "header", myq2_wire::WireError::InvalidFormat("file too short".into()))
    })?;

    let reader = BufReader::new(File::open(path)?);
    let demos = parse_reader(format, reader, options)?;
    Ok((format, demos))
}

pub fn parse_reader<R: Read>(format: DemoFormat, reader: R, options: ParseOptions) -> DemoResult<Vec<Demo>> {
    match format {
        DemoFormat::SingleView => Ok(vec![dm2::parse_with_options(reader, options)?]),
        DemoFormat::MultiView | DemoFormat::MultiViewGzip => mvd::parse_with_options(reader, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(DemoFormat::detect(b"MVD2\x01\x00"), Some(DemoFormat::MultiView));
        assert_eq!(DemoFormat::detect(&[0x1f, 0x8b, 8, 0]), Some(DemoFormat::MultiViewGzip));
        assert_eq!(DemoFormat::detect(&[0x10, 0, 0, 0]), Some(DemoFormat::SingleView));
        assert_eq!(DemoFormat::detect(&[0x10]), None);
        assert!(DemoFormat::MultiViewGzip.is_multi_view());
    }

    #[test]
    fn test_parse_file_detects_container() {
        let dir = std::env::temp_dir().join(format!("myq2-demo-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let sd = myq2_wire::ServerData { protocol: 34, map_name: "base1".into(), ..Default::default() };
        let single = Demo::new(sd, myq2_wire::ProtocolProfile::standard());
        let mut bytes = Vec::new();
        dm2::write_demo(&single, &mut bytes).unwrap();
        let path = dir.join("single.dm2");
        std::fs::write(&path, &bytes).unwrap();

        let (format, demos) = parse_file(&path, ParseOptions::default()).unwrap();
        assert_eq!(format, DemoFormat::SingleView);
        assert_eq!(demos.len(), 1);
        assert_eq!(demos[0].map_name(), "base1");

        let sd = myq2_wire::ServerData {
            protocol: myq2_wire::qcommon::PROTOCOL_VERSION_MVD,
            minor_version: 2010,
            ..Default::default()
        };
        let multi = Demo::new(sd, myq2_wire::ProtocolProfile::standard());
        let mut bytes = Vec::new();
        mvd::write_demo(&[multi.clone(), multi], &mut bytes, true).unwrap();
        let path = dir.join("multi.mvd2.gz");
        std::fs::write(&path, &bytes).unwrap();

        let (format, demos) = parse_file(&path, ParseOptions::default()).unwrap();
        assert_eq!(format, DemoFormat::MultiViewGzip);
        assert_eq!(demos.len(), 2);
        assert_eq!(demos[0].frame_count, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
