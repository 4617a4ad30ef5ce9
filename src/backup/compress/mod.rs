use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;

use derive_more::From;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::{Validate, ValidationErrors};

use std::io;
use std::io::Write;
use std::result;
use std::sync::{Arc, OnceLock};

/// Default gzip level, same as `gzip -6`.
static DEFAULT_GZIP_LEVEL: u32 = 6;

#[derive(io_enum::Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
}

#[derive(Clone, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "compressor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    None,
    Gzip(GzipConfig),
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::Gzip(GzipConfig::default())
    }
}

/// Deflate compression in a gzip wrapper.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    /// 0 stores, 9 compresses hardest.
    #[validate(range(min = 0, max = 9))]
    pub level: Option<u32>,
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            CompressorConfig::None => Ok(()),
            CompressorConfig::Gzip(gzip) => gzip.validate(),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Compressor<W>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Gzip(w) => Finish::finish(w),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    fn build_compressor(&self, writer: W) -> Compressor<W> {
        match self {
            CompressorConfig::None => Compressor::None(writer),
            CompressorConfig::Gzip(gzip) => {
                let level = gzip.level.unwrap_or(DEFAULT_GZIP_LEVEL);
                tracing::debug!("Creating gzip compressor with level={}", level);
                GzEncoder::new(writer, Compression::new(level)).into()
            }
        }
    }
}

static GZ_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();
impl FileExtProvider for CompressorConfig {
    fn file_ext(&self) -> Option<Arc<str>> {
        match self {
            CompressorConfig::None => None,
            CompressorConfig::Gzip(_) => Some(GZ_FILE_EXT.get_or_init(|| "gz".into()).clone()),
        }
    }
}
