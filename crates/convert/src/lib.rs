//! Conversion engine. A dispatch table keyed by source [`Format`] is built
//! once; eligibility always comes from the [`TypeRegistry`].

pub mod format;
pub mod markdown;
pub mod raster;

use std::{borrow::Cow, collections::HashMap, sync::Arc};

use fragments_core::{Converter, CoreError, MediaType, TypeRegistry};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::format::Format;

/// Converts `data` from the first format to the second.
pub type ConvertFn = fn(&[u8], Format, Format, &ConvertOptions) -> Result<Vec<u8>, CoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Quality (1-100) for JPEG output, both on write and on conversion.
    pub jpeg_quality: u8,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

#[derive(Clone)]
pub struct ConversionEngine {
    registry: Arc<TypeRegistry>,
    table: Arc<HashMap<Format, ConvertFn>>,
    options: ConvertOptions,
}

fn no_route(from: Format, to: Format) -> CoreError {
    CoreError::unsupported_conversion(from.essence(), to.essence())
}

fn text_to_plain(data: &[u8], from: Format, to: Format, _: &ConvertOptions) -> Result<Vec<u8>, CoreError> {
    match to {
        Format::Plain => Ok(data.to_vec()),
        _ => Err(no_route(from, to)),
    }
}

fn from_markdown(data: &[u8], from: Format, to: Format, opts: &ConvertOptions) -> Result<Vec<u8>, CoreError> {
    match to {
        Format::Html => Ok(markdown::render_html(&String::from_utf8_lossy(data)).into_bytes()),
        _ => text_to_plain(data, from, to, opts),
    }
}

fn between_images(data: &[u8], from: Format, to: Format, opts: &ConvertOptions) -> Result<Vec<u8>, CoreError> {
    if !to.is_image() {
        return Err(no_route(from, to));
    }
    raster::transcode(data, from, to, opts.jpeg_quality)
}

fn default_table() -> HashMap<Format, ConvertFn> {
    let entries: [(Format, ConvertFn); 8] = [
        (Format::Plain, text_to_plain),
        (Format::Markdown, from_markdown),
        (Format::Html, text_to_plain),
        (Format::Json, text_to_plain),
        (Format::Png, between_images),
        (Format::Jpeg, between_images),
        (Format::Webp, between_images),
        (Format::Gif, between_images),
    ];
    entries.into_iter().collect()
}

impl ConversionEngine {
    pub fn new(registry: Arc<TypeRegistry>, options: ConvertOptions) -> Self {
        Self {
            registry,
            table: Arc::new(default_table()),
            options,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn options(&self) -> ConvertOptions {
        self.options
    }
}

impl Converter for ConversionEngine {
    fn can_convert(&self, from: &MediaType, to: &MediaType) -> bool {
        self.registry.can_convert(from, to)
    }

    fn convert(&self, from: &MediaType, data: &[u8], to: &MediaType) -> Result<Vec<u8>, CoreError> {
        let unsupported = || CoreError::unsupported_conversion(from.essence(), to.essence());
        if !self.can_convert(from, to) {
            return Err(unsupported());
        }
        if from.same_essence(to) {
            return Ok(data.to_vec());
        }
        let (Some(src), Some(dst)) = (Format::from_media(from), Format::from_media(to)) else {
            return Err(unsupported());
        };
        let convert = self.table.get(&src).ok_or_else(unsupported)?;
        debug!(
            from = src.essence(),
            to = dst.essence(),
            bytes = data.len(),
            "converting fragment data"
        );
        convert(data, src, dst, &self.options)
    }

    fn prepare<'a>(&self, media: &MediaType, data: &'a [u8]) -> Result<Cow<'a, [u8]>, CoreError> {
        match Format::from_media(media) {
            Some(Format::Jpeg) => {
                let out = raster::compress_jpeg(data, self.options.jpeg_quality)?;
                debug!(
                    before = data.len(),
                    after = out.len(),
                    quality = self.options.jpeg_quality,
                    "compressed jpeg on write"
                );
                Ok(Cow::Owned(out))
            }
            Some(f) if f.is_image() => {
                raster::ensure_format(data, f)?;
                Ok(Cow::Borrowed(data))
            }
            _ => Ok(Cow::Borrowed(data)),
        }
    }
}
