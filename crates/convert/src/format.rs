use fragments_core::MediaType;
use image::ImageFormat;

/// Closed set of formats the engine knows how to read or produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Plain,
    Markdown,
    Html,
    Json,
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl Format {
    pub const ALL: [Format; 8] = [
        Format::Plain,
        Format::Markdown,
        Format::Html,
        Format::Json,
        Format::Png,
        Format::Jpeg,
        Format::Webp,
        Format::Gif,
    ];

    pub fn from_essence(essence: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.essence() == essence)
    }

    pub fn from_media(media: &MediaType) -> Option<Self> {
        Self::from_essence(media.essence())
    }

    pub fn essence(self) -> &'static str {
        match self {
            Format::Plain => "text/plain",
            Format::Markdown => "text/markdown",
            Format::Html => "text/html",
            Format::Json => "application/json",
            Format::Png => "image/png",
            Format::Jpeg => "image/jpeg",
            Format::Webp => "image/webp",
            Format::Gif => "image/gif",
        }
    }

    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            Format::Png => Some(ImageFormat::Png),
            Format::Jpeg => Some(ImageFormat::Jpeg),
            Format::Webp => Some(ImageFormat::WebP),
            Format::Gif => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    pub fn is_image(self) -> bool {
        self.image_format().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essences_round_trip() {
        for f in Format::ALL {
            assert_eq!(Format::from_essence(f.essence()), Some(f));
        }
        assert_eq!(Format::from_essence("video/ogg"), None);
    }

    #[test]
    fn parameters_do_not_matter() {
        let m = MediaType::parse("text/markdown; charset=utf-8").unwrap();
        assert_eq!(Format::from_media(&m), Some(Format::Markdown));
    }
}
