//! Resolve a requested path segment (`<id>` or `<id>.<ext>`) into a fragment
//! id and the representation to return.

use crate::{errors::CoreError, media::MediaType, registry::TypeRegistry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Representation {
    /// Stored bytes, unconverted.
    Stored,
    As(MediaType),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub id: String,
    pub representation: Representation,
}

const ALIASES: &[(&str, &str)] = &[("text/x-markdown", "text/markdown")];

fn canonical(essence: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == essence)
        .map(|(_, target)| *target)
        .unwrap_or(essence)
}

/// Split at the last `.`; the extension is mapped through the standard
/// extension table. Among several candidate types, one the registry knows is
/// preferred.
pub fn negotiate(segment: &str, registry: &TypeRegistry) -> Result<Negotiated, CoreError> {
    let Some((id, ext)) = segment.rsplit_once('.') else {
        return Ok(Negotiated {
            id: segment.to_owned(),
            representation: Representation::Stored,
        });
    };
    let ext = ext.to_ascii_lowercase();
    let candidates: Vec<MediaType> = if ext.is_empty() {
        Vec::new()
    } else {
        mime_guess::from_ext(&ext)
            .iter_raw()
            .filter_map(|raw| MediaType::parse(canonical(raw)).ok())
            .collect()
    };
    let chosen = candidates
        .iter()
        .find(|m| registry.is_supported_media(m))
        .or_else(|| candidates.first())
        .cloned()
        .ok_or(CoreError::UnsupportedRepresentation(ext))?;
    Ok(Negotiated {
        id: id.to_owned(),
        representation: Representation::As(chosen),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(segment: &str) -> String {
        match negotiate(segment, &TypeRegistry::standard()).unwrap().representation {
            Representation::As(m) => m.essence().to_owned(),
            Representation::Stored => "stored".to_owned(),
        }
    }

    #[test]
    fn bare_id_means_stored() {
        let n = negotiate("30a84843-0cd4", &TypeRegistry::standard()).unwrap();
        assert_eq!(n.id, "30a84843-0cd4");
        assert_eq!(n.representation, Representation::Stored);
    }

    #[test]
    fn known_extensions() {
        assert_eq!(target("abc.html"), "text/html");
        assert_eq!(target("abc.txt"), "text/plain");
        assert_eq!(target("abc.md"), "text/markdown");
        assert_eq!(target("abc.json"), "application/json");
        assert_eq!(target("abc.png"), "image/png");
        assert_eq!(target("abc.jpg"), "image/jpeg");
        assert_eq!(target("abc.JPEG"), "image/jpeg");
        assert_eq!(target("abc.webp"), "image/webp");
        assert_eq!(target("abc.gif"), "image/gif");
    }

    #[test]
    fn id_is_split_at_the_last_dot() {
        let n = negotiate("a.b.html", &TypeRegistry::standard()).unwrap();
        assert_eq!(n.id, "a.b");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let reg = TypeRegistry::standard();
        let err = negotiate("abc.nosuchext", &reg).unwrap_err();
        assert_eq!(err.code(), "E_UNSUPPORTED_REPRESENTATION");
        assert!(matches!(
            negotiate("abc.", &reg),
            Err(CoreError::UnsupportedRepresentation(ext)) if ext.is_empty()
        ));
    }
}
