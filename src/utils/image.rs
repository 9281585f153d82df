//! Image reference parsing

use std::path::PathBuf;

use base64::Engine;

use crate::error::{Error, Result};

/// Where an image comes from, chosen by the reference's 4-character prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `http...` - fetched over the network
    Url(String),
    /// `path:<file>` - read from the local filesystem
    Path(PathBuf),
    /// `data:image/jpeg;base64,<payload>` - inline
    Base64(String),
}

impl ImageSource {
    pub fn parse(item: &str) -> Result<Self> {
        match item.get(..4) {
            Some("http") => Ok(ImageSource::Url(item.to_string())),
            Some("path") => {
                let path = item.strip_prefix("path:").unwrap_or(&item[4..]);
                if path.is_empty() {
                    return Err(Error::invalid_input("empty image path"));
                }
                Ok(ImageSource::Path(PathBuf::from(path)))
            }
            Some("data") => {
                let (_, payload) = item
                    .split_once(',')
                    .ok_or_else(|| Error::invalid_input("data reference has no base64 payload"))?;
                Ok(ImageSource::Base64(payload.trim().to_string()))
            }
            _ => Err(Error::invalid_input(
                "invalid input item, must be one of path, url, base64 code",
            )),
        }
    }

    /// Short label for logs and errors; never includes inline payloads
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Base64(payload) => format!("inline image ({} base64 chars)", payload.len()),
        }
    }
}

/// Decode a standard base64 payload
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schemes() {
        assert_eq!(
            ImageSource::parse("https://cdn.example.com/a.jpg").unwrap(),
            ImageSource::Url("https://cdn.example.com/a.jpg".to_string())
        );
        assert_eq!(
            ImageSource::parse("path:/data/faces/1.jpg").unwrap(),
            ImageSource::Path(PathBuf::from("/data/faces/1.jpg"))
        );
        assert_eq!(
            ImageSource::parse("data:image/jpeg;base64,QUJD").unwrap(),
            ImageSource::Base64("QUJD".to_string())
        );
    }

    #[test]
    fn test_path_strip_keeps_leading_letters() {
        // a naive character strip would eat the leading "pa" of "patches"
        assert_eq!(
            ImageSource::parse("path:patches/a.png").unwrap(),
            ImageSource::Path(PathBuf::from("patches/a.png"))
        );
    }

    #[test]
    fn test_unknown_scheme_is_invalid_input() {
        for item in ["ftp://x/y.jpg", "/tmp/a.jpg", "abc", "", "QUJD"] {
            assert!(matches!(ImageSource::parse(item), Err(Error::InvalidInput(_))), "{}", item);
        }
        assert!(ImageSource::parse("data:image/jpeg;base64").is_err());
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("QUJD").unwrap(), b"ABC".to_vec());
        assert!(matches!(decode_base64("%%%"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_describe_hides_payload() {
        let source = ImageSource::Base64("QUJD".repeat(10));
        assert_eq!(source.describe(), "inline image (40 base64 chars)");
    }
}
