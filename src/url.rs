use maplit::hashmap;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use strfmt::strfmt;

use crate::bounding_box::MercatorBounds;
use crate::error::Error;

/// ArcGIS World Imagery export endpoint, in Web-Mercator (EPSG:3857).
pub const DEFAULT_IMAGERY_URL: &str = "https://services.arcgisonline.com/arcgis/rest/services/World_Imagery/MapServer/export?bbox={xmin}%2C{ymin}%2C{xmax}%2C{ymax}&bboxSR=102100&imageSR=102100&size={width}%2C{height}&format=jpg&transparent=false&f=image";

/// The TerraSync base URLs requests are spread over.
pub struct Mirrors {
    next: AtomicUsize,
    bases: Vec<String>,
}

impl Mirrors {
    /// Each base is normalized to end in `/`.
    pub fn new<I, S>(bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bases = bases
            .into_iter()
            .map(Into::into)
            .filter(|base| !base.is_empty())
            .map(|mut base| {
                if !base.ends_with('/') {
                    base.push('/');
                }
                base
            })
            .collect();

        Self {
            next: AtomicUsize::new(0),
            bases,
        }
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// Full URL of a remote-relative path, rotating through the mirrors.
    pub fn url(&self, relative: &str) -> String {
        match self.bases.len() {
            0 => relative.to_owned(),
            len => {
                let inc = self.next.fetch_add(1, Ordering::Relaxed);
                format!("{}{}", self.bases[inc % len], relative)
            }
        }
    }

    /// Strips whichever mirror prefix `url` starts with.
    pub fn relative<'a>(&self, url: &'a str) -> Option<&'a str> {
        self.bases.iter().find_map(|base| url.strip_prefix(base.as_str()))
    }
}

impl fmt::Debug for Mirrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mirrors").field("bases", &self.bases).finish()
    }
}

/// Imagery export URL with the replacement specifiers `{xmin}`, `{ymin}`,
/// `{xmax}`, `{ymax}` (Web-Mercator meters), `{width}` and `{height}` (pixels).
///
/// When a token is configured it is appended as a `token` query parameter.
pub struct ImageryUrl {
    format_str: String,
    token: Option<String>,
}

impl ImageryUrl {
    pub fn new(format_str: String, token: Option<String>) -> Self {
        Self {
            format_str,
            token: token.filter(|token| !token.is_empty()),
        }
    }

    pub fn export_url(&self, bbox: &MercatorBounds, width: u32, height: u32) -> Result<String, Error> {
        let vars = hashmap! {
            "xmin".to_owned() => bbox.min_x.to_string(),
            "ymin".to_owned() => bbox.min_y.to_string(),
            "xmax".to_owned() => bbox.max_x.to_string(),
            "ymax".to_owned() => bbox.max_y.to_string(),
            "width".to_owned() => width.to_string(),
            "height".to_owned() => height.to_string(),
        };

        let mut url = strfmt(&self.format_str, &vars).map_err(|e| Error::UrlTemplate(e.to_string()))?;
        if let Some(token) = &self.token {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str("token=");
            url.push_str(token);
        }

        Ok(url)
    }
}

impl PartialEq for ImageryUrl {
    fn eq(&self, other: &Self) -> bool {
        self.format_str == other.format_str && self.token == other.token
    }
}

impl fmt::Debug for ImageryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryUrl")
            .field("format_str", &self.format_str)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_rotate() {
        let mirrors = Mirrors::new(vec!["https://a.example/ts", "https://b.example/ts/"]);
        assert_eq!(mirrors.url("ws2/x.stg"), "https://a.example/ts/ws2/x.stg");
        assert_eq!(mirrors.url("ws2/x.stg"), "https://b.example/ts/ws2/x.stg");
        assert_eq!(mirrors.url("ws2/x.stg"), "https://a.example/ts/ws2/x.stg");
    }

    #[test]
    fn relative_strips_any_mirror() {
        let mirrors = Mirrors::new(vec!["https://a.example/ts", "https://b.example/ts/"]);
        assert_eq!(mirrors.relative("https://b.example/ts/ws2/x.stg"), Some("ws2/x.stg"));
        assert_eq!(mirrors.relative("https://c.example/ws2/x.stg"), None);
    }

    #[test]
    fn imagery_url_substitutes_bbox_and_size() {
        let url = ImageryUrl::new(
            "https://img.example/export?bbox={xmin},{ymin},{xmax},{ymax}&size={width},{height}".into(),
            Some("secret".into()),
        );
        let bbox = MercatorBounds {
            min_x: 1.5,
            min_y: -2.0,
            max_x: 3.0,
            max_y: 4.25,
        };

        assert_eq!(
            url.export_url(&bbox, 2048, 1500).unwrap(),
            "https://img.example/export?bbox=1.5,-2,3,4.25&size=2048,1500&token=secret"
        );
    }

    #[test]
    fn unknown_specifier_is_an_error() {
        let url = ImageryUrl::new("https://img.example/{zoom}".into(), None);
        let bbox = MercatorBounds {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        };
        assert!(url.export_url(&bbox, 1, 1).is_err());
    }
}
