//! Airport data lookups.
//!
//! Airport files live in `Airports/I/C/A/` for the code `ICAO`: one folder
//! level per character except the last. The folder is scraped from the
//! server's HTML listing since there is no manifest naming the files.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;
use crate::storage::RemotePath;

/// The airport code an `OBJECT` mesh name refers to: `LSZH.btg` is `LSZH`.
pub fn airport_code(object: &str) -> Option<&str> {
    let code = object.split('.').next()?;
    if code.len() >= 2 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

/// `{airports}/L/S/Z` for `LSZH`.
pub fn airport_dir(airports: &RemotePath, code: &str) -> Result<RemotePath, Error> {
    let mut chars: Vec<char> = code.chars().collect();
    chars.pop();

    let levels = chars
        .iter()
        .map(char::to_string)
        .collect::<Vec<_>>()
        .join("/");
    airports.join(&levels)
}

fn link_pattern() -> Result<&'static Regex, Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*"([^"?#]+)"#))
        .as_ref()
        .map_err(|e| Error::malformed("airport listing", e.to_string()))
}

/// XML files in a directory listing that belong to `code`, i.e. whose name
/// up to the first `.` equals the code.
pub fn listed_files(listing: &str, code: &str) -> Result<Vec<String>, Error> {
    let pattern = link_pattern()?;

    let mut files: Vec<String> = pattern
        .captures_iter(listing)
        .filter_map(|caps| caps.get(1))
        .map(|href| href.as_str().rsplit('/').next().unwrap_or_default().to_owned())
        .filter(|name| {
            name.to_ascii_lowercase().ends_with(".xml") && name.split('.').next() == Some(code)
        })
        .collect();
    files.sort();
    files.dedup();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><table>
<tr><th><a href="?C=N;O=D">Name</a></th></tr>
<tr><td><a href="/ws2/Airports/L/S/">Parent Directory</a></td></tr>
<tr><td><a href="LSZH.groundnet.xml">LSZH.groundnet.xml</a></td><td>2024-01-01</td></tr>
<tr><td><a href="LSZH.threshold.xml">LSZH.threshold.xml</a></td></tr>
<tr><td><a HREF="LSZHX.ils.xml">LSZHX.ils.xml</a></td></tr>
<tr><td><a href="LSZB.twr.xml">LSZB.twr.xml</a></td></tr>
<tr><td><a href="LSZH.btg.gz">LSZH.btg.gz</a></td></tr>
<tr><td><a href="LSZH/">LSZH/</a></td></tr>
</table></body></html>"#;

    #[test]
    fn code_from_object_name() {
        assert_eq!(airport_code("LSZH.btg"), Some("LSZH"));
        assert_eq!(airport_code("KSFO"), Some("KSFO"));
        assert_eq!(airport_code("X.btg"), None);
        assert_eq!(airport_code("../x.btg"), None);
    }

    #[test]
    fn one_folder_per_character_but_the_last() {
        let airports = RemotePath::new("ws2/Airports").unwrap();
        assert_eq!(airport_dir(&airports, "LSZH").unwrap().as_str(), "ws2/Airports/L/S/Z");
        assert_eq!(airport_dir(&airports, "EG").unwrap().as_str(), "ws2/Airports/E");
    }

    #[test]
    fn listing_keeps_matching_xml_files() {
        assert_eq!(
            listed_files(LISTING, "LSZH").unwrap(),
            vec!["LSZH.groundnet.xml", "LSZH.threshold.xml"]
        );
        assert!(listed_files(LISTING, "EDDF").unwrap().is_empty());
    }
}
