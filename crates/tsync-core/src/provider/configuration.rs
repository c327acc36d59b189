//! Provider configuration record
//!
//! Per-root key/value settings of a bound provider, stored as
//!
//! ```text
//! [version: u8][key=value lines]
//! ```
//!
//! Keys and values are trimmed of spaces and tabs when reading, so values
//! escape `\` as `\\`, line breaks as `\n` and `\r`, tabs as `\t`, and
//! leading or trailing spaces as `\s`. Blank lines and lines starting with
//! `#` are ignored.

use std::collections::BTreeMap;

use tracing::warn;

use crate::codec::{CodecError, RecordReader, RecordWriter};
use crate::error::{TargetError, TargetResult};

/// Version byte of the configuration record
pub const CONFIGURATION_VERSION: u8 = 1;

/// Site type key
pub const KEY_TYPE: &str = "type";
/// Site URL key
pub const KEY_URL: &str = "url";

/// Key/value configuration of one provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetConfiguration {
    entries: BTreeMap<String, String>,
}

const PADDING: [char; 2] = [' ', '\t'];

fn check_key(key: &str) -> TargetResult<()> {
    if key.is_empty()
        || key.contains(['=', '\n', '\r'])
        || key.starts_with('#')
        || key.trim_matches(PADDING) != key
    {
        return Err(TargetError::InvalidConfiguration {
            details: format!("invalid configuration key '{}'", key),
        });
    }
    Ok(())
}

fn escape(value: &str) -> String {
    let lead = value.len() - value.trim_start_matches(' ').len();
    let trail = value.trim_end_matches(' ').len();
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.char_indices() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if i < lead || i >= trail => out.push_str("\\s"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('s') => out.push(' '),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

impl TargetConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a site of `kind` at `url`
    pub fn for_site(kind: &str, url: &str) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(KEY_TYPE.to_string(), kind.to_string());
        entries.insert(KEY_URL.to_string(), url.to_string());
        Self { entries }
    }

    /// Parse `key=value` option strings
    pub fn from_pairs<I, S>(pairs: I) -> TargetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) =
                pair.split_once('=')
                    .ok_or_else(|| TargetError::InvalidConfiguration {
                        details: format!("expected key=value, got '{}'", pair),
                    })?;
            config.set(key.trim(), value)?;
        }
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> TargetResult<()> {
        check_key(key)?;
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Add every entry of `other`, overwriting existing keys
    pub fn merge(&mut self, other: &TargetConfiguration) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn required(&self, key: &str) -> TargetResult<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TargetError::RequiredConfigurationMissing {
                key: key.to_string(),
            })
    }

    pub fn kind(&self) -> TargetResult<&str> {
        self.required(KEY_TYPE)
    }

    pub fn url(&self) -> TargetResult<&str> {
        self.required(KEY_URL)
    }

    /// Check required keys and the shape of the URL
    pub fn validate(&self) -> TargetResult<()> {
        self.kind()?;
        let url = self.url()?;
        match url.split_once("://") {
            Some((scheme, _))
                if !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) =>
            {
                Ok(())
            }
            _ => Err(TargetError::InvalidConfiguration {
                details: format!("'{}' is not a valid site URL", url),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut text = String::new();
        for (key, value) in &self.entries {
            text.push_str(key);
            text.push('=');
            text.push_str(&escape(value));
            text.push('\n');
        }
        let mut writer = RecordWriter::new();
        writer.put_u8(CONFIGURATION_VERSION).put_bytes(text.as_bytes());
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(bytes);
        let version = reader.u8()?;
        if version != CONFIGURATION_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version.into(),
                expected: CONFIGURATION_VERSION.into(),
            });
        }
        let text = std::str::from_utf8(reader.rest()).map_err(|_| CodecError::InvalidUtf8)?;

        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let line = line.trim_matches(PADDING);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| CodecError::Malformed(format!("no '=' in line '{}'", line)))?;
            entries.insert(
                key.trim_matches(PADDING).to_string(),
                unescape(value.trim_matches(PADDING)),
            );
        }
        Ok(Self { entries })
    }

    /// Decode a stored record, treating anything unreadable as absent
    pub fn from_record(bytes: Option<&[u8]>) -> Option<Self> {
        let bytes = bytes?;
        match Self::decode(bytes) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable provider configuration");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_record_round_trip_with_escapes() {
        let mut config = TargetConfiguration::for_site("file", "file:///srv/share");
        config.set("note", "line one\nline two \\ done").unwrap();
        config.set("password", "abc\r").unwrap();
        config.set("padded", "  two spaces, tab\t ").unwrap();
        config.set("blank", "   ").unwrap();

        let bytes = config.encode();
        assert_eq!(bytes[0], CONFIGURATION_VERSION);
        assert_eq!(TargetConfiguration::decode(&bytes).unwrap(), config);
    }

    #[test]
    fn test_padded_keys_rejected() {
        let mut config = TargetConfiguration::new();
        for key in [" padded", "padded ", "\tkey", ""] {
            assert_eq!(
                config.set(key, "x").unwrap_err().kind(),
                ErrorKind::InvalidConfiguration
            );
        }
        config.set("inner space", "x").unwrap();
        assert_eq!(
            TargetConfiguration::decode(&config.encode()).unwrap(),
            config
        );
    }

    #[test]
    fn test_decode_ignores_comments_and_blanks() {
        let mut bytes = vec![CONFIGURATION_VERSION];
        bytes.extend_from_slice(b"# written by hand\n\ntype=memory\r\nurl = memory://x\n");

        let config = TargetConfiguration::decode(&bytes).unwrap();
        assert_eq!(config.kind().unwrap(), "memory");
        assert_eq!(config.url().unwrap(), "memory://x");
        config.validate().unwrap();
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn test_unreadable_record_is_absent() {
        assert!(TargetConfiguration::from_record(None).is_none());
        assert!(TargetConfiguration::from_record(Some(&[])).is_none());
        assert!(TargetConfiguration::from_record(Some(&[9, b'a', b'=', b'b'])).is_none());
        assert!(TargetConfiguration::from_record(Some(&[1, b'n', b'o'])).is_none());
        assert!(TargetConfiguration::from_record(Some(&[1, 0xff, b'='])).is_none());
    }

    #[test]
    fn test_validate() {
        let config = TargetConfiguration::new();
        assert_eq!(
            config.validate().unwrap_err().kind(),
            ErrorKind::RequiredConfigurationMissing
        );

        let mut config = TargetConfiguration::new();
        config.set(KEY_TYPE, "file").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            TargetError::RequiredConfigurationMissing { ref key } if key == "url"
        ));

        config.set(KEY_URL, "not a url").unwrap();
        assert_eq!(
            config.validate().unwrap_err().kind(),
            ErrorKind::InvalidConfiguration
        );

        config.set(KEY_URL, "file:///srv").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_from_pairs() {
        let config = TargetConfiguration::from_pairs(["type=file", "url=file:///a?b=c"]).unwrap();
        assert_eq!(config.url().unwrap(), "file:///a?b=c");

        let err = TargetConfiguration::from_pairs(["novalue"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        let err = TargetConfiguration::from_pairs(["=x"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
