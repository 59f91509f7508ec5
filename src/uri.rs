//! A URI type (§3 `uri`), a thin wrapper over the `url` crate rather than a
//! hand-rolled parser — `url` is already an RFC 3986 implementation, and the
//! original's hand-rolled parser exists only because C++ had nothing
//! equivalent in its standard library.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::{Error, Result};

/// Characters the original's `uri::encode` escapes beyond the URL crate's
/// own default component set; kept narrow (just the reserved delimiters a
/// form field might legitimately need unescaped are left alone by `url`'s
/// `NON_ALPHANUMERIC` set, which we don't use to avoid over-escaping `-._~`).
const ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A parsed URI: scheme, authority, host, port, path, query and fragment
/// (§3). Two `Uri`s compare and order component-wise, matching the
/// original's `std::tie`-based comparisons (`lhs` always compared to `rhs`,
/// never to itself).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Uri {
    scheme: String,
    auth: String,
    host: String,
    /// `-1` (`None`) means "use the scheme's default port".
    port: Option<u16>,
    path: String,
    query: String,
    fragment: String,
}

impl Uri {
    pub fn parse(s: &str) -> Result<Uri> {
        let url = Url::parse(s).map_err(|e| Error::transport(e))?;
        Ok(Uri::from_url(&url))
    }

    fn from_url(url: &Url) -> Uri {
        let auth = if url.username().is_empty() && url.password().is_none() {
            String::new()
        } else {
            match url.password() {
                Some(pw) => format!("{}:{}", url.username(), pw),
                None => url.username().to_string(),
            }
        };
        Uri {
            scheme: url.scheme().to_string(),
            auth,
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
            path: url.path().to_string(),
            query: url.query().unwrap_or_default().to_string(),
            fragment: url.fragment().unwrap_or_default().to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    pub fn auth(&self) -> &str {
        &self.auth
    }

    pub fn set_auth(&mut self, auth: impl Into<String>) {
        self.auth = auth.into();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// `-1` in the original maps to `None` here.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_port(&mut self, port: Option<u16>) {
        self.port = port;
    }

    pub fn is_port_default(&self) -> bool {
        self.port.is_none()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn set_fragment(&mut self, fragment: impl Into<String>) {
        self.fragment = fragment.into();
    }

    /// Parses [`Uri::query`] as `application/x-www-form-urlencoded` data
    /// into an ordered multimap (duplicate keys keep every occurrence, in
    /// document order — matching `unordered_multimap`'s bag-of-pairs
    /// semantics without pretending Rust has that exact container).
    pub fn query_parsed(&self) -> Vec<(String, String)> {
        Uri::parse_formdata(&self.query)
    }

    pub fn parse_formdata(data: &str) -> Vec<(String, String)> {
        url::form_urlencoded::parse(data.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty()
            && self.auth.is_empty()
            && self.host.is_empty()
            && self.port.is_none()
            && self.path.is_empty()
            && self.query.is_empty()
            && self.fragment.is_empty()
    }

    pub fn is_relative(&self) -> bool {
        self.host.is_empty()
    }

    pub fn is_authority(&self) -> bool {
        self.path.is_empty() && self.query.is_empty() && self.fragment.is_empty()
    }

    /// The path, plus `?query` if non-empty — what actually goes on an HTTP
    /// request line.
    pub fn path_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    pub fn encode(s: &str) -> String {
        utf8_percent_encode(s, ENCODE_SET).to_string()
    }

    pub fn decode(s: &str) -> String {
        percent_decode_str(s).decode_utf8_lossy().into_owned()
    }

    /// Splits a path on `/`, dropping empty segments — mirrors the
    /// original's `split_path` used when resolving relative references.
    pub fn split_path(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Rejoins path segments into an absolute path, each one followed by a
    /// trailing slash, symmetric to [`Uri::split_path`].
    pub fn merge_path<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
        let mut result = String::from("/");
        for segment in segments {
            result.push_str(segment);
            result.push('/');
        }
        result
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}:", self.scheme)?;
        }
        if !self.host.is_empty() {
            f.write_str("//")?;
            if !self.auth.is_empty() {
                write!(f, "{}@", self.auth)?;
            }
            f.write_str(&self.host)?;
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
        }
        f.write_str(&self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Uri> {
        Uri::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_through_display() {
        let uri = Uri::parse("https://example.com:8443/a/b?x=1&y=2#frag").unwrap();
        assert_eq!(uri.scheme(), "https");
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.port(), Some(8443));
        assert_eq!(uri.path(), "/a/b");
        assert_eq!(uri.query(), "x=1&y=2");
        assert_eq!(uri.fragment(), "frag");
        assert_eq!(uri.to_string(), "https://example.com:8443/a/b?x=1&y=2#frag");
    }

    #[test]
    fn default_port_is_none() {
        let uri = Uri::parse("https://example.com/").unwrap();
        assert!(uri.is_port_default());
        assert_eq!(uri.port(), None);
    }

    #[test]
    fn query_parsed_keeps_duplicate_keys() {
        let uri = Uri::parse("http://h/?a=1&a=2&b=3").unwrap();
        let pairs = uri.query_parsed();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn encode_decode_roundtrip() {
        let raw = "a b/c?d";
        let encoded = Uri::encode(raw);
        assert_eq!(Uri::decode(&encoded), raw);
    }

    #[test]
    fn ordering_compares_lhs_against_rhs_not_itself() {
        let a = Uri::parse("http://a/").unwrap();
        let b = Uri::parse("http://b/").unwrap();
        assert!(a < b);
        assert!(b > a);
        assert!(a <= a.clone());
        assert!(a >= a.clone());
    }
}
