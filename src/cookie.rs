//! Netscape `cookies.txt` cookie format (§3 `cookie`): a tab-separated
//! 7-field line, `domain\tinclude_subdomains\tpath\tsecure\texpires\tname\tvalue`.
//!
//! **Open Question resolution (distilled spec §OQ1).** The original
//! `asyncpp::curl::cookie`'s relational operators (`<`, `<=`, `>`, `>=`)
//! all compare `rhs` against itself — `std::tie(rhs...) < std::tie(rhs...)`
//! — which is always `false` regardless of `lhs`, so cookie ordering in the
//! original is silently broken. This implementation derives `Ord` field by
//! field over `(domain, include_subdomains, path, secure, expires, name,
//! value)`, comparing `lhs` to `rhs` as the field order's name implies.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A single cookie, as stored in a Netscape-format cookie jar file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cookie {
    domain: String,
    include_subdomains: bool,
    path: String,
    secure: bool,
    /// Seconds since the Unix epoch, matching the text format's field
    /// directly (a Netscape cookie file stores `time_t`, not sub-second
    /// precision).
    expires: i64,
    name: String,
    value: String,
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| " \t\n\x0b\x0c\r".contains(c))
}

fn pull_part<'a>(s: &mut &'a str) -> Result<&'a str> {
    let pos = s.find('\t').ok_or_else(Error::invalid_argument)?;
    let (part, rest) = s.split_at(pos);
    *s = &rest[1..];
    Ok(part)
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Cookie {
        Cookie {
            domain: String::new(),
            include_subdomains: false,
            path: String::new(),
            secure: false,
            expires: 0,
            name: name.into(),
            value: value.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_attributes(
        domain: impl Into<String>,
        include_subdomains: bool,
        path: impl Into<String>,
        secure: bool,
        expires: i64,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Cookie {
        Cookie {
            domain: domain.into(),
            include_subdomains,
            path: path.into(),
            secure,
            expires,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse one Netscape cookie-file line:
    /// `domain\tinclude_subdomains\tpath\tsecure\texpires\tname\tvalue`.
    pub fn parse(line: &str) -> Result<Cookie> {
        let mut rest = line;
        let domain = trim(pull_part(&mut rest)?).to_string();
        let include_subdomains = trim(pull_part(&mut rest)?).eq_ignore_ascii_case("true");
        let path = trim(pull_part(&mut rest)?).to_string();
        let secure = trim(pull_part(&mut rest)?).eq_ignore_ascii_case("true");
        let expires: i64 = trim(pull_part(&mut rest)?)
            .parse()
            .map_err(|_| Error::invalid_argument())?;
        let name = trim(pull_part(&mut rest)?).to_string();
        let value = trim(rest).to_string();
        Ok(Cookie {
            domain,
            include_subdomains,
            path,
            secure,
            expires,
            name,
            value,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn expires(&self) -> i64 {
        self.expires
    }

    pub fn set_expires(&mut self, expires: i64) {
        self.expires = expires;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn include_subdomains(&self) -> bool {
        self.include_subdomains
    }

    pub fn set_include_subdomains(&mut self, val: bool) {
        self.include_subdomains = val;
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, val: bool) {
        self.secure = val;
    }

    pub fn is_valid(&self) -> bool {
        !self.domain.is_empty() && !self.path.is_empty() && !self.name.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.expires <= now
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            if self.include_subdomains { "TRUE" } else { "FALSE" },
            self.path,
            if self.secure { "TRUE" } else { "FALSE" },
            self.expires,
            self.name,
            self.value,
        )
    }
}

impl std::str::FromStr for Cookie {
    type Err = Error;

    fn from_str(s: &str) -> Result<Cookie> {
        Cookie::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_parse() {
        let cookie = Cookie::with_attributes("example.com", true, "/", true, 1_700_000_000, "session", "abc123");
        let line = cookie.to_string();
        assert_eq!(line, "example.com\tTRUE\t/\tTRUE\t1700000000\tsession\tabc123");
        let parsed = Cookie::parse(&line).unwrap();
        assert_eq!(parsed, cookie);
    }

    #[test]
    fn parse_trims_whitespace_around_fields() {
        let parsed = Cookie::parse(" example.com \t FALSE \t /a \t FALSE \t 5 \t k \t v ").unwrap();
        assert_eq!(parsed.domain(), "example.com");
        assert_eq!(parsed.path(), "/a");
        assert_eq!(parsed.name(), "k");
        assert_eq!(parsed.value(), "v ".trim_end());
    }

    #[test]
    fn missing_field_is_an_error() {
        assert!(Cookie::parse("only\tfour\tfields\tnope").is_err());
    }

    #[test]
    fn ordering_compares_lhs_against_rhs_correctly() {
        // The original's `operator<` always compared `rhs` to itself; here
        // `a` must order strictly before `b` by domain.
        let a = Cookie::with_attributes("a.example.com", false, "/", false, 0, "n", "v");
        let b = Cookie::with_attributes("b.example.com", false, "/", false, 0, "n", "v");
        assert!(a < b);
        assert!(b > a);
        assert!(!(b < a));
    }

    #[test]
    fn is_expired_reflects_unix_time() {
        let expired = Cookie::with_attributes("d", false, "/", false, 1, "n", "v");
        assert!(expired.is_expired());
        let far_future = Cookie::with_attributes("d", false, "/", false, 4_000_000_000, "n", "v");
        assert!(!far_future.is_expired());
    }
}
