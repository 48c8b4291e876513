use std::cmp::Reverse;
use std::str::FromStr;

use http::header::ACCEPT_ENCODING;
use http::HeaderMap;

use crate::encoding::Encoding;

/// A client's `Accept-Encoding` preferences
///
/// Elements are kept in header order. When a coding is listed more than once,
/// only its first occurrence counts. Elements with a malformed `q` parameter
/// are dropped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AcceptEncoding {
    preferences: Vec<Preference>,
}

impl AcceptEncoding {
    /// Collect preferences from all `Accept-Encoding` lines in `headers`
    ///
    /// Returns `None` if the client did not send the header at all, which is
    /// different from sending an empty header (identity only).
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let mut values = headers.get_all(ACCEPT_ENCODING).iter().peekable();
        values.peek()?;

        let mut accept = Self::default();
        for value in values {
            match value.to_str() {
                Ok(value) => accept.extend(value),
                Err(_) => continue,
            }
        }

        Some(accept)
    }

    pub fn parse(value: &str) -> Self {
        let mut accept = Self::default();
        accept.extend(value);
        accept
    }

    fn extend(&mut self, value: &str) {
        for element in value.split(',') {
            let mut parts = element.split(';');
            let token = match parts.next().map(str::trim) {
                Some(token) if !token.is_empty() => token,
                _ => continue,
            };

            let mut quality = Some(Quality::MAX);
            for param in parts {
                let Some((name, value)) = param.split_once('=') else {
                    continue;
                };

                if name.trim().eq_ignore_ascii_case("q") {
                    quality = Quality::from_str(value.trim()).ok();
                    break;
                }
            }

            let Some(quality) = quality else {
                continue;
            };

            let coding = match token {
                "*" => Coding::Any,
                name => Coding::Named(name.to_ascii_lowercase()),
            };

            if self.preferences.iter().any(|pref| pref.coding == coding) {
                continue;
            }

            self.preferences.push(Preference { coding, quality });
        }
    }

    /// Effective quality of `encoding` for this client, `None` if not acceptable
    ///
    /// An explicit mention of the coding takes precedence over the wildcard, so
    /// `gzip;q=0, *` excludes gzip. The identity coding is acceptable at the
    /// lowest quality when the client mentions neither it nor the wildcard.
    pub fn quality(&self, encoding: &Encoding) -> Option<Quality> {
        let mut wildcard = None;
        for pref in &self.preferences {
            match &pref.coding {
                Coding::Named(name) if name.eq_ignore_ascii_case(encoding.name()) => {
                    return pref.quality.acceptable();
                }
                Coding::Any => wildcard = Some(pref.quality),
                Coding::Named(_) => {}
            }
        }

        match wildcard {
            Some(quality) => quality.acceptable(),
            None if encoding.is_identity() => Some(Quality::MIN),
            None => None,
        }
    }

    /// Order the acceptable encodings from `available` by client preference
    ///
    /// Ties in client preference are broken by the server-side priority of the
    /// encoding. Unacceptable encodings are left out.
    pub fn rank<'e>(&self, available: impl IntoIterator<Item = &'e Encoding>) -> Vec<&'e Encoding> {
        let mut candidates = available
            .into_iter()
            .filter_map(|encoding| Some((self.quality(encoding)?, encoding)))
            .collect::<Vec<_>>();
        candidates.sort_by_key(|(quality, encoding)| {
            (Reverse(*quality), Reverse(encoding.priority()))
        });
        candidates.into_iter().map(|(_, encoding)| encoding).collect()
    }

    pub fn preferred<'e>(
        &self,
        available: impl IntoIterator<Item = &'e Encoding>,
    ) -> Option<&'e Encoding> {
        self.rank(available).into_iter().next()
    }

    pub fn preferences(&self) -> &[Preference] {
        &self.preferences
    }
}

/// One element of an `Accept-Encoding` header
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preference {
    pub coding: Coding,
    pub quality: Quality,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Coding {
    /// `*`, matching any coding not listed explicitly
    Any,
    /// A coding name, lowercased
    Named(String),
}

/// An HTTP quality value, stored in thousandths
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Quality(u16);

impl Quality {
    pub const ZERO: Self = Self(0);
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(1000);

    pub fn millis(self) -> u16 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    fn acceptable(self) -> Option<Self> {
        match self.is_zero() {
            true => None,
            false => Some(self),
        }
    }
}

impl FromStr for Quality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        if frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }

        let mut millis = match int {
            "0" => 0,
            "1" => 1000,
            _ => return Err(()),
        };

        let mut scale = 100;
        for digit in frac.bytes() {
            millis += u16::from(digit - b'0') * scale;
            scale /= 10;
        }

        match millis <= 1000 {
            true => Ok(Self(millis)),
            false => Err(()),
        }
    }
}
