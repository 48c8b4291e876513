use std::borrow::Cow;

use tracing::debug;

/// A content coding for which precompressed siblings may exist on disk
///
/// The `suffix` is appended to the path of the original resource to find the
/// precompressed variant, so `style.css` is served from `style.css.br` when the
/// brotli variant is selected. The `priority` only matters when the client
/// expresses equal preference for two encodings: the higher priority wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Encoding {
    name: Cow<'static, str>,
    suffix: Cow<'static, str>,
    priority: i32,
}

impl Encoding {
    pub const BROTLI: Self = Self::from_static("br", ".br", 2);
    pub const GZIP: Self = Self::from_static("gzip", ".gz", 1);
    pub const ZSTD: Self = Self::from_static("zstd", ".zst", 3);
    /// The no-op coding, served straight from the original path
    pub const IDENTITY: Self = Self::from_static("identity", "", 0);

    pub fn new(
        name: impl Into<Cow<'static, str>>,
        suffix: impl Into<Cow<'static, str>>,
        priority: i32,
    ) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
            priority,
        }
    }

    const fn from_static(name: &'static str, suffix: &'static str, priority: i32) -> Self {
        Self {
            name: Cow::Borrowed(name),
            suffix: Cow::Borrowed(suffix),
            priority,
        }
    }

    /// Path of the variant of `base` stored in this encoding
    pub fn sibling(&self, base: &str) -> String {
        let mut path = String::with_capacity(base.len() + self.suffix.len());
        path.push_str(base);
        path.push_str(&self.suffix);
        path
    }

    pub fn is_identity(&self) -> bool {
        self.suffix.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// The fixed set of encodings a `FileServer` knows about
///
/// The table is built once and never changes afterwards. It always contains
/// an identity entry and iterates in descending priority order, which is also
/// the order in which precompressed siblings are probed.
#[derive(Clone, Debug)]
pub struct Encodings {
    list: Vec<Encoding>,
}

impl Encodings {
    /// Build the table from `encodings`
    ///
    /// Descriptors that disagree with themselves about being the identity
    /// coding (named `identity` with a suffix, or any other name without one)
    /// are left out.
    pub fn new(encodings: impl IntoIterator<Item = Encoding>) -> Self {
        let mut list = Vec::<Encoding>::new();
        for encoding in encodings {
            // Only `identity` may be served from the original path
            let named_identity = encoding.name.eq_ignore_ascii_case(Encoding::IDENTITY.name());
            if named_identity != encoding.is_identity() {
                debug!(name = %encoding.name, suffix = %encoding.suffix, "ignoring encoding");
                continue;
            }

            // Names are matched case-insensitively, the first entry for a name wins
            if list
                .iter()
                .any(|known| known.name.eq_ignore_ascii_case(&encoding.name))
            {
                continue;
            }

            list.push(encoding);
        }

        if !list.iter().any(|known| known.is_identity()) {
            list.push(Encoding::IDENTITY);
        }

        list.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { list }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Encoding> {
        self.list.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Encoding> {
        self.list
            .iter()
            .find(|encoding| encoding.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Default for Encodings {
    fn default() -> Self {
        Self::new([Encoding::BROTLI, Encoding::GZIP, Encoding::IDENTITY])
    }
}
