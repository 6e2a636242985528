//! Request path and resize option parsing.
//!
//! Paths look like `/<options>/<scheme>:/<host>/<path...>`. Some clients and
//! reverse proxies collapse `//`, so the scheme separator arrives as `:/`.

use std::fmt;
use tracing::debug;
use url::Url;

/// A request path split into its option segment and target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPath {
    pub options: String,
    pub target: String,
}

impl ProxyPath {
    /// Splits on the first `/` after the leading one and restores `http://`
    /// or `https://` on the remainder. Returns `None` when there is no target.
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (options, target) = trimmed.split_once('/')?;
        if target.is_empty() {
            return None;
        }

        Some(Self {
            options: options.to_string(),
            target: restore_scheme(target),
        })
    }

    /// The target as an absolute http(s) URL. `query` is the raw request
    /// query string, which belongs to the target.
    pub fn target_url(&self, query: Option<&str>) -> Option<Url> {
        let mut url = Url::parse(&self.target).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }
        Some(url)
    }
}

fn restore_scheme(target: &str) -> String {
    for scheme in ["http:/", "https:/"] {
        if let Some(rest) = target.strip_prefix(scheme) {
            if !rest.starts_with('/') {
                return format!("{scheme}/{rest}");
            }
        }
    }
    target.to_string()
}

/// Size options from the first path segment.
///
/// Comma separated. A size is `WxH`, `Wx`, `xH` or a single number for a
/// square; zero or missing means "keep proportional". `fit` scales to fit
/// inside the box instead of cropping to fill it. Unknown options are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,
    pub fit: bool,
}

impl ResizeOptions {
    pub fn parse(raw: &str) -> Self {
        let mut options = Self::default();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("fit") {
                options.fit = true;
            } else if let Some((width, height)) = parse_size(token) {
                options.width = width;
                options.height = height;
            } else {
                debug!("Ignoring unknown image option '{}'", token);
            }
        }
        options
    }

    /// No resize requested; the source is served as fetched.
    pub fn is_noop(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

fn parse_size(token: &str) -> Option<(u32, u32)> {
    match token.split_once(['x', 'X']) {
        Some((w, h)) => Some((parse_dimension(w)?, parse_dimension(h)?)),
        None => {
            let side = token.parse().ok()?;
            Some((side, side))
        }
    }
}

fn parse_dimension(value: &str) -> Option<u32> {
    if value.is_empty() {
        Some(0)
    } else {
        value.parse().ok()
    }
}

/// Canonical form, used in transformed-image cache keys.
impl fmt::Display for ResizeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if self.fit {
            f.write_str(",fit")?;
        }
        Ok(())
    }
}
