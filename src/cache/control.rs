//! Request `Cache-Control` parsing.

/// The request directives the cache honours.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::CacheControl;
///
/// let cc = CacheControl::parse("No-Cache, max-age=\"30\"");
/// assert!(cc.no_cache);
/// assert_eq!(cc.max_age, Some(30));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    /// Parses a comma-separated directive list. Unknown directives and
    /// malformed `max-age` values are ignored.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        for directive in value.split(',') {
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };
            if name.eq_ignore_ascii_case("no-cache") {
                cc.no_cache = true;
            } else if name.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            } else if name.eq_ignore_ascii_case("max-age") {
                if let Some(secs) = arg.and_then(|a| a.parse().ok()) {
                    cc.max_age = Some(secs);
                }
            }
        }
        cc
    }
}
