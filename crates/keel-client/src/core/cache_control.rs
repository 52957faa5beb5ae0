/// The `Cache-Control` directives the response cache honours.
///
/// Entries are only served without revalidation, so both `no-store` and
/// `no-cache` keep a response out of the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
}

impl CacheControl {
    pub fn parse(header: &str) -> Self {
        let mut control = Self::default();

        for directive in header.split(',') {
            // `no-cache="Set-Cookie"` limits the directive to fields; treat it as bare.
            let name = directive.split('=').next().unwrap_or_default().trim();
            if name.eq_ignore_ascii_case("no-cache") {
                control.no_cache = true;
            } else if name.eq_ignore_ascii_case("no-store") {
                control.no_store = true;
            }
        }

        control
    }

    /// Whether the response may be kept at all.
    pub fn is_storable(&self) -> bool {
        !self.no_store && !self.no_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_control_parsing() {
        let control = CacheControl::parse("max-age=3600, public");
        assert_eq!(control, CacheControl::default());
        assert!(control.is_storable());

        let control = CacheControl::parse("no-cache, must-revalidate");
        assert!(control.no_cache);
        assert!(!control.no_store);
    }

    #[test]
    fn no_store_is_not_storable() {
        assert!(!CacheControl::parse("No-Store").is_storable());
        assert!(CacheControl::parse("private, max-age=0").is_storable());
    }

    #[test]
    fn no_cache_is_not_storable() {
        assert!(!CacheControl::parse("NO-CACHE").is_storable());
        assert!(!CacheControl::parse("max-age=60, no-cache=\"Set-Cookie\"").is_storable());
    }

    #[test]
    fn garbage_is_ignored() {
        let control = CacheControl::parse("max-age=soon, , weird");
        assert_eq!(control, CacheControl::default());
    }
}
