//! Package version ordering.
//!
//! A `pkgver` is a string of the form `<name>-<version>_<revision>`. The
//! version is tokenized into alternating numeric and alphabetic runs;
//! numeric runs compare numerically, alphabetic runs lexicographically,
//! except that the pre-release suffixes (`rc`, `beta`, `alpha`, `pre`,
//! `dev`, `devel`) sort strictly below a missing suffix. The revision
//! after `_` is a secondary key; a missing revision counts as `0`.

use std::cmp::Ordering;

/// Alphabetic runs treated as strictly pre-release.
const PRE_RELEASE: &[&str] = &["alpha", "beta", "dev", "devel", "pre", "rc"];

/// One run of a tokenized version string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    /// Numeric run, compared by value.
    Num(u64),
    /// Alphabetic run, compared lexicographically.
    Alpha(&'a str),
}

impl Token<'_> {
    /// Comparison tier: pre-release < missing < alphabetic < numeric.
    ///
    /// The "missing" tier (1) is reserved for the shorter string running
    /// out of tokens, so that `1.0rc1 < 1.0 < 1.0a < 1.0.1` holds.
    fn tier(&self) -> u8 {
        match self {
            Token::Alpha(s) if PRE_RELEASE.contains(s) => 0,
            Token::Alpha(_) => 2,
            Token::Num(_) => 3,
        }
    }
}

/// Tier of an exhausted token stream.
const TIER_MISSING: u8 = 1;

fn tokenize(version: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = version.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            // Leading zeros are insignificant; saturate on overflow so
            // absurdly long digit runs still order consistently.
            let value = version[start..i].parse::<u64>().unwrap_or(u64::MAX);
            tokens.push(Token::Num(value));
        } else if b.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            tokens.push(Token::Alpha(&version[start..i]));
        } else {
            // Separators ('.', '+', ...) only delimit runs.
            i += 1;
        }
    }
    tokens
}

fn compare_tokenized(a: &str, b: &str) -> Ordering {
    let ta = tokenize(a);
    let tb = tokenize(b);
    let mut ia = ta.iter();
    let mut ib = tb.iter();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (Some(x), Some(y)) => {
                let ord = match x.tier().cmp(&y.tier()) {
                    Ordering::Equal => match (x, y) {
                        (Token::Num(n), Token::Num(m)) => n.cmp(m),
                        (Token::Alpha(s), Token::Alpha(t)) => s.cmp(t),
                        _ => unreachable!("equal tiers imply equal token kinds"),
                    },
                    unequal => unequal,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), None) => return x.tier().cmp(&TIER_MISSING),
            (None, Some(y)) => return TIER_MISSING.cmp(&y.tier()),
        }
    }
}

/// Split a `version_revision` string into its version and revision parts.
fn split_revision(version: &str) -> (&str, u64) {
    match version.rsplit_once('_') {
        Some((ver, rev)) => match rev.parse::<u64>() {
            Ok(n) => (ver, n),
            // Not a numeric revision; treat the underscore as part of
            // the version itself.
            Err(_) => (version, 0),
        },
        None => (version, 0),
    }
}

/// Compare two bare `version_revision` strings.
///
/// The version part dominates; the revision is only consulted on equal
/// versions, so `1.0.1 > 1.0_1` but `1.0_1 < 1.0_2`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (va, ra) = split_revision(a);
    let (vb, rb) = split_revision(b);
    compare_tokenized(va, vb).then_with(|| ra.cmp(&rb))
}

/// Compare two full `pkgver` strings by their version and revision parts.
///
/// The package names are not compared; callers are expected to compare
/// builds of the same package. A string without a `-version` suffix is
/// compared as an empty version, which equals only another empty version.
pub fn compare_pkgver(a: &str, b: &str) -> Ordering {
    compare_versions(pkg_version(a).unwrap_or(""), pkg_version(b).unwrap_or(""))
}

/// Extract the package name from a `pkgver` (everything before the final
/// `-version_revision` segment). Returns `None` if there is no version
/// separator or either side is empty.
pub fn pkg_name(pkgver: &str) -> Option<&str> {
    let (name, version) = pkgver.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some(name)
}

/// Extract the `version_revision` part of a `pkgver`.
pub fn pkg_version(pkgver: &str) -> Option<&str> {
    let (name, version) = pkgver.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some(version)
}

/// Extract the numeric revision of a `pkgver`; a missing revision is `0`.
pub fn pkg_revision(pkgver: &str) -> u64 {
    pkg_version(pkgver).map_or(0, |v| split_revision(v).1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmp(a: &str, b: &str) -> Ordering {
        compare_pkgver(a, b)
    }

    #[test]
    fn equal_versions() {
        assert_eq!(cmp("foo-1.0", "foo-1.0"), Ordering::Equal);
        assert_eq!(cmp("foo-blah-100dpi-21", "foo-blah-100dpi-21_0"), Ordering::Equal);
    }

    #[test]
    fn revision_is_secondary() {
        assert_eq!(cmp("foo-1.0", "foo-1.0_1"), Ordering::Less);
        assert_eq!(cmp("foo-1.0_1", "foo-1.0"), Ordering::Greater);
        assert_eq!(cmp("foo-129", "foo-129_1"), Ordering::Less);
        assert_eq!(cmp("foo-1.0.1", "foo-1.0_1"), Ordering::Greater);
        assert_eq!(compare_versions("1.0_1", "1.0_2"), Ordering::Less);
    }

    #[test]
    fn pre_release_sorts_below_release() {
        assert_eq!(cmp("foo-2.0rc2", "foo-2.0rc3"), Ordering::Less);
        assert_eq!(cmp("foo-2.0rc3", "foo-2.0rc2"), Ordering::Greater);
        assert_eq!(cmp("X-1.0rc2", "X-1.0"), Ordering::Less);
        assert_eq!(cmp("X-1.0beta1", "X-1.0"), Ordering::Less);
        assert_eq!(cmp("X-1.0alpha2", "X-1.0beta1"), Ordering::Less);
        assert_eq!(cmp("X-1.0pre3", "X-1.0"), Ordering::Less);
    }

    #[test]
    fn numeric_runs_compare_by_value() {
        assert_eq!(cmp("foo-blah-100dpi-21", "foo-blah-100dpi-2.1"), Ordering::Greater);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn trailing_alpha_sorts_above_release() {
        assert_eq!(compare_versions("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0a", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn name_splitting() {
        assert_eq!(pkg_name("foo-1.0_1"), Some("foo"));
        assert_eq!(pkg_name("foo-blah-100dpi-21"), Some("foo-blah-100dpi"));
        assert_eq!(pkg_version("foo-blah-100dpi-21"), Some("21"));
        assert_eq!(pkg_revision("foo-1.0_3"), 3);
        assert_eq!(pkg_revision("foo-1.0"), 0);
        assert_eq!(pkg_name("foo"), None);
        assert_eq!(pkg_name("-1.0"), None);
    }

    #[test]
    fn empty_version_equals_only_itself() {
        assert_eq!(compare_versions("", ""), Ordering::Equal);
        assert_eq!(compare_versions("", "0"), Ordering::Less);
    }

    proptest! {
        #[test]
        fn reflexive(v in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}(rc[0-9]{1,2}|beta[0-9]{1,2})?(_[0-9]{1,2})?") {
            prop_assert_eq!(compare_versions(&v, &v), Ordering::Equal);
        }

        #[test]
        fn antisymmetric(
            a in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}(rc[0-9]{1,2})?(_[0-9]{1,2})?",
            b in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}(rc[0-9]{1,2})?(_[0-9]{1,2})?",
        ) {
            prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
        }

        #[test]
        fn transitive(
            a in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(_[0-9])?",
            b in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(_[0-9])?",
            c in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(_[0-9])?",
        ) {
            let mut v = [a, b, c];
            v.sort_by(|x, y| compare_versions(x, y));
            prop_assert_ne!(compare_versions(&v[0], &v[1]), Ordering::Greater);
            prop_assert_ne!(compare_versions(&v[1], &v[2]), Ordering::Greater);
            prop_assert_ne!(compare_versions(&v[0], &v[2]), Ordering::Greater);
        }
    }
}
