//! Route pattern compilation and matching.
//!
//! ```text
//! route-pattern    = *( "/" segment ) [ "/" ]
//! segment          = literal-segment / param-segment
//! literal-segment  = 1*( unreserved-char )      ; printable except "/"
//! param-segment    = prefix name [constraint] [modifier]
//! prefix           = ":" / "*"
//! name             = ( ALPHA / "_" ) *( ALPHA / DIGIT / "_" ) / quoted-string
//! constraint       = "(" 1*( %x20-7E except ")" ) ")"
//! modifier         = "?" / "*" / "+"
//! ```
//!
//! A segment may carry a literal prefix before its parameter
//! (`/a:id`). Optional groups `{...}` expand into the cartesian
//! product of variants; each variant compiles to its own candidate and
//! candidates are tried in declaration order, group-present first.
//! Constraints compile to anchored regexes the captured text must
//! match. Repetition (`+`, `*`) and wildcards capture greedily,
//! leaving just enough path segments for the remainder of the pattern.

use regex::Regex;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    None,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone)]
struct Param {
    name: String,
    /// `*name` captures the remaining path segments.
    wildcard: bool,
    constraint: Option<Regex>,
    modifier: Modifier,
}

#[derive(Debug, Clone)]
struct Segment {
    literal: String,
    param: Option<Param>,
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    slash: bool,
    candidates: Vec<Vec<Segment>>,
}

/// Outcome of a successful match.
#[derive(Debug, Default)]
pub struct PatternMatch {
    /// Characters moved from `path` into `base_path`.
    pub consumed: usize,
    pub captures: Vec<(String, String)>,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Result<Self, Error> {
        if pattern.is_empty() {
            return Err(Error::BadPattern("empty pattern".to_owned()));
        }
        let variants = expand_groups(pattern)?;
        let mut candidates = Vec::with_capacity(variants.len());
        for v in &variants {
            candidates.push(parse_variant(v)?);
        }
        Ok(Self {
            raw: pattern.to_owned(),
            slash: pattern == "/",
            candidates,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `path` (decoded, beginning with `/`). With `end` the whole
    /// path must be consumed; otherwise a prefix suffices.
    pub fn matches(&self, path: &str, end: bool) -> Option<PatternMatch> {
        debug_assert!(path.starts_with('/'));
        if self.slash {
            if !end || path == "/" {
                return Some(PatternMatch::default());
            }
            return None;
        }
        let mut segs: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path[1..].split('/').collect()
        };
        if segs.last() == Some(&"") {
            segs.pop(); // trailing slash stays in the remainder
        }
        for cand in &self.candidates {
            if let Some((taken, captures)) = match_candidate(cand, &segs, end) {
                let consumed = segs[..taken].iter().map(|s| 1 + s.len()).sum();
                return Some(PatternMatch { consumed, captures });
            }
        }
        None
    }
}

/// Expand `{...}` groups into all present/absent variants.
fn expand_groups(pattern: &str) -> Result<Vec<String>, Error> {
    let mut variants = vec![String::new()];
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| Error::BadPattern("unclosed group".to_owned()))?;
        let inner = &rest[open + 1..close];
        if inner.contains('{') {
            return Err(Error::BadPattern("nested group".to_owned()));
        }
        let head = &rest[..open];
        let mut next = Vec::with_capacity(variants.len() * 2);
        for v in &variants {
            next.push(format!("{v}{head}{inner}"));
            next.push(format!("{v}{head}"));
        }
        variants = next;
        rest = &rest[close + 1..];
    }
    if rest.contains('}') {
        return Err(Error::BadPattern("unmatched group close".to_owned()));
    }
    for v in &mut variants {
        v.push_str(rest);
        if v.is_empty() {
            v.push('/');
        }
    }
    Ok(variants)
}

fn parse_variant(variant: &str) -> Result<Vec<Segment>, Error> {
    if !variant.starts_with('/') {
        return Err(Error::BadPattern("pattern must begin with '/'".to_owned()));
    }
    if variant == "/" {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let parts: Vec<&str> = variant[1..].split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            if i + 1 == parts.len() {
                break; // trailing slash
            }
            return Err(Error::BadPattern("empty segment".to_owned()));
        }
        segments.push(parse_segment(part)?);
    }
    Ok(segments)
}

fn parse_segment(text: &str) -> Result<Segment, Error> {
    let param_at = text.find([':', '*']);
    let (literal, rest) = match param_at {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };
    for b in literal.bytes() {
        if !(0x21..=0x7e).contains(&b) {
            return Err(Error::BadPattern(format!("bad literal in {text:?}")));
        }
    }
    if rest.is_empty() {
        return Ok(Segment {
            literal: literal.to_owned(),
            param: None,
        });
    }

    let wildcard = rest.starts_with('*');
    let mut cur = &rest[1..];

    // name: quoted or identifier
    let name = if let Some(stripped) = cur.strip_prefix('"') {
        let close = stripped
            .find('"')
            .ok_or_else(|| Error::BadPattern(format!("unterminated name in {text:?}")))?;
        if close == 0 {
            return Err(Error::BadPattern(format!("empty name in {text:?}")));
        }
        let name = &stripped[..close];
        cur = &stripped[close + 1..];
        name.to_owned()
    } else {
        let first = cur
            .chars()
            .next()
            .filter(|c| c.is_ascii_alphabetic() || *c == '_')
            .ok_or_else(|| Error::BadPattern(format!("bad parameter name in {text:?}")))?;
        let mut len = first.len_utf8();
        for c in cur[len..].chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                len += c.len_utf8();
            } else {
                break;
            }
        }
        let name = cur[..len].to_owned();
        cur = &cur[len..];
        name
    };

    // constraint
    let constraint = if let Some(stripped) = cur.strip_prefix('(') {
        let close = stripped
            .find(')')
            .ok_or_else(|| Error::BadPattern(format!("unclosed constraint in {text:?}")))?;
        if close == 0 {
            return Err(Error::BadPattern(format!("empty constraint in {text:?}")));
        }
        let expr = &stripped[..close];
        cur = &stripped[close + 1..];
        let re = Regex::new(&format!("^(?:{expr})$"))
            .map_err(|e| Error::BadPattern(format!("bad constraint in {text:?}: {e}")))?;
        Some(re)
    } else {
        None
    };

    // modifier
    let modifier = match cur.chars().next() {
        Some('?') => {
            cur = &cur[1..];
            Modifier::Optional
        }
        Some('*') => {
            cur = &cur[1..];
            Modifier::ZeroOrMore
        }
        Some('+') => {
            cur = &cur[1..];
            Modifier::OneOrMore
        }
        _ => Modifier::None,
    };

    if !cur.is_empty() {
        return Err(Error::BadPattern(format!(
            "trailing characters after parameter in {text:?}"
        )));
    }
    if wildcard && modifier != Modifier::None {
        return Err(Error::BadPattern(format!(
            "wildcard takes no modifier in {text:?}"
        )));
    }

    Ok(Segment {
        literal: literal.to_owned(),
        param: Some(Param {
            name,
            wildcard,
            constraint,
            modifier,
        }),
    })
}

fn constraint_ok(param: &Param, text: &str) -> bool {
    param.constraint.as_ref().is_none_or(|re| re.is_match(text))
}

/// Path segments a candidate tail cannot match without.
fn min_segments(tail: &[Segment]) -> usize {
    tail.iter()
        .filter(|seg| match &seg.param {
            None => true,
            Some(p) => {
                if p.wildcard {
                    false
                } else {
                    match p.modifier {
                        Modifier::None | Modifier::OneOrMore => true,
                        Modifier::Optional => !seg.literal.is_empty(),
                        Modifier::ZeroOrMore => !seg.literal.is_empty(),
                    }
                }
            }
        })
        .count()
}

fn match_candidate(
    cand: &[Segment],
    path: &[&str],
    end: bool,
) -> Option<(usize, Vec<(String, String)>)> {
    let mut j = 0usize;
    let mut captures = Vec::new();

    for (si, seg) in cand.iter().enumerate() {
        let Some(param) = &seg.param else {
            // literal segment
            if j < path.len() && path[j] == seg.literal {
                j += 1;
                continue;
            }
            return None;
        };

        if param.wildcard || matches!(param.modifier, Modifier::ZeroOrMore | Modifier::OneOrMore) {
            let needed = min_segments(&cand[si + 1..]);
            let available = path.len() - j;
            if available < needed {
                return None;
            }
            let max_take = available - needed;
            let min_take = usize::from(param.modifier == Modifier::OneOrMore);

            let mut parts: Vec<&str> = Vec::new();
            while parts.len() < max_take {
                let raw = path[j + parts.len()];
                let piece = if parts.is_empty() {
                    match raw.strip_prefix(seg.literal.as_str()) {
                        Some(p) if !p.is_empty() => p,
                        _ => break,
                    }
                } else {
                    raw
                };
                if !constraint_ok(param, piece) {
                    break;
                }
                parts.push(piece);
            }

            if parts.len() < min_take {
                return None;
            }
            if parts.is_empty() && !seg.literal.is_empty() {
                // zero repetitions, but the literal itself is required
                if j < path.len() && path[j] == seg.literal {
                    j += 1;
                    continue;
                }
                return None;
            }
            if !parts.is_empty() {
                j += parts.len();
                captures.push((param.name.clone(), parts.join("/")));
            }
            continue;
        }

        if param.modifier == Modifier::Optional {
            if j < path.len() {
                if let Some(rest) = path[j].strip_prefix(seg.literal.as_str()) {
                    if !rest.is_empty() && constraint_ok(param, rest) {
                        captures.push((param.name.clone(), rest.to_owned()));
                        j += 1;
                        continue;
                    }
                    if rest.is_empty() && !seg.literal.is_empty() {
                        j += 1; // literal alone, parameter absent
                        continue;
                    }
                }
            }
            if seg.literal.is_empty() {
                continue; // whole segment absent
            }
            return None;
        }

        // required parameter
        if j >= path.len() {
            return None;
        }
        let rest = path[j].strip_prefix(seg.literal.as_str())?;
        if rest.is_empty() || !constraint_ok(param, rest) {
            return None;
        }
        captures.push((param.name.clone(), rest.to_owned()));
        j += 1;
    }

    if end && j != path.len() {
        return None;
    }
    Some((j, captures))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(p: &str) -> Pattern {
        Pattern::compile(p).unwrap()
    }

    fn capture<'a>(m: &'a PatternMatch, name: &str) -> Option<&'a str> {
        m.captures
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn grammar_accepts() {
        for p in [
            "/",
            "/a",
            "/a/",
            "/a/b",
            "/:id",
            "/:id(1)",
            "/:id?",
            "/:id(x)+",
            "/*rest",
            "/a:id/b",
            "/:_private",
            "/:\"user id\"",
            "/api{/v:ver}",
        ] {
            assert!(Pattern::compile(p).is_ok(), "{p} should compile");
        }
    }

    #[test]
    fn grammar_rejects() {
        for p in [
            "",
            "a",
            "//x",
            "/:",
            "/:0",
            "/:a(",
            "/:(",
            "/:a()",
            "/a:id(x)*?",
            "/{a{b}}",
            "/{a",
            "/ bad",
        ] {
            assert!(Pattern::compile(p).is_err(), "{p} should not compile");
        }
    }

    #[test]
    fn literal_prefix_param_with_constraint_and_modifier() {
        // one segment: literal "a", param "id", constraint "x", modifier "+"
        let p = compile("/a:id(x)+");
        let m = p.matches("/ax", true).unwrap();
        assert_eq!(capture(&m, "id"), Some("x"));
        assert!(p.matches("/ay", true).is_none());
    }

    #[test]
    fn prefix_vs_exact() {
        let p = compile("/api");
        let m = p.matches("/api/users", false).unwrap();
        assert_eq!(m.consumed, 4); // "/api" moved to base_path
        assert!(p.matches("/api/users", true).is_none());
        assert!(p.matches("/api", true).is_some());
    }

    #[test]
    fn root_pattern() {
        let p = compile("/");
        assert!(p.matches("/anything/at/all", false).is_some());
        assert!(p.matches("/", true).is_some());
        assert!(p.matches("/x", true).is_none());
    }

    #[test]
    fn named_params_capture() {
        let p = compile("/users/:id/posts/:post_id");
        let m = p.matches("/users/42/posts/abc", true).unwrap();
        assert_eq!(capture(&m, "id"), Some("42"));
        assert_eq!(capture(&m, "post_id"), Some("abc"));
        assert_eq!(m.consumed, "/users/42/posts/abc".len());
    }

    #[test]
    fn constraint_filters() {
        let p = compile(r"/users/:id(\d+)");
        assert!(p.matches("/users/42", true).is_some());
        assert!(p.matches("/users/abc", true).is_none());
    }

    #[test]
    fn optional_param() {
        let p = compile("/files/:name?");
        assert!(p.matches("/files", true).is_some());
        let m = p.matches("/files/readme", true).unwrap();
        assert_eq!(capture(&m, "name"), Some("readme"));
        assert!(p.matches("/files/a/b", true).is_none());
    }

    #[test]
    fn one_or_more_spans_segments() {
        let p = compile("/docs/:path+");
        let m = p.matches("/docs/a/b/c", true).unwrap();
        assert_eq!(capture(&m, "path"), Some("a/b/c"));
        assert!(p.matches("/docs", true).is_none());
    }

    #[test]
    fn zero_or_more_allows_empty() {
        let p = compile("/docs/:path*");
        assert!(p.matches("/docs", true).is_some());
        let m = p.matches("/docs/a/b", true).unwrap();
        assert_eq!(capture(&m, "path"), Some("a/b"));
    }

    #[test]
    fn wildcard_takes_rest() {
        let p = compile("/assets/*file");
        let m = p.matches("/assets/js/app.js", true).unwrap();
        assert_eq!(capture(&m, "file"), Some("js/app.js"));
        // zero segments is fine for a wildcard
        assert!(p.matches("/assets", true).is_some());
    }

    #[test]
    fn repeat_leaves_room_for_tail() {
        let p = compile("/:dirs+/index");
        let m = p.matches("/a/b/index", true).unwrap();
        assert_eq!(capture(&m, "dirs"), Some("a/b"));
        assert!(p.matches("/index", true).is_none());
    }

    #[test]
    fn group_expansion() {
        let p = compile("/api{/v:ver(\\d+)}/users");
        let m = p.matches("/api/v2/users", true).unwrap();
        assert_eq!(capture(&m, "ver"), Some("2"));
        assert!(p.matches("/api/users", true).is_some());
        assert!(p.matches("/api/vx/users", true).is_none());
    }

    #[test]
    fn trailing_slash_in_pattern_is_ignored() {
        let p = compile("/api/");
        assert!(p.matches("/api", true).is_some());
    }

    #[test]
    fn trailing_slash_in_path_stays_in_remainder() {
        let p = compile("/api");
        let m = p.matches("/api/", false).unwrap();
        assert_eq!(m.consumed, 4); // the final "/" remains in path
    }

    #[test]
    fn quoted_name() {
        let p = compile("/:\"user id\"");
        let m = p.matches("/alice", true).unwrap();
        assert_eq!(capture(&m, "user id"), Some("alice"));
    }
}
