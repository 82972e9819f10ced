//! URL pattern matching
//!
//! Patterns are split on `*` into literal pieces that are matched greedily
//! from left to right. Inside a wildcarded pattern `^` matches one separator
//! byte, or the end of the URL. Substring patterns are pure literals.

use crate::ruleset::RuleView;
use crate::types::{AnchorType, UrlPatternType, UrlRule};
use crate::url::is_separator;

/// Borrowed form of a URL pattern with its anchors.
#[derive(Debug, Clone, Copy)]
pub struct UrlPattern<'a> {
    pub pattern: &'a [u8],
    pub pattern_type: UrlPatternType,
    pub anchor_left: AnchorType,
    pub anchor_right: AnchorType,
    pub match_case: bool,
}

impl<'a> UrlPattern<'a> {
    /// Build from an indexed rule. `None` if the record is malformed.
    pub fn from_rule_view(rule: &RuleView<'a>) -> Option<Self> {
        Some(Self {
            pattern: rule.pattern()?,
            pattern_type: rule.pattern_type()?,
            anchor_left: rule.anchor_left()?,
            anchor_right: rule.anchor_right()?,
            match_case: rule.options().contains(crate::types::RuleOptions::MATCH_CASE),
        })
    }

    pub fn from_rule(rule: &'a UrlRule) -> Self {
        Self {
            pattern: rule.pattern.as_bytes(),
            pattern_type: rule.pattern_type,
            anchor_left: rule.anchor_left,
            anchor_right: rule.anchor_right,
            match_case: rule.match_case,
        }
    }

    /// Match against a serialized URL. `host` is the byte range of the host
    /// inside `url`, used by subdomain anchoring.
    pub fn matches(&self, url: &[u8], host: (usize, usize)) -> bool {
        match self.pattern_type {
            // Regular expressions are never evaluated
            UrlPatternType::Regexp => false,
            UrlPatternType::Substring => self.match_pieces(std::iter::once(self.pattern), url, host, true),
            UrlPatternType::Wildcarded => {
                self.match_pieces(self.pattern.split(|&b| b == b'*'), url, host, false)
            }
        }
    }

    fn match_pieces<'p>(
        &self,
        pieces: impl Iterator<Item = &'p [u8]>,
        url: &[u8],
        host: (usize, usize),
        literal: bool,
    ) -> bool {
        let right_anchored = self.anchor_right == AnchorType::Boundary;
        let at = |piece: &[u8], start: usize| match_at(piece, url, start, self.match_case, literal);
        let ends_url = |piece: &[u8], start: usize| at(piece, start) == Some(url.len());

        let mut pieces = pieces.peekable();
        let Some(first) = pieces.next() else {
            return true;
        };
        let first_is_last = pieces.peek().is_none();

        let mut pos = match self.anchor_left {
            AnchorType::Boundary => {
                if first_is_last && right_anchored {
                    return ends_url(first, 0);
                }
                match at(first, 0) {
                    Some(end) => end,
                    None => return false,
                }
            }
            AnchorType::Subdomain => {
                let (host_start, host_end) = host;
                let mut found = None;
                for start in host_start..host_end {
                    if start != host_start && url[start - 1] != b'.' {
                        continue;
                    }
                    if let Some(end) = at(first, start) {
                        if first_is_last && right_anchored && end != url.len() {
                            continue;
                        }
                        found = Some(end);
                        break;
                    }
                }
                match found {
                    Some(end) => end,
                    None => return false,
                }
            }
            AnchorType::None => {
                if first_is_last && right_anchored {
                    return (0..=url.len()).any(|start| ends_url(first, start));
                }
                match find(first, url, 0, &at) {
                    Some(end) => end,
                    None => return false,
                }
            }
        };

        if first_is_last {
            return true;
        }

        while let Some(piece) = pieces.next() {
            let is_last = pieces.peek().is_none();
            if is_last && right_anchored {
                return (pos..=url.len()).any(|start| ends_url(piece, start));
            }
            match find(piece, url, pos, &at) {
                Some(end) => pos = end,
                None => return false,
            }
        }
        true
    }
}

/// Leftmost occurrence of `piece` at or after `from`; returns its end.
fn find(piece: &[u8], url: &[u8], from: usize, at: &impl Fn(&[u8], usize) -> Option<usize>) -> Option<usize> {
    (from..=url.len()).find_map(|start| at(piece, start))
}

/// Match one piece starting exactly at `start`. Returns the end offset.
#[inline]
fn match_at(piece: &[u8], url: &[u8], start: usize, match_case: bool, literal: bool) -> Option<usize> {
    let mut pos = start;
    for &c in piece {
        if c == b'^' && !literal {
            match url.get(pos) {
                Some(&u) if is_separator(u) => pos += 1,
                Some(_) => return None,
                // End of URL counts as a separator
                None => {}
            }
            continue;
        }
        let u = *url.get(pos)?;
        let equal = if match_case { u == c } else { u.eq_ignore_ascii_case(&c) };
        if !equal {
            return None;
        }
        pos += 1;
    }
    Some(pos)
}
