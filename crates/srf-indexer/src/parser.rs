//! Filter list parser
//!
//! Converts Adblock-Plus style filter list text into [`UrlRule`]s. Lines that
//! cannot be converted are counted and skipped; they never fail the list.

use std::io::Read;

use srf_core::types::{
    ActivationTypes, AnchorType, DomainCondition, ElementTypes, PartyRestriction, RuleSemantics, UrlPatternType,
    UrlRule,
};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to read filter list: {0}")]
    Io(#[from] std::io::Error),
    #[error("Filter list is not valid UTF-8 (at byte {0})")]
    InvalidUtf8(usize),
}

/// One converted rule. `badfilter` rules cancel their twins in the optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub rule: UrlRule,
    pub badfilter: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub comments: usize,
    pub cosmetic: usize,
    pub unsupported: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFilterList {
    pub rules: Vec<ParsedRule>,
    pub stats: ParseStats,
}

/// Read and parse a whole filter list.
pub fn read_filter_list(reader: &mut impl Read) -> Result<ParsedFilterList, ParseError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let text = std::str::from_utf8(&bytes).map_err(|e| ParseError::InvalidUtf8(e.valid_up_to()))?;
    Ok(parse_filter_list(text))
}

pub fn parse_filter_list(text: &str) -> ParsedFilterList {
    let mut list = ParsedFilterList::default();

    for raw_line in text.lines() {
        list.stats.lines += 1;
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            list.stats.comments += 1;
            continue;
        }

        if line.contains("##") || line.contains("#@#") || line.contains("#?#") {
            list.stats.cosmetic += 1;
            continue;
        }

        match parse_rule(line) {
            Some(parsed) => list.rules.push(parsed),
            None => {
                log::trace!("Unsupported filter: {}", line);
                list.stats.unsupported += 1;
            }
        }
    }

    log::debug!(
        "Parsed {} rules from {} lines ({} unsupported)",
        list.rules.len(),
        list.stats.lines,
        list.stats.unsupported
    );
    list
}

/// Parse a single non-comment filter line.
pub fn parse_rule(line: &str) -> Option<ParsedRule> {
    let mut line = line.trim();
    let mut semantics = RuleSemantics::Blacklist;
    if let Some(rest) = line.strip_prefix("@@") {
        semantics = RuleSemantics::Whitelist;
        line = rest;
    }

    let (pattern_part, options_text) = split_rule_options(line);
    let options = match options_text {
        Some(text) => parse_options(text)?,
        None => ParsedOptions::default(),
    };

    let mut rule = parse_pattern(semantics, pattern_part)?;
    rule.match_case = options.match_case;
    rule.party = options.party;
    rule.domains = options.domains;
    rule.activation_types = options.activation_types;
    rule.element_types = match options.element_types {
        Some(types) => types,
        None if !options.activation_types.is_empty() => ElementTypes::empty(),
        None => ElementTypes::DEFAULT,
    };

    Some(ParsedRule { rule, badfilter: options.badfilter })
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[')
}

/// Options follow the last `$`, unless that `$` belongs to a regex body.
fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.rfind('$') {
        Some(pos) if !line[pos + 1..].contains('/') => (&line[..pos], Some(&line[pos + 1..])),
        _ => (line, None),
    }
}

fn parse_pattern(semantics: RuleSemantics, text: &str) -> Option<UrlRule> {
    if text.len() > 1 && text.starts_with('/') && text.ends_with('/') {
        let mut rule = UrlRule::new(semantics, &text[1..text.len() - 1]);
        rule.pattern_type = UrlPatternType::Regexp;
        return Some(rule);
    }

    let (anchor_left, rest) = if let Some(rest) = text.strip_prefix("||") {
        (AnchorType::Subdomain, rest)
    } else if let Some(rest) = text.strip_prefix('|') {
        (AnchorType::Boundary, rest)
    } else {
        (AnchorType::None, text)
    };

    let (anchor_right, pattern) = match rest.strip_suffix('|') {
        Some(pattern) => (AnchorType::Boundary, pattern),
        None => (AnchorType::None, rest),
    };

    if pattern.contains('|') {
        return None;
    }

    let mut rule = UrlRule::new(semantics, pattern);
    rule.anchor_left = anchor_left;
    rule.anchor_right = anchor_right;
    Some(rule)
}

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct ParsedOptions {
    element_types: Option<ElementTypes>,
    activation_types: ActivationTypes,
    party: PartyRestriction,
    match_case: bool,
    domains: Vec<DomainCondition>,
    badfilter: bool,
}

fn parse_options(text: &str) -> Option<ParsedOptions> {
    let mut options = ParsedOptions::default();
    let mut type_include = ElementTypes::empty();
    let mut type_exclude = ElementTypes::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "match-case" {
            options.match_case = true;
            continue;
        }

        if raw_lower == "badfilter" {
            options.badfilter = true;
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("domain=") {
            options.domains.extend(parse_domain_option(value)?);
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if let Some(mask) = ElementTypes::from_option_name(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        if let Some(mask) = ActivationTypes::from_option_name(name) {
            if negated {
                return None;
            }
            options.activation_types |= mask;
            continue;
        }

        options.party = match (name, negated) {
            ("third-party", false) | ("first-party", true) => PartyRestriction::ThirdParty,
            ("third-party", true) | ("first-party", false) => PartyRestriction::FirstParty,
            _ => return None,
        };
    }

    if !type_include.is_empty() {
        options.element_types = Some(type_include & !type_exclude);
    } else if !type_exclude.is_empty() {
        options.element_types = Some(ElementTypes::DEFAULT & !type_exclude);
    }

    Some(options)
}

fn parse_domain_option(value: &str) -> Option<Vec<DomainCondition>> {
    let mut domains = Vec::new();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let domain = normalize_domain(domain_raw)?;
        domains.push(if is_exclude {
            DomainCondition::exclude(&domain)
        } else {
            DomainCondition::include(&domain)
        });
    }

    if domains.is_empty() {
        return None;
    }
    Some(domains)
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}
