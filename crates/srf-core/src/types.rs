//! Rule model for subresource filtering
//!
//! These types describe a single URL rule as produced by the unindexed rule
//! source, and map directly to the fields stored in the indexed ruleset
//! binary format.

// =============================================================================
// Rule Semantics
// =============================================================================

/// Whether a rule blocks or allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RuleSemantics {
    /// Block rule - disallows the load
    Blacklist = 0,
    /// Exception rule (@@...) - cancels blacklist matches or deactivates filtering
    Whitelist = 1,
}

// =============================================================================
// Pattern Type and Anchors
// =============================================================================

/// How the pattern text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum UrlPatternType {
    /// Plain substring, no special characters
    #[default]
    Substring = 0,
    /// Substring with `*` wildcards and `^` separator placeholders
    Wildcarded = 1,
    /// Regular expression; indexed into the fallback list and never matched
    Regexp = 2,
}

impl TryFrom<u8> for UrlPatternType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Substring),
            1 => Ok(Self::Wildcarded),
            2 => Ok(Self::Regexp),
            _ => Err(()),
        }
    }
}

/// Anchor on either end of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AnchorType {
    /// Pattern may match anywhere
    #[default]
    None = 0,
    /// `|` - pattern must touch the start (or end) of the URL
    Boundary = 1,
    /// `||` - pattern must start at the host or at a subdomain label boundary
    Subdomain = 2,
}

impl TryFrom<u8> for AnchorType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Boundary),
            2 => Ok(Self::Subdomain),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Element Types (bit mask for resource type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Element type bit mask.
    ///
    /// `empty()` doubles as "unspecified": activation checks pass no element
    /// type, resource loads pass exactly one.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ElementTypes: u16 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const XMLHTTPREQUEST = 1 << 5;
        const OBJECT_SUBREQUEST = 1 << 6;
        const SUBDOCUMENT = 1 << 7;
        const PING = 1 << 8;
        const MEDIA = 1 << 9;
        const FONT = 1 << 10;
        const POPUP = 1 << 11;
        const WEBSOCKET = 1 << 12;

        /// All element types a rule may carry
        const ALL = (1 << 13) - 1;
        /// Default mask for rules without type options (popups are opt-in)
        const DEFAULT = Self::ALL.bits() & !Self::POPUP.bits();
    }
}

impl ElementTypes {
    /// Parse a filter list type option name.
    pub fn from_option_name(name: &str) -> Option<Self> {
        let mask = match name {
            "other" => Self::OTHER,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "stylesheet" => Self::STYLESHEET,
            "object" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "object-subrequest" => Self::OBJECT_SUBREQUEST,
            "subdocument" => Self::SUBDOCUMENT,
            "ping" => Self::PING,
            "media" => Self::MEDIA,
            "font" => Self::FONT,
            "popup" => Self::POPUP,
            "websocket" => Self::WEBSOCKET,
            _ => return None,
        };
        Some(mask)
    }

    /// Parse an element type name as used on the command line.
    pub fn from_name_or_other(s: &str) -> Self {
        Self::from_option_name(s).unwrap_or(Self::OTHER)
    }
}

// =============================================================================
// Activation Types
// =============================================================================

bitflags::bitflags! {
    /// Activation type bit mask for document-level whitelist rules.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ActivationTypes: u8 {
        /// $document - disables filtering for the whole document
        const DOCUMENT = 1 << 0;
        /// $elemhide
        const ELEMHIDE = 1 << 1;
        /// $generichide
        const GENERICHIDE = 1 << 2;
        /// $genericblock - disables domain-unrestricted blacklist rules
        const GENERICBLOCK = 1 << 3;

        const ALL = (1 << 4) - 1;
    }
}

impl ActivationTypes {
    /// Parse a filter list activation option name.
    pub fn from_option_name(name: &str) -> Option<Self> {
        match name {
            "document" => Some(Self::DOCUMENT),
            "elemhide" => Some(Self::ELEMHIDE),
            "generichide" => Some(Self::GENERICHIDE),
            "genericblock" => Some(Self::GENERICBLOCK),
            _ => None,
        }
    }
}

// =============================================================================
// Party Restriction
// =============================================================================

/// First-party / third-party restriction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PartyRestriction {
    #[default]
    Any,
    FirstParty,
    ThirdParty,
}

bitflags::bitflags! {
    /// Option flags stored per rule in the indexed ruleset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RuleOptions: u8 {
        /// Rule applies to loads that are first-party to the document
        const APPLIES_TO_FIRST_PARTY = 1 << 0;
        /// Rule applies to loads that are third-party to the document
        const APPLIES_TO_THIRD_PARTY = 1 << 1;
        /// Case-sensitive matching ($match-case)
        const MATCH_CASE = 1 << 2;
    }
}

impl PartyRestriction {
    pub fn to_options(self) -> RuleOptions {
        match self {
            Self::Any => RuleOptions::APPLIES_TO_FIRST_PARTY | RuleOptions::APPLIES_TO_THIRD_PARTY,
            Self::FirstParty => RuleOptions::APPLIES_TO_FIRST_PARTY,
            Self::ThirdParty => RuleOptions::APPLIES_TO_THIRD_PARTY,
        }
    }
}

// =============================================================================
// Domain Conditions
// =============================================================================

/// One entry of a rule's `domain=` list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainCondition {
    /// Lowercased domain, without leading `~`
    pub domain: String,
    /// `~domain` - the rule does not apply on this domain
    pub exclude: bool,
}

impl DomainCondition {
    pub fn include(domain: &str) -> Self {
        Self { domain: domain.to_ascii_lowercase(), exclude: false }
    }

    pub fn exclude(domain: &str) -> Self {
        Self { domain: domain.to_ascii_lowercase(), exclude: true }
    }
}

// =============================================================================
// URL Rule
// =============================================================================

/// A single URL-matching rule from the unindexed ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlRule {
    pub semantics: RuleSemantics,
    pub pattern_type: UrlPatternType,
    pub anchor_left: AnchorType,
    pub anchor_right: AnchorType,
    pub match_case: bool,
    pub pattern: String,
    /// May carry bits outside `ElementTypes::ALL` when the source is untrusted;
    /// the indexer rejects such rules.
    pub element_types: ElementTypes,
    /// May carry bits outside `ActivationTypes::ALL`, see `element_types`.
    pub activation_types: ActivationTypes,
    pub party: PartyRestriction,
    pub domains: Vec<DomainCondition>,
}

impl UrlRule {
    /// A blacklist substring rule for all default element types.
    pub fn new(semantics: RuleSemantics, pattern: &str) -> Self {
        let pattern_type = if pattern.contains(['*', '^']) {
            UrlPatternType::Wildcarded
        } else {
            UrlPatternType::Substring
        };
        Self {
            semantics,
            pattern_type,
            anchor_left: AnchorType::None,
            anchor_right: AnchorType::None,
            match_case: false,
            pattern: pattern.to_string(),
            element_types: ElementTypes::DEFAULT,
            activation_types: ActivationTypes::empty(),
            party: PartyRestriction::Any,
            domains: Vec::new(),
        }
    }

    /// Rule without any included domain. Generic blacklist rules are
    /// suppressed by `$genericblock` exceptions.
    pub fn is_generic(&self) -> bool {
        !self.domains.iter().any(|d| !d.exclude)
    }

    pub fn options(&self) -> RuleOptions {
        let mut options = self.party.to_options();
        if self.match_case {
            options |= RuleOptions::MATCH_CASE;
        }
        options
    }
}
