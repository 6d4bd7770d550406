//! Custom markup rule tables and their compiled matchers.

use crate::buffer::CustomFence;
use crate::error::MarkupError;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

/// How a rule applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    /// Substitute the tokens in raw source before transpiling.
    Source {
        /// Replacement for the open token.
        open_with: String,
        /// Replacement for the close token.
        close_with: String,
    },
    /// A line-level fence; its content renders as a code block tagged `info`.
    Fence {
        /// Language tag given to the content.
        info: String,
    },
    /// Wrap inline content between the tokens in a markup node.
    Tree,
}

/// One open/close token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupRule {
    /// Unique rule name; becomes the `rule` of wrapper nodes.
    pub name: String,
    /// Open token.
    pub open: String,
    /// Close token.
    pub close: String,
    /// How the rule applies.
    pub kind: RuleKind,
    /// Whether an unclosed opener yields a pending span while streaming.
    pub streaming: bool,
}

impl MarkupRule {
    /// A tree-wrapping rule.
    pub fn tree(name: &str, open: &str, close: &str, streaming: bool) -> Self {
        Self {
            name: name.to_string(),
            open: open.to_string(),
            close: close.to_string(),
            kind: RuleKind::Tree,
            streaming,
        }
    }

    /// A source substitution rule.
    pub fn source(name: &str, open: &str, close: &str, open_with: &str, close_with: &str) -> Self {
        Self {
            name: name.to_string(),
            open: open.to_string(),
            close: close.to_string(),
            kind: RuleKind::Source {
                open_with: open_with.to_string(),
                close_with: close_with.to_string(),
            },
            streaming: false,
        }
    }

    /// A custom fence rule.
    pub fn fence(name: &str, open: &str, close: &str, info: &str) -> Self {
        Self {
            name: name.to_string(),
            open: open.to_string(),
            close: close.to_string(),
            kind: RuleKind::Fence { info: info.to_string() },
            streaming: true,
        }
    }
}

/// Which side of a pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenRole {
    Open,
    Close,
    /// Open and close tokens are identical.
    Both,
}

/// A token alternation plus what each alternative means.
#[derive(Debug)]
pub(crate) struct TokenMatcher {
    pub(crate) regex: Regex,
    pub(crate) tokens: FxHashMap<String, Vec<(usize, TokenRole)>>,
}

impl TokenMatcher {
    fn build<'a>(
        rules: impl Iterator<Item = (usize, &'a MarkupRule)>,
    ) -> Result<Option<Self>, MarkupError> {
        let mut tokens: FxHashMap<String, Vec<(usize, TokenRole)>> = FxHashMap::default();
        for (index, rule) in rules {
            if rule.open == rule.close {
                tokens.entry(rule.open.clone()).or_default().push((index, TokenRole::Both));
            } else {
                tokens.entry(rule.open.clone()).or_default().push((index, TokenRole::Open));
                tokens.entry(rule.close.clone()).or_default().push((index, TokenRole::Close));
            }
        }
        if tokens.is_empty() {
            return Ok(None);
        }
        // Longest first so that `**` wins over `*`.
        let mut alternatives: Vec<&String> = tokens.keys().collect();
        alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let pattern = alternatives
            .iter()
            .map(|token| regex::escape(token))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Some(Self {
            regex: Regex::new(&pattern)?,
            tokens,
        }))
    }

    pub(crate) fn roles(&self, token: &str) -> &[(usize, TokenRole)] {
        self.tokens.get(token).map_or(&[], Vec::as_slice)
    }
}

/// A validated rule table with matchers compiled once.
#[derive(Debug)]
pub struct RuleSet {
    pub(crate) rules: Vec<MarkupRule>,
    pub(crate) source: Option<TokenMatcher>,
    pub(crate) tree: Option<TokenMatcher>,
    pub(crate) fences: Vec<(usize, CustomFence)>,
}

impl RuleSet {
    /// Validate and compile `rules`.
    pub fn compile(rules: Vec<MarkupRule>) -> Result<Self, MarkupError> {
        let mut names = FxHashSet::default();
        for rule in &rules {
            if rule.open.is_empty() || rule.close.is_empty() {
                return Err(MarkupError::EmptyToken(rule.name.clone()));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(MarkupError::DuplicateName(rule.name.clone()));
            }
        }

        let source = TokenMatcher::build(
            rules
                .iter()
                .enumerate()
                .filter(|(_, r)| matches!(r.kind, RuleKind::Source { .. })),
        )?;
        let tree = TokenMatcher::build(
            rules
                .iter()
                .enumerate()
                .filter(|(_, r)| matches!(r.kind, RuleKind::Tree)),
        )?;
        let fences = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r.kind, RuleKind::Fence { .. }))
            .map(|(i, r)| {
                (
                    i,
                    CustomFence {
                        open: r.open.clone(),
                        close: r.close.clone(),
                    },
                )
            })
            .collect();
        tracing::debug!(rules = rules.len(), "markup.compile");
        Ok(Self {
            rules,
            source,
            tree,
            fences,
        })
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            source: None,
            tree: None,
            fences: Vec::new(),
        }
    }

    /// The rules, in table order.
    pub fn rules(&self) -> &[MarkupRule] {
        &self.rules
    }

    /// Fence specs for the fence parser.
    pub fn custom_fences(&self) -> Vec<CustomFence> {
        self.fences.iter().map(|(_, fence)| fence.clone()).collect()
    }

    /// Open tokens of every non-fence rule; plain mode treats them as markers.
    pub fn marker_tokens(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| !matches!(r.kind, RuleKind::Fence { .. }))
            .map(|r| r.open.clone())
            .collect()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}
