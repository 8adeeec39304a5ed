//! `has!` loader-plugin expressions: `feature?yes:no`, nestable, with `!`
//! negation (`!feature?a:b` swaps the branches) and empty branches allowed.

use crate::request::Features;
use std::collections::BTreeSet;

/// Parsed `has!` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HasExpr {
    /// Module id (possibly empty, meaning "nothing")
    Module(String),
    /// `feature ? if_true : if_false`
    Conditional {
        /// Feature name
        feature: String,
        /// Branch taken when the feature is true
        if_true: Box<HasExpr>,
        /// Branch taken when the feature is false
        if_false: Box<HasExpr>,
    },
}

impl HasExpr {
    /// Parse the resource part of a `has!` id.
    pub fn parse(text: &str) -> Self {
        let mut rest = text;
        parse_expr(&mut rest)
    }

    /// Every feature the expression tests.
    pub fn features(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        self.collect_features(&mut found);
        found
    }

    fn collect_features(&self, found: &mut BTreeSet<String>) {
        if let Self::Conditional {
            feature,
            if_true,
            if_false,
        } = self
        {
            found.insert(feature.clone());
            if_true.collect_features(found);
            if_false.collect_features(found);
        }
    }

    /// Module ids selected for a feature set: the matching branch when the
    /// feature is defined, both branches when it is not. Empty ids are dropped.
    pub fn evaluate(&self, features: &Features) -> Vec<String> {
        let mut out = Vec::new();
        self.evaluate_into(features, &mut out);
        out
    }

    fn evaluate_into(&self, features: &Features, out: &mut Vec<String>) {
        match self {
            Self::Module(id) => {
                if !id.is_empty() && !out.contains(id) {
                    out.push(id.clone());
                }
            }
            Self::Conditional {
                feature,
                if_true,
                if_false,
            } => match features.get(feature) {
                Some(true) => if_true.evaluate_into(features, out),
                Some(false) => if_false.evaluate_into(features, out),
                None => {
                    if_true.evaluate_into(features, out);
                    if_false.evaluate_into(features, out);
                }
            },
        }
    }
}

// expr := name '?' expr ':' expr | '!' name '?' expr ':' expr | module
fn parse_expr(rest: &mut &str) -> HasExpr {
    let text = *rest;
    let (negated, body) = match text.strip_prefix('!') {
        Some(body) => (true, body),
        None => (false, text),
    };
    let end = body.find([':', '?']).unwrap_or(body.len());
    let head = &body[..end];

    if body[end..].starts_with('?') {
        *rest = &body[end + 1..];
        let first = parse_expr(rest);
        let second = match rest.strip_prefix(':') {
            Some(after) => {
                *rest = after;
                parse_expr(rest)
            }
            None => HasExpr::Module(String::new()),
        };
        let (if_true, if_false) = if negated { (second, first) } else { (first, second) };
        return HasExpr::Conditional {
            feature: head.trim().to_string(),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        };
    }

    // plain module id up to the next ':' (or the end); a leading '!' belongs
    // to no feature, so keep it as text
    let end = text.find(':').unwrap_or(text.len());
    *rest = &text[end..];
    HasExpr::Module(text[..end].trim().to_string())
}
