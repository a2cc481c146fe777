use crate::errors::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Prefix operator of a domain expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    #[serde(rename = "&")]
    And,
    #[serde(rename = "|")]
    Or,
    #[serde(rename = "!")]
    Not,
}

impl Combinator {
    fn arity(self) -> usize {
        match self {
            Combinator::Not => 1,
            Combinator::And | Combinator::Or => 2,
        }
    }
}

/// One `[field, operator, value]` predicate leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition(pub String, pub String, pub JsonValue);

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        Condition(field.into(), operator.into(), value.into())
    }

    pub fn field(&self) -> &str {
        &self.0
    }

    pub fn operator(&self) -> &str {
        &self.1
    }

    pub fn value(&self) -> &JsonValue {
        &self.2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainToken {
    Op(Combinator),
    Leaf(Condition),
}

/// A boolean predicate over record fields, kept as a prefix-notation token
/// list: operators precede their operands, leaves are conditions. The empty
/// domain matches every record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(pub Vec<DomainToken>);

impl Domain {
    pub const fn empty() -> Self {
        Domain(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Single-condition domain.
    pub fn condition(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        Domain(vec![DomainToken::Leaf(Condition::new(field, operator, value))])
    }

    /// Parses the JSON string form, e.g. `[["state","=","won"]]` with
    /// optional explicit `"&"`/`"|"`/`"!"` tokens. Implicit leading ANDs are
    /// made explicit. Malformed input is a composition failure.
    pub fn parse(s: &str) -> Result<Domain> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "[]" {
            return Ok(Domain::empty());
        }
        let domain: Domain = serde_json::from_str(trimmed)
            .map_err(|e| StoreError::DomainEvaluation(format!("{trimmed:?}: {e}")))?;
        domain.normalize()
    }

    /// Inserts the implicit `&` operators so that every operator's arity is
    /// explicit. Fails when operands are missing.
    pub fn normalize(&self) -> Result<Domain> {
        if self.0.is_empty() {
            return Ok(Domain::empty());
        }
        let mut implicit_ands = 0usize;
        let mut expected = 1i64;
        for token in &self.0 {
            if expected == 0 {
                implicit_ands += 1;
                expected = 1;
            }
            match token {
                DomainToken::Op(op) => expected += op.arity() as i64 - 1,
                DomainToken::Leaf(_) => expected -= 1,
            }
        }
        if expected != 0 {
            return Err(StoreError::DomainEvaluation(format!(
                "missing operands in {self}"
            )));
        }
        let mut tokens = vec![DomainToken::Op(Combinator::And); implicit_ands];
        tokens.extend(self.0.iter().cloned());
        Ok(Domain(tokens))
    }

    /// Combines domains under one binary operator. Empty operands contribute
    /// nothing; combining no operands yields the empty domain.
    pub fn combine(op: Combinator, domains: &[Domain]) -> Result<Domain> {
        if op == Combinator::Not {
            return Err(StoreError::DomainEvaluation(
                "cannot combine domains with the unary '!' operator".into(),
            ));
        }
        let mut operands = Vec::with_capacity(domains.len());
        for domain in domains {
            if domain.is_empty() {
                continue;
            }
            operands.push(domain.normalize()?);
        }
        if operands.is_empty() {
            return Ok(Domain::empty());
        }
        let mut tokens = vec![DomainToken::Op(op); operands.len() - 1];
        for operand in operands {
            tokens.extend(operand.0);
        }
        Ok(Domain(tokens))
    }

    pub fn and(domains: &[Domain]) -> Result<Domain> {
        Domain::combine(Combinator::And, domains)
    }

    pub fn or(domains: &[Domain]) -> Result<Domain> {
        Domain::combine(Combinator::Or, domains)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter().filter_map(|t| match t {
            DomainToken::Leaf(c) => Some(c),
            DomainToken::Op(_) => None,
        })
    }

    /// JSON string form, the representation stored in favorites and exports.
    pub fn to_string_form(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".into())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_form())
    }
}
