//! Dot-separated subjects with NATS-style wildcards.
//!
//! - `*` matches exactly one token (`region.*.processed`)
//! - `>` matches one or more trailing tokens and must be last (`alerts.>`)

use crate::bus::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    One,
    Tail,
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        let parts: Vec<&str> = raw.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(BusError::InvalidTopic(raw.to_string())),
                "*" => Token::One,
                ">" if i + 1 == parts.len() => Token::Tail,
                ">" => return Err(BusError::InvalidTopic(raw.to_string())),
                lit if lit.contains(['*', '>']) || lit.contains(char::is_whitespace) => {
                    return Err(BusError::InvalidTopic(raw.to_string()));
                }
                lit => Token::Literal(lit.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains no wildcard (i.e. is a publishable topic).
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('.');
        for token in &self.tokens {
            match token {
                Token::Tail => return parts.next().is_some_and(|p| !p.is_empty()),
                Token::One => match parts.next() {
                    Some(p) if !p.is_empty() => {}
                    _ => return false,
                },
                Token::Literal(lit) => match parts.next() {
                    Some(p) if p == lit => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

/// Validate a concrete topic used for publishing.
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    let pattern = TopicPattern::parse(topic)?;
    if pattern.is_literal() {
        Ok(())
    } else {
        Err(BusError::InvalidTopic(topic.to_string()))
    }
}
