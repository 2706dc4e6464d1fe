use std::fmt;

use thiserror::Error;

/// Password complexity rules checked once at registration.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub min_uppercase: usize,
    pub min_lowercase: usize,
    pub min_digits: usize,
    pub min_special: usize,
    pub special_chars: &'static str,
}

pub const DEFAULT_POLICY: PasswordPolicy = PasswordPolicy {
    min_length: 8,
    min_uppercase: 2,
    min_lowercase: 3,
    min_digits: 2,
    min_special: 1,
    special_chars: "!@#$&*",
};

impl Default for PasswordPolicy {
    fn default() -> Self {
        DEFAULT_POLICY
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Length(usize),
    Uppercase(usize),
    Lowercase(usize),
    Digits(usize),
    Special(usize, &'static str),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length(n) => write!(f, "at least {n} characters"),
            Self::Uppercase(n) => write!(f, "at least {n} uppercase letters"),
            Self::Lowercase(n) => write!(f, "at least {n} lowercase letters"),
            Self::Digits(n) => write!(f, "at least {n} digits"),
            Self::Special(n, set) => write!(f, "at least {n} of {set}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Password must contain {}", join(.unmet))]
pub struct PolicyViolation {
    pub unmet: Vec<Requirement>,
}

fn join(reqs: &[Requirement]) -> String {
    reqs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), PolicyViolation> {
        let count = |pred: &dyn Fn(char) -> bool| password.chars().filter(|c| pred(*c)).count();

        let mut unmet = Vec::new();
        if password.chars().count() < self.min_length {
            unmet.push(Requirement::Length(self.min_length));
        }
        if count(&|c: char| c.is_ascii_uppercase()) < self.min_uppercase {
            unmet.push(Requirement::Uppercase(self.min_uppercase));
        }
        if count(&|c: char| c.is_ascii_lowercase()) < self.min_lowercase {
            unmet.push(Requirement::Lowercase(self.min_lowercase));
        }
        if count(&|c: char| c.is_ascii_digit()) < self.min_digits {
            unmet.push(Requirement::Digits(self.min_digits));
        }
        if count(&|c: char| self.special_chars.contains(c)) < self.min_special {
            unmet.push(Requirement::Special(self.min_special, self.special_chars));
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(PolicyViolation { unmet })
        }
    }
}
