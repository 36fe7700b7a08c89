use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol type representing a trading pair in dashed form (e.g., "BTC-USD").
/// Uses NewType pattern for type safety.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if symbol is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Base asset of a dashed pair ("BTC-USD" -> "BTC"); the whole
    /// symbol when no dash is present
    pub fn base_asset(&self) -> &str {
        match self.0.split_once('-') {
            Some((base, _)) => base,
            None => &self.0,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_creation() {
        let symbol = Symbol::new("BTC-USD");
        assert_eq!(symbol.as_str(), "BTC-USD");
        assert!(!symbol.is_empty());
    }

    #[test]
    fn test_symbol_base_asset() {
        assert_eq!(Symbol::new("BTC-USD").base_asset(), "BTC");
        assert_eq!(Symbol::new("ETH-USD").base_asset(), "ETH");
        assert_eq!(Symbol::new("SOL").base_asset(), "SOL");
    }

    #[test]
    fn test_symbol_serialization() {
        let symbol = Symbol::new("ETH-USD");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"ETH-USD\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, symbol);
    }
}
