//! Article codes and their encoded condition flags.

use crate::error::InventoryError;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Validated article identifier.
///
/// Opaque SKU-like code of at most 50 characters. A code may end with a `.cdpo`
/// suffix describing the physical condition of the unit, see [`Condition`].
///
/// # Examples
///
/// ```
/// use stockroom_core::article::ArticleCode;
///
/// let code: ArticleCode = "TV-55.1010".parse().unwrap();
/// let condition = code.condition().unwrap();
/// assert_eq!(condition.case_damage, 1);
/// assert!(condition.package_opened);
///
/// assert!("BAD..999".parse::<ArticleCode>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArticleCode(String);

impl ArticleCode {
    /// Validate and wrap an article code.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the code is empty, too long or
    /// carries a malformed condition suffix.
    pub fn new(code: impl Into<String>) -> Result<Self, InventoryError> {
        let code = code.into();
        if validation::is_valid_article(&code) {
            Ok(Self(code))
        } else {
            Err(InventoryError::Validation(format!(
                "invalid article code: {code:?}"
            )))
        }
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decoded condition flags, if the code carries a suffix.
    #[must_use]
    pub fn condition(&self) -> Option<Condition> {
        let chars: Vec<char> = self.0.chars().collect();
        validation::condition_digits(&chars)
            .flatten()
            .map(Condition::from_digits)
    }
}

impl fmt::Display for ArticleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArticleCode {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArticleCode {
    type Error = InventoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArticleCode> for String {
    fn from(code: ArticleCode) -> Self {
        code.0
    }
}

impl AsRef<str> for ArticleCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Physical condition encoded in an article code suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Case damage level, 0 (none) to 2 (heavy).
    pub case_damage: u8,
    /// Display damage level, 0 (none) to 2 (heavy).
    pub display_damage: u8,
    /// Whether the original package was opened.
    pub package_opened: bool,
    /// Whether the packaging itself is damaged.
    pub packaging_damaged: bool,
}

impl Condition {
    const fn from_digits(digits: [u8; 4]) -> Self {
        Self {
            case_damage: digits[0],
            display_damage: digits[1],
            package_opened: digits[2] == 1,
            packaging_damaged: digits[3] == 1,
        }
    }

    /// `true` when every flag is at its pristine value.
    #[must_use]
    pub const fn is_pristine(&self) -> bool {
        self.case_damage == 0
            && self.display_damage == 0
            && !self.package_opened
            && !self.packaging_damaged
    }
}
