//! Pure input predicates.
//!
//! Every engine operation runs these checks before it touches storage. They never
//! allocate and never fail; the typed constructors in [`crate::article`],
//! [`crate::order`] and [`crate::types`] turn a `false` into
//! [`InventoryError::Validation`](crate::error::InventoryError::Validation).

use chrono::{DateTime, Utc};

/// Maximum length of an article code, in characters.
pub const MAX_ARTICLE_LEN: usize = 50;

/// Length of the optional condition suffix (`.` plus four digits).
pub const CONDITION_SUFFIX_LEN: usize = 5;

/// Separator that opens the condition suffix.
pub const CONDITION_SEPARATOR: char = '.';

/// Upper bound of each condition digit, in suffix order:
/// case damage, display damage, package opened, packaging damaged.
pub const CONDITION_BOUNDS: [u8; 4] = [2, 2, 1, 1];

/// Returns `true` when `code` is a well-formed article code.
///
/// A code is 1 to [`MAX_ARTICLE_LEN`] characters long. When the fifth character from
/// the end is [`CONDITION_SEPARATOR`], the four characters after it must be digits
/// within [`CONDITION_BOUNDS`].
///
/// # Examples
///
/// ```
/// use stockroom_core::validation::is_valid_article;
///
/// assert!(is_valid_article("W1"));
/// assert!(is_valid_article("TV-55.2101"));
/// assert!(!is_valid_article("TV-55.3000"));
/// assert!(!is_valid_article("BAD..999"));
/// assert!(!is_valid_article(""));
/// ```
#[must_use]
pub fn is_valid_article(code: &str) -> bool {
    let chars: Vec<char> = code.chars().collect();
    if chars.is_empty() || chars.len() > MAX_ARTICLE_LEN {
        return false;
    }
    if chars.iter().any(|c| c.is_control()) {
        return false;
    }
    match condition_digits(&chars) {
        Some(Some(_)) | None => true,
        Some(None) => false,
    }
}

/// Decodes the condition suffix of an already split code.
///
/// Returns `None` when the code carries no suffix, `Some(None)` when the suffix is
/// present but malformed and `Some(Some(digits))` when it is valid.
pub(crate) fn condition_digits(chars: &[char]) -> Option<Option<[u8; 4]>> {
    if chars.len() < CONDITION_SUFFIX_LEN {
        return None;
    }
    let suffix = &chars[chars.len() - CONDITION_SUFFIX_LEN..];
    if suffix[0] != CONDITION_SEPARATOR {
        return None;
    }

    let mut digits = [0_u8; 4];
    for (slot, (c, bound)) in suffix[1..].iter().zip(CONDITION_BOUNDS).enumerate() {
        let Some(value) = c.to_digit(10) else {
            return Some(None);
        };
        #[allow(clippy::cast_possible_truncation)] // a decimal digit always fits in u8
        let value = value as u8;
        if value > bound {
            return Some(None);
        }
        digits[slot] = value;
    }
    Some(Some(digits))
}

/// Returns `true` when `cents` is a sellable unit price.
#[must_use]
pub const fn is_valid_price(cents: i64) -> bool {
    cents > 0
}

/// Returns `true` when `number` can identify a reservation.
#[must_use]
pub const fn is_valid_order_number(number: i64) -> bool {
    number > 0
}

/// Returns `true` when `quantity` can be reserved or sold.
#[must_use]
pub const fn is_valid_quantity(quantity: i64) -> bool {
    quantity > 0 && quantity <= u32::MAX as i64
}

/// Returns `true` when `amount` can be stored as an available stock amount.
#[must_use]
pub const fn is_valid_stock_amount(amount: i64) -> bool {
    amount >= 0 && amount <= u32::MAX as i64
}

/// Returns `true` when `[from, to]` is a non-empty inclusive range.
#[must_use]
pub fn is_valid_date_range(from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    from <= to
}

/// Returns `true` when `name` is usable as a product display name.
#[must_use]
pub fn is_valid_product_name(name: &str) -> bool {
    !name.trim().is_empty()
}
