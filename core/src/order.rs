//! Reservation status and order-number classification.
//!
//! Order numbers `1..=N` are physical checkout-counter slots that get reused as soon
//! as the basket is paid or abandoned. Everything above `N` is a durable customer
//! order (local pickup or internet) whose rows stay around after it is resolved.
//! `N` lives in exactly one place, [`OrderNumbering`], which both the validation of
//! new reservations and the engine's slot handling consult.

use crate::error::InventoryError;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Positive reservation identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// Validate and wrap an order number.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] unless `number` is positive.
    pub fn new(number: i64) -> Result<Self, InventoryError> {
        if validation::is_valid_order_number(number) {
            Ok(Self(number))
        } else {
            Err(InventoryError::Validation(format!(
                "order number must be positive, got {number}"
            )))
        }
    }

    /// The raw number.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for OrderNumber {
    type Error = InventoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderNumber> for i64 {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

/// Lifecycle status of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Basket on a checkout counter.
    NewCashRegister,
    /// Order placed for local pickup.
    NewLocalCustomer,
    /// Order placed through the web shop.
    NewInternetCustomer,
    /// Paid and handed over. Terminal.
    Finished,
    /// Abandoned, stock returned. Terminal.
    Canceled,
}

impl ReservationStatus {
    /// Convert status to its database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewCashRegister => "new_cash_register",
            Self::NewLocalCustomer => "new_local_customer",
            Self::NewInternetCustomer => "new_internet_customer",
            Self::Finished => "finished",
            Self::Canceled => "canceled",
        }
    }

    /// Parse status from its database representation.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, InventoryError> {
        match s {
            "new_cash_register" => Ok(Self::NewCashRegister),
            "new_local_customer" => Ok(Self::NewLocalCustomer),
            "new_internet_customer" => Ok(Self::NewInternetCustomer),
            "finished" => Ok(Self::Finished),
            "canceled" => Ok(Self::Canceled),
            _ => Err(InventoryError::Validation(format!(
                "unknown reservation status: {s}"
            ))),
        }
    }

    /// Statuses a reservation can still leave.
    pub const OPEN: [Self; 3] = [
        Self::NewCashRegister,
        Self::NewLocalCustomer,
        Self::NewInternetCustomer,
    ];

    /// `true` for the `New*` statuses.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(
            self,
            Self::NewCashRegister | Self::NewLocalCustomer | Self::NewInternetCustomer
        )
    }

    /// `true` for `Finished` and `Canceled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the register-slot boundary an order number falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderClass {
    /// Reusable checkout-counter slot.
    Register,
    /// Durable local-pickup or internet order.
    Customer,
}

/// Default number of checkout-counter slots.
pub const DEFAULT_REGISTER_SLOTS: i64 = 10;

/// The register-slot boundary.
///
/// # Examples
///
/// ```
/// use stockroom_core::order::{OrderClass, OrderNumber, OrderNumbering, ReservationStatus};
///
/// let numbering = OrderNumbering::default();
/// let slot = OrderNumber::new(3).unwrap();
/// let order = OrderNumber::new(11).unwrap();
///
/// assert_eq!(numbering.classify(slot), OrderClass::Register);
/// assert_eq!(numbering.classify(order), OrderClass::Customer);
/// assert!(numbering.accepts(slot, ReservationStatus::NewCashRegister));
/// assert!(!numbering.accepts(order, ReservationStatus::NewCashRegister));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNumbering {
    register_slots: i64,
}

impl OrderNumbering {
    /// Create a numbering with `register_slots` checkout-counter slots.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if `register_slots` is negative.
    pub fn new(register_slots: i64) -> Result<Self, InventoryError> {
        if register_slots < 0 {
            return Err(InventoryError::Validation(format!(
                "register slot count must not be negative, got {register_slots}"
            )));
        }
        Ok(Self { register_slots })
    }

    /// Highest order number that denotes a register slot.
    #[must_use]
    pub const fn register_slots(&self) -> i64 {
        self.register_slots
    }

    /// Classify an order number.
    #[must_use]
    pub const fn classify(&self, number: OrderNumber) -> OrderClass {
        if number.get() <= self.register_slots {
            OrderClass::Register
        } else {
            OrderClass::Customer
        }
    }

    /// `true` when `number` is a register slot.
    #[must_use]
    pub const fn is_register_slot(&self, number: OrderNumber) -> bool {
        matches!(self.classify(number), OrderClass::Register)
    }

    /// `true` when a new reservation with `status` may be placed under `number`.
    ///
    /// Register slots only take `NewCashRegister`; customer orders only take
    /// `NewLocalCustomer` or `NewInternetCustomer`. Terminal statuses are never
    /// accepted for new reservations.
    #[must_use]
    pub const fn accepts(&self, number: OrderNumber, status: ReservationStatus) -> bool {
        match (self.classify(number), status) {
            (OrderClass::Register, ReservationStatus::NewCashRegister)
            | (
                OrderClass::Customer,
                ReservationStatus::NewLocalCustomer | ReservationStatus::NewInternetCustomer,
            ) => true,
            _ => false,
        }
    }
}

impl Default for OrderNumbering {
    fn default() -> Self {
        Self {
            register_slots: DEFAULT_REGISTER_SLOTS,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            ReservationStatus::NewCashRegister,
            ReservationStatus::NewLocalCustomer,
            ReservationStatus::NewInternetCustomer,
            ReservationStatus::Finished,
            ReservationStatus::Canceled,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ReservationStatus::parse("shipped").is_err());
    }

    #[test]
    fn open_and_terminal() {
        assert!(ReservationStatus::NewLocalCustomer.is_open());
        assert!(ReservationStatus::Finished.is_terminal());
        assert!(ReservationStatus::Canceled.is_terminal());
        assert!(ReservationStatus::OPEN.iter().all(ReservationStatus::is_open));
    }

    #[test]
    fn boundary_is_inclusive() {
        let numbering = OrderNumbering::default();
        assert!(numbering.is_register_slot(OrderNumber::new(10).unwrap()));
        assert!(!numbering.is_register_slot(OrderNumber::new(11).unwrap()));
    }

    #[test]
    fn status_must_match_range() {
        let numbering = OrderNumbering::new(10).unwrap();
        let slot = OrderNumber::new(10).unwrap();
        let order = OrderNumber::new(11).unwrap();

        assert!(numbering.accepts(slot, ReservationStatus::NewCashRegister));
        assert!(!numbering.accepts(slot, ReservationStatus::NewLocalCustomer));
        assert!(!numbering.accepts(slot, ReservationStatus::NewInternetCustomer));
        assert!(numbering.accepts(order, ReservationStatus::NewLocalCustomer));
        assert!(numbering.accepts(order, ReservationStatus::NewInternetCustomer));
        assert!(!numbering.accepts(order, ReservationStatus::NewCashRegister));
        assert!(!numbering.accepts(order, ReservationStatus::Finished));
        assert!(!numbering.accepts(slot, ReservationStatus::Canceled));
    }

    #[test]
    fn zero_slots_makes_every_order_durable() {
        let numbering = OrderNumbering::new(0).unwrap();
        assert_eq!(
            numbering.classify(OrderNumber::new(1).unwrap()),
            OrderClass::Customer
        );
        assert!(OrderNumbering::new(-1).is_err());
    }

    #[test]
    fn order_number_must_be_positive() {
        assert!(OrderNumber::new(0).is_err());
        assert!(OrderNumber::new(-3).is_err());
        assert_eq!(OrderNumber::new(7).unwrap().get(), 7);
        assert!(serde_json::from_str::<OrderNumber>("0").is_err());
    }
}
