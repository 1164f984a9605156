//! Money arithmetic for catalog prices and cart lines.

use crate::errors::ServiceError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Money values are kept to two fractional digits.
pub const MONEY_SCALE: u32 = 2;

/// Largest catalog price: ten digits, two of them fractional.
pub const MAX_PRICE: Decimal = dec!(99999999.99);

/// Largest line, order or payment amount: twelve integer digits, which fits
/// the `Decimal(16, 4)` money columns.
pub const MAX_TOTAL: Decimal = dec!(999999999999.99);

/// Rounds a money amount half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `price * (1 - percent / 100)`. `percent` is clamped to `0..=100`.
pub fn discount_price(price: Decimal, percent: i32) -> Decimal {
    let percent = Decimal::from(percent.clamp(0, 100));
    round_money(price * (Decimal::ONE_HUNDRED - percent) / Decimal::ONE_HUNDRED)
}

/// Unit price for a product given its current discount state.
pub fn unit_price(price: Decimal, is_discount: bool, discount_percent: i32) -> Decimal {
    if is_discount {
        discount_price(price, discount_percent)
    } else {
        price
    }
}

/// `quantity * unit_price`, rejected once it no longer fits a money column.
pub fn line_total(quantity: i32, unit_price: Decimal) -> Result<Decimal, ServiceError> {
    Decimal::from(quantity)
        .checked_mul(unit_price)
        .map(round_money)
        .filter(|total| *total <= MAX_TOTAL)
        .ok_or_else(|| amount_too_large(quantity, unit_price))
}

/// Sum of two money amounts, bounded like [`line_total`].
pub fn add_money(left: Decimal, right: Decimal) -> Result<Decimal, ServiceError> {
    left.checked_add(right)
        .filter(|sum| *sum <= MAX_TOTAL)
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!("Total exceeds the maximum of {}", MAX_TOTAL))
        })
}

fn amount_too_large(quantity: i32, unit_price: Decimal) -> ServiceError {
    ServiceError::InvalidInput(format!(
        "{} x {} exceeds the maximum line total of {}",
        quantity, unit_price, MAX_TOTAL
    ))
}

/// True when `price` is within `0..=MAX_PRICE` with at most two decimals.
pub fn is_valid_price(price: Decimal) -> bool {
    price >= Decimal::ZERO && price <= MAX_PRICE && price.normalize().scale() <= MONEY_SCALE
}

/// True when `amount` is positive, at most [`MAX_TOTAL`], and has no more
/// than two fractional digits.
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount <= MAX_TOTAL && amount.normalize().scale() <= MONEY_SCALE
}
