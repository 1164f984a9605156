//! Database entities for the storefront ledger.

pub mod address;
pub mod cart_item;
pub mod category;
pub mod favorite_product;
pub mod notification;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod payment_card;
pub mod payment_service;
pub mod product;
pub mod review;
pub mod user_profile;
