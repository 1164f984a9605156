use crate::{
    db::DbPool,
    entities::{address, payment_card, payment_service, user_profile},
    errors::ServiceError,
    services::{slug, UserContext},
};
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Local `0XXXXXXXXX` or international `+996XXXXXXXXX` numbers
pub static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0\d{9}|\+996\d{9})$").expect("valid phone pattern"));

static CARD_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}$").expect("valid card number pattern"));

static CVV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}$").expect("valid cvv pattern"));

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpsertProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(regex(path = "PHONE_RE", message = "Phone must be 0XXXXXXXXX or +996XXXXXXXXX"))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAddressRequest {
    #[validate(length(min = 1, max = 100))]
    pub country: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub district: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 20))]
    pub house_number: String,
    pub flat_number: Option<String>,
}

/// Card registration. The number and CVV are checked and then discarded.
#[derive(Clone, Deserialize, Validate)]
pub struct AddPaymentCardRequest {
    #[validate(regex(path = "CARD_NUMBER_RE", message = "Card number must be 12 digits"))]
    pub card_number: String,
    #[validate(length(min = 1, max = 100))]
    pub cardholder_name: String,
    pub expiration_date: NaiveDate,
    #[validate(regex(path = "CVV_RE", message = "CVV must be 3 digits"))]
    pub cvv: String,
}

impl std::fmt::Debug for AddPaymentCardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddPaymentCardRequest")
            .field("cardholder_name", &self.cardholder_name)
            .field("expiration_date", &self.expiration_date)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePaymentServiceRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// User profiles, address book, stored cards and payment services
#[derive(Clone)]
pub struct ProfileService {
    db_pool: Arc<DbPool>,
}

impl ProfileService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(user_id = %ctx.user_id))]
    pub async fn upsert_profile(
        &self,
        ctx: &UserContext,
        request: UpsertProfileRequest,
    ) -> Result<user_profile::Model, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;

        let email_owner = user_profile::Entity::find()
            .filter(user_profile::Column::Email.eq(request.email.clone()))
            .one(&txn)
            .await?;
        if matches!(&email_owner, Some(owner) if owner.user_id != ctx.user_id) {
            return Err(ServiceError::Conflict(format!(
                "Email {} is already registered",
                request.email
            )));
        }

        let now = Utc::now();
        let profile = match user_profile::Entity::find_by_id(ctx.user_id).one(&txn).await? {
            Some(existing) => {
                let mut active: user_profile::ActiveModel = existing.into();
                active.first_name = Set(request.first_name);
                active.last_name = Set(request.last_name);
                active.email = Set(request.email);
                active.phone = Set(request.phone);
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                let base = slug::slugify(&format!("{} {}", request.first_name, request.last_name));
                let slug = slug::unique_slug::<user_profile::Entity, _>(
                    &txn,
                    user_profile::Column::Slug,
                    &base,
                )
                .await?;

                user_profile::ActiveModel {
                    user_id: Set(ctx.user_id),
                    first_name: Set(request.first_name),
                    last_name: Set(request.last_name),
                    email: Set(request.email),
                    phone: Set(request.phone),
                    slug: Set(slug),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;

        info!(slug = %profile.slug, "Profile saved");
        Ok(profile)
    }

    pub async fn get_profile(
        &self,
        ctx: &UserContext,
    ) -> Result<user_profile::Model, ServiceError> {
        user_profile::Entity::find_by_id(ctx.user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Profile not found".to_string()))
    }

    #[instrument(skip(self, request), fields(user_id = %ctx.user_id))]
    pub async fn add_address(
        &self,
        ctx: &UserContext,
        request: CreateAddressRequest,
    ) -> Result<address::Model, ServiceError> {
        request.validate()?;

        Ok(address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(ctx.user_id),
            country: Set(request.country),
            city: Set(request.city),
            district: Set(request.district),
            street: Set(request.street),
            house_number: Set(request.house_number),
            flat_number: Set(request.flat_number),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db_pool)
        .await?)
    }

    pub async fn list_addresses(
        &self,
        ctx: &UserContext,
    ) -> Result<Vec<address::Model>, ServiceError> {
        Ok(address::Entity::find()
            .filter(address::Column::UserId.eq(ctx.user_id))
            .order_by_asc(address::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Stores a card reference keeping only the last four digits.
    #[instrument(skip(self, request), fields(user_id = %ctx.user_id))]
    pub async fn add_payment_card(
        &self,
        ctx: &UserContext,
        request: AddPaymentCardRequest,
    ) -> Result<payment_card::Model, ServiceError> {
        request.validate()?;
        if request.expiration_date < Utc::now().date_naive() {
            return Err(ServiceError::InvalidInput("Card has expired".to_string()));
        }

        let last4 = request.card_number[request.card_number.len() - 4..].to_string();

        Ok(payment_card::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(ctx.user_id),
            card_last4: Set(last4),
            cardholder_name: Set(request.cardholder_name),
            expiration_date: Set(request.expiration_date),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db_pool)
        .await?)
    }

    pub async fn list_payment_cards(
        &self,
        ctx: &UserContext,
    ) -> Result<Vec<payment_card::Model>, ServiceError> {
        Ok(payment_card::Entity::find()
            .filter(payment_card::Column::UserId.eq(ctx.user_id))
            .order_by_asc(payment_card::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn create_payment_service(
        &self,
        request: CreatePaymentServiceRequest,
    ) -> Result<payment_service::Model, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;
        let slug = slug::unique_slug::<payment_service::Entity, _>(
            &txn,
            payment_service::Column::Slug,
            &slug::slugify(&request.name),
        )
        .await?;

        let created = payment_service::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            slug: Set(slug),
            is_active: Set(request.is_active),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(payment_service = %created.slug, "Payment service created");
        Ok(created)
    }

    pub async fn list_payment_services(&self) -> Result<Vec<payment_service::Model>, ServiceError> {
        Ok(payment_service::Entity::find()
            .order_by_asc(payment_service::Column::Name)
            .all(&*self.db_pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_accepts_local_and_international_forms() {
        assert!(PHONE_RE.is_match("0555123456"));
        assert!(PHONE_RE.is_match("+996555123456"));
        assert!(!PHONE_RE.is_match("555123456"));
        assert!(!PHONE_RE.is_match("+7555123456"));
    }

    #[test]
    fn card_request_validates_number_and_cvv() {
        let mut request = AddPaymentCardRequest {
            card_number: "123456789012".into(),
            cardholder_name: "A Buyer".into(),
            expiration_date: NaiveDate::from_ymd_opt(2099, 1, 31).unwrap(),
            cvv: "123".into(),
        };
        assert!(request.validate().is_ok());

        request.cvv = "12".into();
        assert!(request.validate().is_err());

        request.cvv = "123".into();
        request.card_number = "1234-5678".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn card_debug_output_hides_secrets() {
        let request = AddPaymentCardRequest {
            card_number: "123456789012".into(),
            cardholder_name: "A Buyer".into(),
            expiration_date: NaiveDate::from_ymd_opt(2099, 1, 31).unwrap(),
            cvv: "987".into(),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("123456789012"));
        assert!(!rendered.contains("987"));
    }
}
