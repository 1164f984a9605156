use super::order::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only ledger entry for one payment attempt.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub payment_service_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    /// Order status produced by this attempt
    pub order_status_after: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::payment_service::Entity",
        from = "Column::PaymentServiceId",
        to = "super::payment_service::Column::Id"
    )]
    PaymentService,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::payment_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Amount covered the order total
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Amount fell short of the order total
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl From<OrderStatus> for PaymentStatus {
    fn from(outcome: OrderStatus) -> Self {
        match outcome {
            OrderStatus::Paid => PaymentStatus::Paid,
            OrderStatus::Cancelled => PaymentStatus::Cancelled,
            OrderStatus::Placed | OrderStatus::Unpaid => PaymentStatus::Failed,
        }
    }
}
