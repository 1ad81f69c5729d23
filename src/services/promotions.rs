//! Promotion lookup and discount math.
//!
//! Usage accounting happens inside the settlement transaction via a
//! conditional increment, so a code with `usage_limit` can never be consumed
//! more times than allowed even under concurrent settlements. Exhaustion at
//! settlement time is logged, not fatal: the buyer already paid the
//! discounted amount and the purchase still completes.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::promotion::{self, Entity as PromotionEntity, PromotionKind};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DbPool>,
}

impl PromotionService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Looks up a code that is active, within its validity window, and not
    /// yet exhausted. Unknown or unusable codes are NotFound, never a silent
    /// zero discount.
    #[instrument(skip(self))]
    pub async fn find_active(&self, code: &str) -> Result<promotion::Model, ServiceError> {
        let now = Utc::now();

        let promotion = PromotionEntity::find()
            .filter(promotion::Column::Code.eq(code))
            .filter(promotion::Column::Active.eq(true))
            .filter(promotion::Column::StartsAt.lte(now))
            .filter(promotion::Column::EndsAt.gte(now))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Promotion code {} not usable", code)))?;

        if let Some(limit) = promotion.usage_limit {
            if promotion.usage_count >= limit {
                return Err(ServiceError::NotFound(format!(
                    "Promotion code {} not usable",
                    code
                )));
            }
        }

        Ok(promotion)
    }

    /// Discount for a subtotal, capped so the total never goes negative.
    pub fn calculate_discount(promotion: &promotion::Model, subtotal: Decimal) -> Decimal {
        let raw = match promotion.kind {
            PromotionKind::Percentage => {
                subtotal * promotion.discount_value / Decimal::from(100)
            }
            PromotionKind::FixedAmount => promotion.discount_value,
        };
        raw.min(subtotal).max(Decimal::ZERO).round_dp(2)
    }

    /// Records one use inside the settlement transaction. The increment is
    /// conditional on the limit; losing the race is logged and ignored
    /// because the purchase itself must still complete.
    pub async fn record_use<C: ConnectionTrait>(
        conn: &C,
        promotion_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = PromotionEntity::update_many()
            .col_expr(
                promotion::Column::UsageCount,
                Expr::col(promotion::Column::UsageCount).add(1),
            )
            .col_expr(promotion::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(promotion::Column::Id.eq(promotion_id))
            .filter(
                Condition::any()
                    .add(promotion::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(promotion::Column::UsageCount)
                            .lt(Expr::col(promotion::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            warn!(
                promotion_id = %promotion_id,
                "Promotion exhausted between validation and settlement; use not recorded"
            );
        }
        Ok(())
    }
}
