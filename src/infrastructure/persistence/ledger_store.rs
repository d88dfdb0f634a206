//! `LedgerStore` implementation over SQLite. `apply_position_write` is the single
//! atomic seam the ledger lifecycle writes through, so the balance-equation invariant never
//! has to survive a crash between a position write and its balance events.

use crate::domain::errors::{LedgerError, StoreError};
use crate::domain::ledger::{
    BalanceEvent, BalanceEventType, Position, PositionEvent, PositionEventType, PositionStatus,
};
use crate::domain::ports::LedgerStore;
use crate::domain::strategy::Direction;
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;
use uuid::Uuid;

fn status_to_str(s: PositionStatus) -> &'static str {
    match s {
        PositionStatus::Pending => "pending",
        PositionStatus::Open => "open",
        PositionStatus::Closed => "closed",
    }
}

fn status_from_str(s: &str) -> Result<PositionStatus, StoreError> {
    match s {
        "pending" => Ok(PositionStatus::Pending),
        "open" => Ok(PositionStatus::Open),
        "closed" => Ok(PositionStatus::Closed),
        other => Err(StoreError::Serialization(format!("unknown position status '{other}'"))),
    }
}

fn direction_to_str(d: Direction) -> &'static str {
    match d {
        Direction::Buy => "buy",
        Direction::Sell => "sell",
    }
}

fn direction_from_str(s: &str) -> Result<Direction, StoreError> {
    match s {
        "buy" => Ok(Direction::Buy),
        "sell" => Ok(Direction::Sell),
        other => Err(StoreError::Serialization(format!("unknown direction '{other}'"))),
    }
}

fn position_event_to_str(e: PositionEventType) -> &'static str {
    match e {
        PositionEventType::PositionCreated => "position_created",
        PositionEventType::OrderFilled => "order_filled",
        PositionEventType::MarginReserved => "margin_reserved",
        PositionEventType::MarginReleased => "margin_released",
        PositionEventType::PositionClosed => "position_closed",
        PositionEventType::PnlRealized => "pnl_realized",
    }
}

fn position_event_from_str(s: &str) -> Result<PositionEventType, StoreError> {
    match s {
        "position_created" => Ok(PositionEventType::PositionCreated),
        "order_filled" => Ok(PositionEventType::OrderFilled),
        "margin_reserved" => Ok(PositionEventType::MarginReserved),
        "margin_released" => Ok(PositionEventType::MarginReleased),
        "position_closed" => Ok(PositionEventType::PositionClosed),
        "pnl_realized" => Ok(PositionEventType::PnlRealized),
        other => Err(StoreError::Serialization(format!("unknown position event type '{other}'"))),
    }
}

fn balance_event_to_str(e: BalanceEventType) -> &'static str {
    match e {
        BalanceEventType::MarginReserved => "margin_reserved",
        BalanceEventType::MarginReleased => "margin_released",
        BalanceEventType::RealizedPnl => "realized_pnl",
        BalanceEventType::Fee => "fee",
        BalanceEventType::Liquidation => "liquidation",
    }
}

fn balance_event_from_str(s: &str) -> Result<BalanceEventType, StoreError> {
    match s {
        "margin_reserved" => Ok(BalanceEventType::MarginReserved),
        "margin_released" => Ok(BalanceEventType::MarginReleased),
        "realized_pnl" => Ok(BalanceEventType::RealizedPnl),
        "fee" => Ok(BalanceEventType::Fee),
        "liquidation" => Ok(BalanceEventType::Liquidation),
        other => Err(StoreError::Serialization(format!("unknown balance event type '{other}'"))),
    }
}

pub struct SqliteLedgerStore {
    db: Database,
}

impl SqliteLedgerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn latest_balance(&self, account_id: &str) -> Result<f64, StoreError> {
        let row: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT balance_after FROM account_balance_events
            WHERE account_id = ?1 ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row.map(|(b,)| b).unwrap_or(0.0))
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        let row: Option<PositionRow> = sqlx::query_as(
            r#"
            SELECT id, status, direction, entry_price, exit_price, margin_required,
                   realized_pnl, opened_at, closed_at
            FROM positions WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(PositionRow::into_domain).transpose()
    }

    async fn position_events(&self, id: Uuid) -> Result<Vec<PositionEvent>, StoreError> {
        let rows: Vec<PositionEventRow> = sqlx::query_as(
            r#"
            SELECT id, position_id, event_type, payload, timestamp
            FROM position_events WHERE position_id = ?1 ORDER BY timestamp ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(PositionEventRow::into_domain).collect()
    }

    async fn account_events(&self, account_id: &str) -> Result<Vec<BalanceEvent>, StoreError> {
        let rows: Vec<BalanceEventRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, event_type, position_id, amount, balance_before,
                   balance_after, timestamp
            FROM account_balance_events WHERE account_id = ?1 ORDER BY timestamp ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(BalanceEventRow::into_domain).collect()
    }

    async fn apply_position_write(
        &self,
        position: &Position,
        position_events: &[PositionEvent],
        balance_events: &[BalanceEvent],
    ) -> Result<(), LedgerError> {
        for be in balance_events {
            if !be.satisfies_equation() {
                return Err(LedgerError::BalanceEquationViolated {
                    balance_before: be.balance_before,
                    amount: be.amount,
                    balance_after: be.balance_after,
                });
            }
        }

        let mut tx = self.db.pool.begin().await.map_err(StoreError::from)?;

        // Chain-continuity: each account's first event in this batch must continue from the
        // latest persisted `balance_after` for that account, and every subsequent event in the
        // batch must continue from the one before it.
        let mut last_balance_by_account: std::collections::HashMap<String, f64> =
            std::collections::HashMap::new();
        for be in balance_events {
            let expected = if let Some(prev) = last_balance_by_account.get(&be.account_id) {
                *prev
            } else {
                let row: Option<(f64,)> = sqlx::query_as(
                    r#"
                    SELECT balance_after FROM account_balance_events
                    WHERE account_id = ?1 ORDER BY timestamp DESC LIMIT 1
                    "#,
                )
                .bind(&be.account_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::from)?;
                row.map(|(b,)| b).unwrap_or(0.0)
            };

            if (be.balance_before - expected).abs() > crate::domain::ledger::BALANCE_TOLERANCE {
                return Err(LedgerError::ChainBroken {
                    expected,
                    actual: be.balance_before,
                });
            }
            last_balance_by_account.insert(be.account_id.clone(), be.balance_after);
        }

        sqlx::query(
            r#"
            INSERT INTO positions
                (id, status, direction, entry_price, exit_price, margin_required,
                 realized_pnl, opened_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                exit_price = excluded.exit_price,
                realized_pnl = excluded.realized_pnl,
                closed_at = excluded.closed_at
            "#,
        )
        .bind(position.id.to_string())
        .bind(status_to_str(position.status))
        .bind(direction_to_str(position.direction))
        .bind(position.entry_price)
        .bind(position.exit_price)
        .bind(position.margin_required)
        .bind(position.realized_pnl)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        for pe in position_events {
            sqlx::query(
                r#"
                INSERT INTO position_events (id, position_id, event_type, payload, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(pe.id.to_string())
            .bind(pe.position_id.to_string())
            .bind(position_event_to_str(pe.event_type))
            .bind(pe.payload.to_string())
            .bind(pe.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }

        for be in balance_events {
            sqlx::query(
                r#"
                INSERT INTO account_balance_events
                    (id, account_id, event_type, position_id, amount, balance_before,
                     balance_after, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(be.id.to_string())
            .bind(&be.account_id)
            .bind(balance_event_to_str(be.event_type))
            .bind(be.position_id.map(|p| p.to_string()))
            .bind(be.amount)
            .bind(be.balance_before)
            .bind(be.balance_after)
            .bind(be.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: String,
    status: String,
    direction: String,
    entry_price: f64,
    exit_price: Option<f64>,
    margin_required: f64,
    realized_pnl: Option<f64>,
    opened_at: i64,
    closed_at: Option<i64>,
}

impl PositionRow {
    fn into_domain(self) -> Result<Position, StoreError> {
        Ok(Position {
            id: Uuid::parse_str(&self.id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            status: status_from_str(&self.status)?,
            direction: direction_from_str(&self.direction)?,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            margin_required: self.margin_required,
            realized_pnl: self.realized_pnl,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PositionEventRow {
    id: String,
    position_id: String,
    event_type: String,
    payload: String,
    timestamp: i64,
}

impl PositionEventRow {
    fn into_domain(self) -> Result<PositionEvent, StoreError> {
        Ok(PositionEvent {
            id: Uuid::parse_str(&self.id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            position_id: Uuid::parse_str(&self.position_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            event_type: position_event_from_str(&self.event_type)?,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            timestamp: self.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BalanceEventRow {
    id: String,
    account_id: String,
    event_type: String,
    position_id: Option<String>,
    amount: f64,
    balance_before: f64,
    balance_after: f64,
    timestamp: i64,
}

impl BalanceEventRow {
    fn into_domain(self) -> Result<BalanceEvent, StoreError> {
        Ok(BalanceEvent {
            id: Uuid::parse_str(&self.id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            account_id: self.account_id,
            event_type: balance_event_from_str(&self.event_type)?,
            position_id: self
                .position_id
                .map(|p| Uuid::parse_str(&p))
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            timestamp: self.timestamp,
        })
    }
}
