//! Position Lifecycle & Ledger. Each command is one atomic call into
//! `LedgerStore::apply_position_write`, so a crash between the position row and its balance
//! events can never happen; `open`/`fill` bring a position to `Open`, `close`/`liquidate` take
//! it to `Closed`, each emitting the full event coverage required for that status.

use crate::domain::errors::LedgerError;
use crate::domain::ledger::{
    BalanceEvent, BalanceEventType, Position, PositionEvent, PositionEventType, PositionStatus,
};
use crate::domain::ports::LedgerStore;
use crate::domain::strategy::Direction;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct LedgerLifecycle {
    store: Arc<dyn LedgerStore>,
}

impl LedgerLifecycle {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Creates a pending position. No balance events yet; margin is only reserved once `fill`
    /// confirms execution.
    pub async fn open(
        &self,
        direction: Direction,
        entry_price: f64,
        margin_required: f64,
        timestamp: i64,
    ) -> Result<Position, LedgerError> {
        let position_id = Uuid::new_v4();
        let position = Position {
            id: position_id,
            status: PositionStatus::Pending,
            direction,
            entry_price,
            exit_price: None,
            margin_required,
            realized_pnl: None,
            opened_at: timestamp,
            closed_at: None,
        };

        let position_events = vec![PositionEvent {
            id: Uuid::new_v4(),
            position_id,
            event_type: PositionEventType::PositionCreated,
            payload: json!({"direction": direction == Direction::Buy, "entry_price": entry_price}),
            timestamp,
        }];

        self.store.apply_position_write(&position, &position_events, &[]).await?;
        info!("ledger: opened pending position {position_id}");
        Ok(position)
    }

    /// Confirms execution: transitions `Pending -> Open`, reserves margin against the account.
    pub async fn fill(
        &self,
        account_id: &str,
        position_id: Uuid,
        timestamp: i64,
    ) -> Result<Position, LedgerError> {
        let mut position = self
            .store
            .get_position(position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if position.status != PositionStatus::Pending {
            return Err(LedgerError::InvalidTransition(
                position_id,
                position.status,
                PositionStatus::Pending,
            ));
        }

        position.status = PositionStatus::Open;

        let balance_before = self.store.latest_balance(account_id).await?;
        let balance_after = balance_before - position.margin_required;

        let position_events = vec![
            PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::OrderFilled,
                payload: json!({"entry_price": position.entry_price}),
                timestamp,
            },
            PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::MarginReserved,
                payload: json!({"margin_required": position.margin_required}),
                timestamp,
            },
        ];

        let balance_events = vec![BalanceEvent {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            event_type: BalanceEventType::MarginReserved,
            position_id: Some(position_id),
            amount: -position.margin_required,
            balance_before,
            balance_after,
            timestamp,
        }];

        self.store
            .apply_position_write(&position, &position_events, &balance_events)
            .await?;
        info!("ledger: filled position {position_id}, margin reserved={}", position.margin_required);
        Ok(position)
    }

    /// Normal close at a market exit price: releases margin and realizes pnl.
    pub async fn close(
        &self,
        account_id: &str,
        position_id: Uuid,
        exit_price: f64,
        timestamp: i64,
    ) -> Result<Position, LedgerError> {
        self.close_internal(account_id, position_id, exit_price, timestamp, None)
            .await
    }

    /// Forced close on a margin breach. Identical bookkeeping to `close`, plus an optional fee
    /// debited from the account and a `Liquidation`-typed balance event instead of
    /// `RealizedPnl` for the pnl leg, so downstream reporting can distinguish forced exits.
    pub async fn liquidate(
        &self,
        account_id: &str,
        position_id: Uuid,
        liquidation_price: f64,
        fee: f64,
        timestamp: i64,
    ) -> Result<Position, LedgerError> {
        self.close_internal(account_id, position_id, liquidation_price, timestamp, Some(fee))
            .await
    }

    async fn close_internal(
        &self,
        account_id: &str,
        position_id: Uuid,
        exit_price: f64,
        timestamp: i64,
        liquidation_fee: Option<f64>,
    ) -> Result<Position, LedgerError> {
        let mut position = self
            .store
            .get_position(position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if position.status != PositionStatus::Open {
            return Err(LedgerError::InvalidTransition(
                position_id,
                position.status,
                PositionStatus::Open,
            ));
        }

        let pnl = match position.direction {
            Direction::Buy => exit_price - position.entry_price,
            Direction::Sell => position.entry_price - exit_price,
        };

        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.realized_pnl = Some(pnl);
        position.closed_at = Some(timestamp);

        let mut position_events = vec![
            PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::PositionClosed,
                payload: json!({"exit_price": exit_price}),
                timestamp,
            },
            PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::MarginReleased,
                payload: json!({"margin_released": position.margin_required}),
                timestamp,
            },
            PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::PnlRealized,
                payload: json!({"pnl": pnl}),
                timestamp,
            },
        ];

        let mut balance = self.store.latest_balance(account_id).await?;
        let mut balance_events = Vec::with_capacity(3);

        let release_before = balance;
        balance += position.margin_required;
        balance_events.push(BalanceEvent {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            event_type: BalanceEventType::MarginReleased,
            position_id: Some(position_id),
            amount: position.margin_required,
            balance_before: release_before,
            balance_after: balance,
            timestamp,
        });

        let pnl_event_type = if liquidation_fee.is_some() {
            BalanceEventType::Liquidation
        } else {
            BalanceEventType::RealizedPnl
        };
        let pnl_before = balance;
        balance += pnl;
        balance_events.push(BalanceEvent {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            event_type: pnl_event_type,
            position_id: Some(position_id),
            amount: pnl,
            balance_before: pnl_before,
            balance_after: balance,
            timestamp,
        });

        if let Some(fee) = liquidation_fee {
            let fee_before = balance;
            balance -= fee;
            balance_events.push(BalanceEvent {
                id: Uuid::new_v4(),
                account_id: account_id.to_string(),
                event_type: BalanceEventType::Fee,
                position_id: Some(position_id),
                amount: -fee,
                balance_before: fee_before,
                balance_after: balance,
                timestamp,
            });
            position_events.push(PositionEvent {
                id: Uuid::new_v4(),
                position_id,
                event_type: PositionEventType::PnlRealized,
                payload: json!({"liquidation_fee": fee}),
                timestamp,
            });
        }

        self.store
            .apply_position_write(&position, &position_events, &balance_events)
            .await?;
        info!(
            "ledger: closed position {position_id} exit_price={exit_price} pnl={pnl} liquidated={}",
            liquidation_fee.is_some()
        );
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeLedgerStore {
        positions: Mutex<std::collections::HashMap<Uuid, Position>>,
        balances: Mutex<std::collections::HashMap<String, f64>>,
    }

    impl FakeLedgerStore {
        fn new() -> Self {
            Self {
                positions: Mutex::new(std::collections::HashMap::new()),
                balances: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for FakeLedgerStore {
        async fn latest_balance(&self, account_id: &str) -> Result<f64, StoreError> {
            Ok(*self.balances.lock().unwrap().get(account_id).unwrap_or(&10_000.0))
        }

        async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
            Ok(self.positions.lock().unwrap().get(&id).cloned())
        }

        async fn position_events(&self, _id: Uuid) -> Result<Vec<PositionEvent>, StoreError> {
            Ok(vec![])
        }

        async fn account_events(&self, _account_id: &str) -> Result<Vec<BalanceEvent>, StoreError> {
            Ok(vec![])
        }

        async fn apply_position_write(
            &self,
            position: &Position,
            _position_events: &[PositionEvent],
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
                self.balances.lock().unwrap().insert(be.account_id.clone(), be.balance_after);
            }
            self.positions.lock().unwrap().insert(position.id, position.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn open_fill_close_cycle_realizes_pnl() {
        let store = Arc::new(FakeLedgerStore::new());
        let lifecycle = LedgerLifecycle::new(store.clone());

        let position = lifecycle.open(Direction::Buy, 2000.0, 200.0, 0).await.unwrap();
        assert_eq!(position.status, PositionStatus::Pending);

        let filled = lifecycle.fill("acct1", position.id, 1).await.unwrap();
        assert_eq!(filled.status, PositionStatus::Open);
        assert_eq!(store.latest_balance("acct1").await.unwrap(), 9_800.0);

        let closed = lifecycle.close("acct1", position.id, 2010.0, 2).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, Some(10.0));
        assert_eq!(store.latest_balance("acct1").await.unwrap(), 10_010.0);
    }

    #[tokio::test]
    async fn fill_rejects_non_pending_position() {
        let store = Arc::new(FakeLedgerStore::new());
        let lifecycle = LedgerLifecycle::new(store.clone());

        let position = lifecycle.open(Direction::Buy, 2000.0, 200.0, 0).await.unwrap();
        lifecycle.fill("acct1", position.id, 1).await.unwrap();

        let result = lifecycle.fill("acct1", position.id, 2).await;
        assert!(matches!(result, Err(LedgerError::InvalidTransition(_, _, _))));
    }
}
