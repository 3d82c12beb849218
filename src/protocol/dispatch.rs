// Two-level command dispatch table (spec §4.G): `(group, command) ->
// handler`, built once at startup and indexed directly on every request.

use crate::config::NodeConfig;
use crate::handlers;
use crate::locker::{LockerIndex, TradeLockerIndex};
use crate::oracle::PaymentOracle;
use crate::status::{group, Status};
use crate::store::CoinStore;
use crate::ticket::TicketPool;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Everything a handler needs, bundled so dispatch only threads one value.
pub struct HandlerContext {
    pub store: Arc<CoinStore>,
    pub tickets: Arc<TicketPool>,
    pub lockers: Arc<LockerIndex>,
    pub trade_lockers: Arc<TradeLockerIndex>,
    pub config: Arc<NodeConfig>,
    pub payment_oracle: Arc<dyn PaymentOracle>,
}

pub type HandlerFn = fn(Arc<HandlerContext>, Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)>;

const COMMANDS_PER_GROUP: usize = 16;

pub struct DispatchTable {
    table: Vec<[Option<HandlerFn>; COMMANDS_PER_GROUP]>,
}

impl DispatchTable {
    pub fn build() -> Self {
        let mut table = vec![[None; COMMANDS_PER_GROUP]; group::MAX_GROUP as usize + 1];

        use crate::status::{auth_cmd, change_cmd, executive_cmd, fs_cmd, healing_cmd, locker_cmd, shard_cmd};

        table[group::AUTH as usize][auth_cmd::ECHO as usize] = Some(handlers::info::echo as HandlerFn);
        table[group::AUTH as usize][auth_cmd::VERSION as usize] = Some(handlers::info::version as HandlerFn);
        table[group::AUTH as usize][auth_cmd::STATS as usize] = Some(handlers::info::stats as HandlerFn);
        table[group::AUTH as usize][auth_cmd::AUDIT as usize] = Some(handlers::info::audit as HandlerFn);
        table[group::AUTH as usize][auth_cmd::DETECT as usize] = Some(handlers::auth::detect as HandlerFn);
        table[group::AUTH as usize][auth_cmd::POWN as usize] = Some(handlers::auth::pown as HandlerFn);
        table[group::AUTH as usize][auth_cmd::FIND as usize] = Some(handlers::auth::find as HandlerFn);

        table[group::HEALING as usize][healing_cmd::GET_TICKET as usize] =
            Some(handlers::healing::get_ticket as HandlerFn);
        table[group::HEALING as usize][healing_cmd::VALIDATE_TICKET as usize] =
            Some(handlers::healing::validate_ticket as HandlerFn);
        table[group::HEALING as usize][healing_cmd::FIX as usize] = Some(handlers::healing::fix as HandlerFn);

        table[group::CHANGE as usize][change_cmd::GET_AVAILABLE_SNS as usize] =
            Some(handlers::change::get_available_change_sns as HandlerFn);
        table[group::CHANGE as usize][change_cmd::BREAK as usize] = Some(handlers::change::break_coin as HandlerFn);
        table[group::CHANGE as usize][change_cmd::JOIN as usize] = Some(handlers::change::join as HandlerFn);

        table[group::EXECUTIVE as usize][executive_cmd::GET_AVAILABLE_SNS as usize] =
            Some(handlers::executive::get_available_sns as HandlerFn);
        table[group::EXECUTIVE as usize][executive_cmd::CREATE_COINS as usize] =
            Some(handlers::executive::create_coins as HandlerFn);
        table[group::EXECUTIVE as usize][executive_cmd::FREE_COINS as usize] =
            Some(handlers::executive::free_coins as HandlerFn);
        table[group::EXECUTIVE as usize][executive_cmd::DELETE_COINS as usize] =
            Some(handlers::executive::delete_coins as HandlerFn);
        table[group::EXECUTIVE as usize][executive_cmd::GET_ALL_SNS as usize] =
            Some(handlers::executive::get_all_sns as HandlerFn);

        table[group::LOCKER as usize][locker_cmd::STORE_SUM as usize] =
            Some(handlers::locker::store_sum as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::REMOVE as usize] = Some(handlers::locker::remove as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::PEEK as usize] = Some(handlers::locker::peek as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::PUT_FOR_SALE as usize] =
            Some(handlers::locker::put_for_sale as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::LIST_LOCKERS_FOR_SALE as usize] =
            Some(handlers::locker::list_lockers_for_sale as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::BUY as usize] = Some(handlers::locker::buy as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::REMOVE_TRADE_LOCKER as usize] =
            Some(handlers::locker::remove_trade_locker as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::PEEK_TRADE_LOCKER as usize] =
            Some(handlers::locker::peek_trade_locker as HandlerFn);
        table[group::LOCKER as usize][locker_cmd::STORE_MULTIPLE_SUM as usize] =
            Some(handlers::locker::store_multiple_sum as HandlerFn);

        table[group::SHARD as usize][shard_cmd::PICKUP_COINS as usize] =
            Some(handlers::shard::pickup_coins as HandlerFn);
        table[group::SHARD as usize][shard_cmd::SWITCH_SHARD_SUM_WITH_SNS as usize] =
            Some(handlers::shard::switch_shard_sum_with_sns as HandlerFn);

        table[group::FILESYSTEM as usize][fs_cmd::GET_OBJECT as usize] =
            Some(handlers::filesystem::get_object as HandlerFn);
        table[group::FILESYSTEM as usize][fs_cmd::PUT_OBJECT as usize] =
            Some(handlers::filesystem::put_object as HandlerFn);
        table[group::FILESYSTEM as usize][fs_cmd::RM_OBJECT as usize] =
            Some(handlers::filesystem::rm_object as HandlerFn);

        Self { table }
    }

    /// Look up and invoke the handler for `(group, command)`. Out-of-range
    /// group or a missing handler both yield `INVALID_COMMAND`/`INVALID_GROUP`
    /// without ever calling into handler code (spec §4.G).
    pub async fn dispatch(
        &self,
        ctx: Arc<HandlerContext>,
        group: u8,
        command: u8,
        payload: Vec<u8>,
    ) -> (Status, Vec<u8>) {
        let Some(row) = self.table.get(group as usize) else {
            return (Status::InvalidGroup, Vec::new());
        };
        let Some(handler) = row.get(command as usize).copied().flatten() else {
            return (Status::InvalidCommand, Vec::new());
        };
        handler(ctx, payload).await
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_group_has_no_row() {
        let table = DispatchTable::build();
        assert!(table.table.get(250).is_none());
    }

    #[test]
    fn echo_is_registered() {
        let table = DispatchTable::build();
        assert!(table.table[group::AUTH as usize][auth_cmd_echo()].is_some());
    }

    fn auth_cmd_echo() -> usize {
        crate::status::auth_cmd::ECHO as usize
    }
}
