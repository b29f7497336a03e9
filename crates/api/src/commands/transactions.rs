//! Expected-transaction intake

use ledgerlink_domain::{NewTransactionRecord, Result, TransactionRecord};

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Register a transaction the business expects a provider to report
pub async fn register_transaction(
    ctx: &AppContext,
    request: NewTransactionRecord,
) -> Result<TransactionRecord> {
    execute_command("transactions::register_transaction", || ctx.engine.register_expected(request))
        .await
}
