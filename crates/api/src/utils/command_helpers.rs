//! Command execution helpers
//!
//! Every command the HTTP surface exposes runs through [`execute_command`] so
//! timing and failure labels are logged the same way.

use std::future::Future;
use std::time::Instant;

use ledgerlink_domain::Result as DomainResult;

use crate::utils::logging::log_command_execution;

/// Execute a command with automatic timing and logging
///
/// # Example
///
/// ```rust,ignore
/// pub async fn my_command(ctx: &AppContext, id: Uuid) -> Result<MyResponse> {
///     execute_command("my_module::my_command", || async {
///         ctx.some_service.do_something(id).await
///     })
///     .await
/// }
/// ```
pub async fn execute_command<F, Fut, T>(command_name: &str, command_fn: F) -> DomainResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DomainResult<T>>,
{
    let start = Instant::now();
    let result = command_fn().await;
    log_command_execution(command_name, start.elapsed(), result.as_ref().map(|_| ()));
    result
}
