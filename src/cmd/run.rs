use crate::context::AppContext;
use crate::domain::run::RunOutcome;
use crate::domain::ticket::TicketKey;
use crate::error::AppResult;
use crate::workflow::run::run_ticket;

#[derive(Debug, Clone)]
pub struct RunCommandArgs {
    pub ticket: String,
}

pub async fn run(ctx: &AppContext, args: RunCommandArgs) -> AppResult<RunOutcome> {
    let key = TicketKey::parse(&args.ticket)?;
    run_ticket(ctx, &key).await
}
