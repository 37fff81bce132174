use async_trait::async_trait;

use crate::domain::ticket::{TicketKey, TicketRecord};
use crate::error::AppResult;

#[async_trait]
pub trait IssueTrackerService: Send + Sync {
    /// Fetches summary, description and the string-valued custom fields.
    async fn fetch_ticket(&self, key: &TicketKey) -> AppResult<TicketRecord>;
}
