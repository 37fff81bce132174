pub mod issue_tracker;
pub mod language_model;
pub mod pull_request;
pub mod reference;
pub mod version_control;

pub use issue_tracker::IssueTrackerService;
pub use language_model::LanguageModelService;
pub use pull_request::{PullRequestRequest, PullRequestService};
pub use reference::{ReferenceDocument, ReferenceFetcher};
pub use version_control::VersionControlService;
