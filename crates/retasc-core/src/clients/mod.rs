//! External collaborators: HTTP transport, issue tracker, release schedules
//! and the cluster running pipeline jobs.

pub mod http_session;
pub mod jira;
pub mod openshift;
pub mod product_pages;

pub use http_session::HttpSession;
pub use jira::{Comment, DryRunJiraClient, Issue, IssueTracker, JiraClient, Transition};
pub use openshift::{DryRunOpenShiftClient, JobCluster, OpenShiftClient};
pub use product_pages::{Phase, ProductPagesApi, ScheduleSource, ScheduleTask};
