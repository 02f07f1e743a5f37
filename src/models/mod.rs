//! Domain models for site monitoring and check history.

mod check;
mod site;

pub use check::{
    ChangeReason, ChangeVerdict, ChannelKind, CheckRecord, FetchMethod, NotificationOutcome,
};
pub use site::{MonitoredSite, NewSite, Recipient};

pub(crate) use site::{keywords_from_column, keywords_to_column, PREVIEW_LEN};
