//! Command implementations.

pub mod export;
pub mod ids;
pub mod migrate;
pub mod prune;
pub mod stats;

use chat_archive::MessageFilter;
use clap::Args;

/// Flags that narrow the selected messages.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only messages in this channel (repeatable)
    #[arg(long = "channel")]
    pub channels: Vec<i64>,

    /// Only messages sent by this user (repeatable)
    #[arg(long = "user")]
    pub users: Vec<i64>,

    /// Only this message (repeatable)
    #[arg(long = "message")]
    pub messages: Vec<i64>,

    /// Only messages at or after this timestamp
    #[arg(long)]
    pub after: Option<i64>,

    /// Only messages at or before this timestamp
    #[arg(long)]
    pub before: Option<i64>,

    /// Only messages that have (true) or lack (false) attachments
    #[arg(long)]
    pub with_attachments: Option<bool>,
}

impl FilterArgs {
    /// The filter these flags describe; `None` when no flag was given.
    pub fn to_filter(&self) -> Option<MessageFilter> {
        let mut filter = MessageFilter::new().with_time_range(self.after, self.before);
        if !self.channels.is_empty() {
            filter = filter.with_channel_ids(self.channels.iter().copied());
        }
        if !self.users.is_empty() {
            filter = filter.with_user_ids(self.users.iter().copied());
        }
        if !self.messages.is_empty() {
            filter = filter.with_message_ids(self.messages.iter().copied());
        }
        if let Some(present) = self.with_attachments {
            filter = filter.with_attachments(present);
        }

        (!filter.is_empty()).then_some(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_means_no_filter() {
        assert_eq!(FilterArgs::default().to_filter(), None);
    }

    #[test]
    fn test_flags_build_filter() {
        let args = FilterArgs {
            channels: vec![10, 11],
            after: Some(5),
            with_attachments: Some(false),
            ..FilterArgs::default()
        };
        let filter = args.to_filter().unwrap();

        assert_eq!(filter.channel_ids, Some([10, 11].into_iter().collect()));
        assert_eq!(filter.after, Some(5));
        assert_eq!(filter.before, None);
        assert_eq!(filter.user_ids, None);
        assert_eq!(filter.has_attachments, Some(false));
    }
}
