use std::path::Path;

use crate::config::Config;
use crate::notification::Notification;

/// Destination folder for a notification, or `None` for an untracked chat.
pub fn resolve<'a>(notification: &Notification, config: &'a Config) -> Option<&'a Path> {
    config.resolve_destination(&notification.sender.chat_id)
}
