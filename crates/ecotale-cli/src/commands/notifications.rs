//! Notification inbox commands.

use clap::Subcommand;
use uuid::Uuid;

use super::{print_json, CliResult, Session};

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// List notifications, newest first
    List {
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },
    /// Mark one notification as read
    Read {
        /// Notification ID
        id: String,
    },
    /// Mark every notification as read
    ReadAll,
    /// Remove expired notifications
    Prune,
    /// Remove all notifications
    Clear,
}

pub fn run(action: NotificationsAction) -> CliResult {
    let Session { mut tracker, .. } = Session::open()?;
    let center = tracker.notifications_mut();

    match action {
        NotificationsAction::List { unread } => {
            let list: Vec<_> = center
                .list()
                .iter()
                .filter(|n| !unread || !n.read)
                .collect();
            eprintln!("{} unread", center.unread_count());
            print_json(&list)?;
        }
        NotificationsAction::Read { id } => {
            let id = Uuid::parse_str(&id)?;
            center.mark_as_read(id);
            println!("ok");
        }
        NotificationsAction::ReadAll => {
            center.mark_all_as_read();
            println!("ok");
        }
        NotificationsAction::Prune => {
            let removed = center.remove_expired();
            println!("{removed} expired notification(s) removed");
        }
        NotificationsAction::Clear => {
            center.clear_all();
            println!("notifications cleared");
        }
    }
    Ok(())
}
