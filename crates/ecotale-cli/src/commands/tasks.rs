//! Task commands for CLI.

use clap::Subcommand;

use super::{print_json, CliResult, Session};

#[derive(Subcommand)]
pub enum TasksAction {
    /// List tasks
    List {
        /// Only tasks that have not expired
        #[arg(long)]
        active: bool,
    },
    /// Create today's and this week's tasks if missing
    Generate,
}

pub fn run(action: TasksAction) -> CliResult {
    let Session { mut tracker, .. } = Session::open()?;

    match action {
        TasksAction::List { active } => {
            if active {
                print_json(&tracker.tasks().active_tasks())?;
            } else {
                print_json(tracker.tasks().tasks())?;
            }
        }
        TasksAction::Generate => {
            let created = tracker.generate_tasks();
            eprintln!("{} task(s) created", created.len());
            print_json(&tracker.tasks().active_tasks())?;
        }
    }
    Ok(())
}
