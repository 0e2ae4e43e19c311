use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use lms_realtime::api::{DiscussionRole, HttpLmsApi, LmsApi};
use lms_realtime::discussion::{
    replace_mention_token, DiscussionEngine, DiscussionHandle, DiscussionMessage, DiscussionView,
};
use lms_realtime::notifications::{NotificationEngine, NotificationHandle, NotificationView};
use lms_realtime::session::SessionStore;
use lms_realtime::sync::{DiscussionSync, FocusEvents, NotificationSync};
use lms_realtime::transport::{ConnectionState, StompTransport, TransportSettings};
use lms_realtime::{Config, SyncError};

#[derive(Parser, Debug)]
#[command(name = "lms-realtime")]
#[command(about = "Live notifications and course discussions for the LMS")]
struct Cli {
    /// Config file (default: ~/.lms-realtime/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for this crate (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Notification feed
    Notifications {
        #[command(subcommand)]
        command: NotificationCommand,
    },
    /// Course discussion threads
    Discussion {
        #[command(subcommand)]
        command: DiscussionCommand,
    },
    /// Stored login session
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand, Debug)]
enum NotificationCommand {
    /// Follow the live feed (SIGUSR1 forces a refresh while offline)
    Watch,
    /// Mark one notification read
    MarkRead { id: i64 },
    /// Mark every unread notification read
    MarkAll,
}

#[derive(clap::Args, Debug)]
struct CourseArgs {
    /// Course id
    #[arg(long)]
    course: i64,

    /// Discussion side; defaults to the stored session's role
    #[arg(long)]
    role: Option<DiscussionRole>,
}

#[derive(Subcommand, Debug)]
enum DiscussionCommand {
    /// Follow a course discussion live
    Watch {
        #[command(flatten)]
        course: CourseArgs,
    },
    /// Post a new thread or a reply
    Post {
        #[command(flatten)]
        course: CourseArgs,
        /// Reply to this message
        #[arg(long)]
        parent: Option<i64>,
        content: String,
    },
    /// Toggle the pin on a thread (instructor)
    Pin {
        #[command(flatten)]
        course: CourseArgs,
        message_id: i64,
    },
    /// Toggle best answer on a reply (instructor)
    BestAnswer {
        #[command(flatten)]
        course: CourseArgs,
        message_id: i64,
    },
    /// Suggest completions for the trailing @mention of a draft
    Mentions {
        #[command(flatten)]
        course: CourseArgs,
        draft: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Print the stored session
    Show,
    /// Forget the stored session
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    let sessions = SessionStore::in_dir(&config.config_dir);

    let result = match cli.command {
        Command::Notifications { command } => run_notifications(&config, command).await,
        Command::Discussion { command } => run_discussion(&config, &sessions, command).await,
        Command::Session { command } => run_session(&sessions, command),
    };

    if let Err(e) = &result {
        if let Some(SyncError::AccountBlocked(status)) = e.downcast_ref::<SyncError>() {
            sessions
                .update_status(*status)
                .context("failed to record account status")?;
            tracing::warn!(status = %status, "Stored session marked as blocked");
        }
    }
    result
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lms_realtime=debug" } else { "lms_realtime=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn http_api(config: &Config) -> Result<Arc<dyn LmsApi>> {
    Ok(Arc::new(HttpLmsApi::new(config).context("failed to build HTTP client")?))
}

fn push_channel(config: &Config) -> Arc<StompTransport> {
    Arc::new(StompTransport::new(TransportSettings::from_config(config)))
}

// ── Notifications ────────────────────────────────────────────────

async fn run_notifications(config: &Config, command: NotificationCommand) -> Result<()> {
    if let NotificationCommand::Watch = command {
        return watch_notifications(config).await;
    }

    let cancel = CancellationToken::new();
    let handle = NotificationEngine::spawn(http_api(config)?, cancel.clone());
    let result = notification_action(&handle, command).await;
    cancel.cancel();
    result
}

async fn notification_action(
    handle: &NotificationHandle,
    command: NotificationCommand,
) -> Result<()> {
    handle.load_snapshot().await?;
    match command {
        NotificationCommand::MarkRead { id } => {
            if !is_unread(&handle.view(), id)? {
                println!("#{id} is already read");
                return Ok(());
            }
            handle.mark_read(id).await?;
            println!("Marked #{id} read ({} unread)", handle.view().unread_count);
        }
        NotificationCommand::MarkAll => {
            let n = handle.mark_all_read().await?;
            println!("Marked {n} notification(s) read");
        }
        NotificationCommand::Watch => {}
    }
    Ok(())
}

/// Whether `id` is in the feed and still unread. Marking an entry that is
/// already read would drop the local count below the server's.
fn is_unread(view: &NotificationView, id: i64) -> Result<bool> {
    match view.items.iter().find(|n| n.id == id) {
        Some(n) => Ok(!n.read),
        None => bail!("notification #{id} not found"),
    }
}

async fn watch_notifications(config: &Config) -> Result<()> {
    let focus = FocusEvents::new();
    let sync = NotificationSync::start(
        http_api(config)?,
        push_channel(config),
        &focus,
        config.polling.interval(),
    );
    spawn_focus_signal(focus.clone())?;

    let mut views = sync.handle().subscribe();
    let mut state = sync.connection_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                print_notifications(&views.borrow_and_update());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                print_state(*state.borrow_and_update());
            }
        }
    }

    sync.shutdown();
    Ok(())
}

fn print_notifications(view: &NotificationView) {
    if view.loading {
        println!("Loading notifications...");
        return;
    }
    println!("── Notifications [{}] ──", view.badge_text());
    if view.items.is_empty() {
        println!("  (none)");
    }
    for n in view.preview() {
        let marker = if n.read { ' ' } else { '*' };
        println!(
            "{marker} #{:<6} {:<18} {}  ({})",
            n.id,
            n.event_type,
            n.message,
            n.created_at.format("%b %d %H:%M")
        );
    }
    if view.items.len() > view.preview().len() {
        println!("  … {} more", view.items.len() - view.preview().len());
    }
}

fn print_state(state: ConnectionState) {
    match state {
        ConnectionState::Connected => println!("[live]"),
        ConnectionState::Connecting => println!("[connecting]"),
        ConnectionState::Disconnected => println!("[offline, polling]"),
    }
}

// ── Discussion ───────────────────────────────────────────────────

fn resolve_role(args: &CourseArgs, sessions: &SessionStore) -> Result<DiscussionRole> {
    if let Some(role) = args.role {
        return Ok(role);
    }
    let Some(user) = sessions.load() else {
        bail!("no stored session; pass --role student|instructor");
    };
    match DiscussionRole::from_user_role(user.role) {
        Some(role) => Ok(role),
        None => bail!("{:?} accounts have no discussion view; pass --role", user.role),
    }
}

async fn run_discussion(
    config: &Config,
    sessions: &SessionStore,
    command: DiscussionCommand,
) -> Result<()> {
    let course = match &command {
        DiscussionCommand::Watch { course }
        | DiscussionCommand::Post { course, .. }
        | DiscussionCommand::Pin { course, .. }
        | DiscussionCommand::BestAnswer { course, .. }
        | DiscussionCommand::Mentions { course, .. } => course,
    };
    let course_id = course.course;
    let role = resolve_role(course, sessions)?;

    if let DiscussionCommand::Watch { .. } = command {
        return watch_discussion(config, course_id, role).await;
    }

    let cancel = CancellationToken::new();
    let handle = DiscussionEngine::spawn(http_api(config)?, course_id, role, cancel.clone());
    let result = discussion_action(&handle, command).await;
    cancel.cancel();
    result
}

async fn discussion_action(handle: &DiscussionHandle, command: DiscussionCommand) -> Result<()> {
    handle.load_thread(true).await?;
    let view = handle.view();

    match command {
        DiscussionCommand::Post { parent, content, .. } => {
            if let Some(parent_id) = parent {
                if view.find(parent_id).is_none() {
                    bail!("message #{parent_id} not found in course {}", handle.course_id());
                }
            }
            handle.post_message(&content, parent).await?;
            println!("Posted ({} messages)", handle.view().message_count());
        }
        DiscussionCommand::Pin { message_id, .. } => {
            match view.find(message_id) {
                Some(m) if m.is_root() => {}
                Some(_) => bail!("only thread roots can be pinned"),
                None => bail!("message #{message_id} not found"),
            }
            handle.toggle_pin(message_id).await?;
            println!("Toggled pin on #{message_id}");
        }
        DiscussionCommand::BestAnswer { message_id, .. } => {
            match view.find(message_id) {
                Some(m) if !m.is_root() => {}
                Some(_) => bail!("only replies can be marked best answer"),
                None => bail!("message #{message_id} not found"),
            }
            handle.toggle_best_answer(message_id).await?;
            println!("Toggled best answer on #{message_id}");
        }
        DiscussionCommand::Mentions { draft, .. } => {
            let suggestions = view.mention_suggestions(&draft);
            if suggestions.is_empty() {
                println!("(no suggestions)");
            }
            for name in &suggestions {
                println!("{name}\t→ {}", replace_mention_token(&draft, name));
            }
        }
        DiscussionCommand::Watch { .. } => {}
    }
    Ok(())
}

async fn watch_discussion(config: &Config, course_id: i64, role: DiscussionRole) -> Result<()> {
    let focus = FocusEvents::new();
    let sync = DiscussionSync::start(
        http_api(config)?,
        push_channel(config),
        &focus,
        config.polling.interval(),
        course_id,
        role,
    );
    spawn_focus_signal(focus.clone())?;

    let mut views = sync.handle().subscribe();
    let mut state = sync.connection_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                print_discussion(&views.borrow_and_update());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                print_state(*state.borrow_and_update());
            }
        }
    }

    sync.shutdown();
    Ok(())
}

fn print_discussion(view: &DiscussionView) {
    if view.loading {
        println!("Loading discussion...");
        return;
    }
    println!("── Discussion ({} messages) ──", view.message_count());
    for thread in &view.threads {
        print_message(thread, 0);
    }
}

fn print_message(message: &DiscussionMessage, depth: usize) {
    let mut badges = String::new();
    if message.pinned {
        badges.push_str(" [pinned]");
    }
    if message.best_answer {
        badges.push_str(" [best answer]");
    }
    println!(
        "{:indent$}#{} {} · {}{}",
        "",
        message.id,
        message.sender_name,
        message.created_at.format("%b %d %H:%M"),
        badges,
        indent = depth * 2
    );
    println!("{:indent$}  {}", "", message.content, indent = depth * 2);
    for reply in &message.replies {
        print_message(reply, depth + 1);
    }
}

// ── Session ──────────────────────────────────────────────────────

fn run_session(sessions: &SessionStore, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Show => match sessions.load() {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => println!("No stored session ({})", sessions.path().display()),
        },
        SessionCommand::Clear => {
            sessions.clear();
            println!("Session cleared");
        }
    }
    Ok(())
}

// ── Focus ────────────────────────────────────────────────────────

/// `SIGUSR1` stands in for a window regaining focus.
#[cfg(unix)]
fn spawn_focus_signal(focus: FocusEvents) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 =
        signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            tracing::debug!("Focus regained");
            focus.notify();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_focus_signal(_focus: FocusEvents) -> Result<()> {
    Ok(())
}
