use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::cache::ResultCache;
use crate::collab::{
    LogNotifier, RecordingBus, RuleSet, StaticPage, StaticSession, SystemClipboard,
};
use crate::config;
use crate::gateway::{ClientConfig, HttpGateway};
use crate::history::MemoryHistory;
use crate::markup;
use crate::session::{Collaborators, OverlaySession, PaneState, SessionSettings};
use crate::target::PreviewTarget;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub link: String,
    pub config_file: Option<PathBuf>,
    /// Copy the post's canonical link to the clipboard after loading.
    pub copy_link: bool,
}

/// Headless preview: opens one overlay session against the live site and prints what
/// both panes end up showing.
pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("config: load")?;

    let link = absolute_link(&cfg.http.base_url, &options.link);
    let target = PreviewTarget::from_link(&link)
        .with_context(|| format!("preview: not a post link: {}", options.link))?;

    let session_provider = Arc::new(StaticSession::new("", ""));
    let gateway = HttpGateway::new(
        ClientConfig {
            base_url: cfg.http.base_url.clone(),
            user_agent: cfg.http.user_agent.clone(),
            timeout: Some(cfg.http.timeout),
            http_client: None,
        },
        session_provider.clone(),
    )
    .context("gateway: build client")?;

    let deps = Collaborators {
        gateway: Arc::new(gateway),
        cache: Arc::new(Mutex::new(ResultCache::new(cfg.tuning.cache_capacity))),
        block: Arc::new(RuleSet::new()),
        bus: Arc::new(RecordingBus::default()),
        notifier: Arc::new(LogNotifier),
        page: Arc::new(StaticPage::default()),
    };
    let history = MemoryHistory::new(&cfg.http.base_url, "gall-preview");
    let mut session =
        OverlaySession::new(deps, SessionSettings::from_config(&cfg), Box::new(history));

    let wait = cfg.http.timeout * 2;
    session.open(target, false);
    if !session.settle(wait) {
        log::warn!("preview: timed out waiting for {}", link);
    }

    // The comment endpoint wants the secret embedded in the post page.
    let secret = session
        .post()
        .loaded()
        .and_then(|view| view.record.form_secret());
    if let Some(secret) = secret {
        session_provider.set_page_secret(secret);
        session.retry_comments(false);
        session.settle(wait);
    }

    print_session(&session);
    if options.copy_link {
        let mut clipboard = SystemClipboard::new()?;
        session.share(&mut clipboard)?;
    }
    session.close();
    Ok(())
}

fn absolute_link(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), link.trim_start_matches('/'))
    }
}

fn print_session(session: &OverlaySession) {
    match session.post() {
        PaneState::Loaded(view) => {
            let record = &view.record;
            let header = record
                .header
                .as_deref()
                .map(|h| format!("[{h}] "))
                .unwrap_or_default();
            println!("{header}{}", view.title());
            println!(
                "{} | {} | {}",
                record.author.display(),
                record.date.as_deref().unwrap_or("-"),
                record.views_label().unwrap_or_default()
            );
            println!(
                "추천 {} / 비추천 {}",
                view.upvotes.as_deref().unwrap_or("0"),
                view.downvotes.as_deref().unwrap_or("0")
            );
            println!();
            println!("{}", markup::strip_tags(&view.body_html));
        }
        PaneState::Failed(err) => println!("{}: {}", err.title, err.detail),
        _ => println!("(post not loaded)"),
    }

    println!();
    match session.comments() {
        PaneState::Loaded(view) => {
            println!("댓글 {}", view.subtitle);
            for entry in &view.thread.entries {
                let indent = "  ".repeat(entry.depth as usize);
                let body = match &entry.media_reference {
                    Some(_) => "(dccon)".to_string(),
                    None => markup::strip_tags(&entry.body_html),
                };
                println!("{indent}{}: {body}", entry.author.display());
            }
        }
        PaneState::Failed(err) => println!("{}: {}", err.title, err.detail),
        _ => println!("(comments not loaded)"),
    }
}
