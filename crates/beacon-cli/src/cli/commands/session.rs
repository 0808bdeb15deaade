//! `beacon session`: sign in and keep the session alive.

use std::collections::HashSet;

use anyhow::{Context, Result};
use beacon_core::auth::{
    AuthStore, Credentials, GuardEffect, HttpAuthApi, RouteGuard, SessionSnapshot, TokenManager,
};
use beacon_core::config::Config;
use beacon_core::notifications::{NotificationCenter, Severity, Toast, ToastId, ToastOptions};

use crate::cli::InterruptedError;

/// Path the guard treats as the protected view.
const SESSION_PATH: &str = "/session";

pub async fn run(config: &Config, credentials: &Credentials, once: bool) -> Result<()> {
    let api = HttpAuthApi::new(&config.auth).context("build auth client")?;
    let manager = TokenManager::builder(api)
        .policy(config.auth.refresh_policy())
        .on_token_expired(|| tracing::info!("access token expired"))
        .build();
    let store = AuthStore::new(manager.clone());
    store.init();

    store
        .login(credentials)
        .await
        .with_context(|| format!("sign in as {}", credentials.email))?;
    println!("Signed in as {}", credentials.email);
    println!("{}", super::describe_validation(&manager.validate_token()));

    if once {
        store.logout().await;
        return Ok(());
    }

    let notifications = NotificationCenter::new(config.notifications.toast_config());
    let mut printed = HashSet::new();
    let mut guard = RouteGuard::new(config.auth.fallback_path.clone(), SESSION_PATH);
    let mut auth_updates = store.subscribe();
    let mut session = manager.subscribe();
    let mut toasts = notifications.subscribe();
    let mut watch = SessionWatch {
        last_expiry: manager.snapshot().expires_at,
        failed: false,
    };

    let mount = guard.mount(&store).await;
    let mut ended = apply_effects(&notifications, mount);
    auth_updates.borrow_and_update();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while ended.is_none() {
        tokio::select! {
            _ = &mut ctrl_c => {
                interrupted = true;
                break;
            }
            effects = guard.next_effects(&mut auth_updates) => {
                let Some(effects) = effects else { break };
                ended = apply_effects(&notifications, effects);
            }
            Ok(()) = session.changed() => {
                let snapshot = session.borrow_and_update().clone();
                watch.announce(&notifications, &snapshot);
            }
            Ok(()) = toasts.changed() => {
                let list = toasts.borrow_and_update().clone();
                print_new(&list, &mut printed);
            }
        }
    }

    print_new(&notifications.snapshot(), &mut printed);
    store.logout().await;
    store.dispose();

    match ended {
        Some(target) => anyhow::bail!("Session ended; sign in again at {target}"),
        None if interrupted => Err(InterruptedError.into()),
        None => Ok(()),
    }
}

/// Shows notifications; returns the redirect target if the session ended.
fn apply_effects(notifications: &NotificationCenter, effects: Vec<GuardEffect>) -> Option<String> {
    let mut redirect = None;
    for effect in effects {
        match effect {
            GuardEffect::Notify(options) => {
                notifications.show(options);
            }
            GuardEffect::Redirect(target) => redirect = Some(target),
        }
    }
    redirect
}

/// Turns session snapshots into notifications.
struct SessionWatch {
    last_expiry: Option<u64>,
    failed: bool,
}

impl SessionWatch {
    fn announce(&mut self, notifications: &NotificationCenter, snapshot: &SessionSnapshot) {
        if snapshot.is_refreshing {
            return;
        }
        match &snapshot.refresh_error {
            Some(err) if !self.failed => {
                notifications.show(ToastOptions::new(err.to_string(), Severity::Error));
            }
            _ => {}
        }
        self.failed = snapshot.refresh_error.is_some();

        if snapshot.is_authenticated && snapshot.expires_at != self.last_expiry {
            notifications.show(ToastOptions::new("Session refreshed", Severity::Success));
        }
        self.last_expiry = snapshot.expires_at;
    }
}

/// Prints toasts not seen before, oldest first.
fn print_new(list: &[Toast], printed: &mut HashSet<ToastId>) {
    for toast in list.iter().rev() {
        if printed.insert(toast.id) {
            println!("[{}] {}", toast.severity.label(), toast.message);
        }
    }
}
