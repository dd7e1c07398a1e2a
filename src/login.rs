use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;
use tracing::debug;

use crate::browser::LoginBrowser;
use crate::config::{LoginBuilder, LoginConfig};
use crate::error::{Error, Result};
use crate::flow::FlowConfig;
use crate::page::Page;

/// Callback receiving free-text progress lines as the attempt moves along.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Progress channel: forwards to the caller's sink (if any) and mirrors
/// every line to `tracing` at debug level.
#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<ProgressSink>,
}

impl Progress {
    pub fn new(sink: Option<ProgressSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, line: &str) {
        debug!(target: "tiktok_facebook_login", "{line}");
        if let Some(sink) = &self.sink {
            sink(line);
        }
    }
}

/// Facebook login/password pair. Immutable input, never persisted; the
/// password is wiped from memory when the attempt is dropped.
pub struct Credentials {
    identifier: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::InvalidCredentials("empty login identifier".into()));
        }
        if self.secret.expose_secret().is_empty() {
            return Err(Error::InvalidCredentials("empty password".into()));
        }
        Ok(())
    }
}

/// Once-only resolution guard shared by the concurrent watchers. Whichever
/// terminal path claims the flag acts; every other path must no-op.
#[derive(Default)]
pub(crate) struct LoginAttempt {
    resolved: AtomicBool,
}

impl LoginAttempt {
    /// Claim the terminal outcome. Returns true exactly once per attempt.
    pub(crate) fn try_resolve(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

/// A successful attempt: the still-running browser plus the tab showing the
/// signed-in TikTok feed. Dropping the session takes the browser process
/// down with it; call [`LoginSession::close`] for an orderly shutdown.
pub struct LoginSession {
    browser: LoginBrowser,
    page: Page,
}

impl std::fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSession").finish_non_exhaustive()
    }
}

impl LoginSession {
    /// The tab showing the signed-in TikTok feed.
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn browser(&self) -> &LoginBrowser {
        &self.browser
    }

    pub fn into_parts(self) -> (LoginBrowser, Page) {
        (self.browser, self.page)
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await
    }
}

/// Run a login attempt with the default configuration.
pub async fn login(
    identifier: impl Into<String>,
    secret: impl Into<String>,
) -> Result<LoginSession> {
    LoginBuilder::new().login(identifier, secret).await
}

pub(crate) async fn run(
    credentials: Credentials,
    config: LoginConfig,
    flow: FlowConfig,
    sink: Option<ProgressSink>,
) -> Result<LoginSession> {
    credentials.validate()?;
    let progress = Progress::new(sink);

    progress.emit("Launch!");
    let mut browser = LoginBrowser::launch(&config, progress.clone()).await?;
    progress.emit("Launched");

    let outcome = tokio::time::timeout(
        config.login_timeout,
        attempt(&browser, &credentials, &flow, &progress),
    )
    .await;

    match outcome {
        Ok(Ok(page)) => {
            progress.emit("Logged in!");
            Ok(LoginSession { browser, page })
        }
        Ok(Err(err)) => {
            let _ = browser.close().await;
            Err(err)
        }
        Err(_) => {
            let _ = browser.close().await;
            progress.emit("Timed out");
            Err(Error::Timeout(
                "no login completion within the deadline".into(),
            ))
        }
    }
}

/// The sequential part of the flow, then the two concurrent watchers. The
/// popup driver finishing without a hard failure hands over to the
/// signed-in-page watcher; the watchdog in [`run`] bounds the whole thing.
async fn attempt(
    browser: &LoginBrowser,
    credentials: &Credentials,
    flow: &FlowConfig,
    progress: &Progress,
) -> Result<Page> {
    progress.emit("Go to login page");
    let page = browser.new_page(&flow.login_page_url).await?;

    progress.emit("Waiting for Fb Login selector...");
    let button = match page
        .wait_for_selector_within(&flow.facebook_button_selector, flow.facebook_button_wait())
        .await
    {
        Ok(button) => button,
        // TikTok A/B-tests the login page markup; try the alternate version
        Err(_) => {
            page.wait_for_selector(&flow.facebook_button_fallback_selector)
                .await?
        }
    };
    progress.emit("Waited !");

    let attempt = LoginAttempt::default();
    let tabs_before = browser.pages().await?.len();

    progress.emit("Clicking Fb Login button !");
    button.click().await?;
    progress.emit("Fb Login button clicked !");

    let popup_driver = drive_facebook_popup(browser, credentials, flow, progress, &attempt);
    let page_watcher = await_signed_in_page(browser, flow, progress, &attempt, tabs_before);
    tokio::pin!(popup_driver);
    tokio::pin!(page_watcher);

    tokio::select! {
        drove = &mut popup_driver => {
            drove?;
            (&mut page_watcher).await
        }
        found = &mut page_watcher => found,
    }
}

/// Drive the Facebook popup: submit credentials, then sweep the
/// interstitials best-effort. Returning Ok means "no hard failure observed",
/// not a confirmed login.
async fn drive_facebook_popup(
    browser: &LoginBrowser,
    credentials: &Credentials,
    flow: &FlowConfig,
    progress: &Progress,
    attempt: &LoginAttempt,
) -> Result<()> {
    let popup = loop {
        if let Some(popup) = browser.find_page_containing(&flow.popup_url_fragment).await? {
            break popup;
        }
        sleep(flow.popup_poll()).await;
    };
    progress.emit("Fb login page found ? yes");

    // The scripted form misbehaves on its first load; a reload settles it
    progress.emit("Fb login page reloading...");
    popup.reload().await?;
    progress.emit("Fb login page reloaded. Loggin-in ...");

    if let Err(err) = submit_credentials(&popup, credentials, flow).await {
        attempt.try_resolve();
        return Err(Error::PopupSubmit(err.to_string()));
    }
    sleep(flow.submit_settle()).await;

    // Error banner probe. The probe itself failing usually means the popup
    // already navigated away, which this flow reads as success. Accepted
    // false-positive risk: Facebook offers nothing positive to confirm here.
    let banner_js = probe_text_js(&flow.error_box_selector)?;
    let banner: String = match popup.evaluate_value(&banner_js).await {
        Ok(text) => text,
        Err(_) => {
            progress.emit("Likely logged in !");
            return Ok(());
        }
    };
    if !banner.is_empty() {
        attempt.try_resolve();
        return Err(Error::LoginRejected(banner));
    }

    sleep(flow.dialog_settle()).await;

    // "Continue as <name>" confirmation, same optimistic reading on errors
    if click_continue_if_shown(&popup, flow).await.is_err() {
        progress.emit("Likely logged in !");
        return Ok(());
    }

    accept_cookies_if_shown(&popup, flow, progress).await;

    if let Err(err) = reenter_password_if_asked(&popup, credentials, flow, progress).await {
        attempt.try_resolve();
        return Err(err);
    }

    progress.emit("Likely logged in !");
    Ok(())
}

async fn submit_credentials(
    popup: &Page,
    credentials: &Credentials,
    flow: &FlowConfig,
) -> Result<()> {
    popup.wait_for_selector(&flow.email_selector).await?;
    popup
        .type_text(&flow.email_selector, &credentials.identifier)
        .await?;
    popup
        .type_text(&flow.password_selector, credentials.secret.expose_secret())
        .await?;
    popup.click(&flow.submit_selector).await?;
    Ok(())
}

async fn click_continue_if_shown(popup: &Page, flow: &FlowConfig) -> Result<()> {
    let shown: bool = popup
        .evaluate_value(&probe_exists_js(&flow.continue_button_selector)?)
        .await?;
    if shown {
        popup.click(&flow.continue_button_selector).await?;
    }
    sleep(flow.dialog_settle()).await;
    Ok(())
}

/// The consent dialog is recognized purely by its button count and the
/// accept control purely by position; both live in [`FlowConfig`] so they
/// can be re-verified against the live dialog without a rebuild.
async fn accept_cookies_if_shown(popup: &Page, flow: &FlowConfig, progress: &Progress) {
    let Ok(buttons) = popup.find_elements(&flow.cookie_button_selector).await else {
        return;
    };
    if buttons.len() != flow.cookie_button_count {
        return;
    }
    let Some(accept) = buttons.get(flow.cookie_accept_index) else {
        return;
    };
    if accept.click().await.is_ok() {
        progress.emit("Accepted cookies");
        sleep(flow.consent_settle()).await;
    }
}

async fn reenter_password_if_asked(
    popup: &Page,
    credentials: &Credentials,
    flow: &FlowConfig,
    progress: &Progress,
) -> Result<()> {
    let asked = popup
        .evaluate_value::<bool>(&probe_exists_js(&flow.reentry_password_selector)?)
        .await
        .unwrap_or(false);
    if !asked {
        return Ok(());
    }

    progress.emit("Need to type password again");
    let refill: Result<()> = async {
        popup
            .type_text(
                &flow.reentry_password_selector,
                credentials.secret.expose_secret(),
            )
            .await?;
        popup.click(&flow.reentry_submit_selector).await
    }
    .await;
    refill.map_err(|err| Error::PasswordReentry(err.to_string()))
}

/// Watch for a tab closing, then scan for the signed-in TikTok page after a
/// debounce. Never completes on its own; the watchdog bounds it.
async fn await_signed_in_page(
    browser: &LoginBrowser,
    flow: &FlowConfig,
    progress: &Progress,
    attempt: &LoginAttempt,
    tabs_at_start: usize,
) -> Result<Page> {
    let mut open_tabs = tabs_at_start;
    loop {
        sleep(flow.popup_poll()).await;
        let Ok(pages) = browser.pages().await else {
            continue;
        };
        let count = pages.len();
        let tab_closed = count < open_tabs;
        open_tabs = count;
        if !tab_closed {
            continue;
        }

        sleep(flow.tab_close_debounce()).await;
        if let Some(page) = find_signed_in_page(browser, flow, progress).await {
            if attempt.try_resolve() {
                progress.emit("logged in !");
                return Ok(page);
            }
        }
    }
}

/// Try each known post-login URL variant in order and return the first open
/// tab showing one of them.
async fn find_signed_in_page(
    browser: &LoginBrowser,
    flow: &FlowConfig,
    progress: &Progress,
) -> Option<Page> {
    for fragment in &flow.logged_in_url_fragments {
        match browser.find_page_containing(fragment).await {
            Ok(Some(page)) => {
                progress.emit("TikTok page found ? yes");
                return Some(page);
            }
            Ok(None) => {}
            Err(_) => return None,
        }
    }
    progress.emit("TikTok page found ? no");
    None
}

/// Build a probe returning the inner text of the first match for `selector`,
/// or an empty string when nothing matches. The selector is JSON-escaped so
/// attribute selectors with quotes survive the trip into JS.
fn probe_text_js(selector: &str) -> Result<String> {
    let sel = serde_json::to_string(selector).map_err(|e| Error::JsError(e.to_string()))?;
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); return el ? el.innerText : ''; }})()"
    ))
}

/// Build a probe returning whether any element matches `selector`.
fn probe_exists_js(selector: &str) -> Result<String> {
    let sel = serde_json::to_string(selector).map_err(|e| Error::JsError(e.to_string()))?;
    Ok(format!(
        "document.querySelector({sel}) !== null"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_resolves_exactly_once() {
        let attempt = Arc::new(LoginAttempt::default());
        let wins = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let attempt = Arc::clone(&attempt);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if attempt.try_resolve() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(attempt.is_resolved());
        assert!(!attempt.try_resolve());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        assert!(Credentials::new("", "hunter2").validate().is_err());
        assert!(Credentials::new("user@example.com", "").validate().is_err());
        assert!(Credentials::new("user@example.com", "hunter2")
            .validate()
            .is_ok());
    }

    #[test]
    fn progress_reaches_the_sink() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |line: &str| {
            sink_seen.lock().unwrap().push(line.to_string());
        });
        let progress = Progress::new(Some(sink));

        progress.emit("Launch !");
        progress.emit("Launched");

        assert_eq!(*seen.lock().unwrap(), vec!["Launch !", "Launched"]);
    }

    #[test]
    fn silent_progress_is_fine() {
        Progress::default().emit("nobody listening");
    }

    #[test]
    fn probe_js_escapes_selectors() {
        let plain = probe_text_js(".login_error_box").unwrap();
        assert!(plain.contains("\".login_error_box\""));
        assert!(plain.contains("innerText"));

        // attribute selectors carry double quotes of their own
        let quoted = probe_exists_js("input[name=\"login\"]").unwrap();
        assert!(quoted.contains("\\\"login\\\""));
    }
}
