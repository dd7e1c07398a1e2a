use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser as CrBrowser, BrowserConfig as CrBrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponseResponse, ContinueWithAuthParams, EnableParams, EventAuthRequired,
    EventRequestPaused,
};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use tracing::warn;

use crate::config::LoginConfig;
use crate::error::{Error, Result};
use crate::login::Progress;
use crate::page::Page;
use crate::stealth;

/// Chrome flags the login flow depends on. Popup blocking in particular would
/// swallow the Facebook login tab the whole sequence hinges on.
const LAUNCH_ARGS: &[&str] = &[
    "disable-popup-blocking",
    "disable-extensions",
    "mute-audio",
    "disable-prompt-on-repost",
];

/// One browser process driving one login attempt. Owns every tab it opens;
/// closing it tears all of them down.
pub struct LoginBrowser {
    browser: CrBrowser,
    progress: Progress,
    proxy_auth: Option<(Arc<str>, Arc<str>)>,
    default_timeout: Duration,
    handler_task: tokio::task::JoinHandle<()>,
}

impl LoginBrowser {
    /// Launch a browser instance with the given configuration. Anti-detection
    /// adjustments are always applied; the Facebook form refuses scripted
    /// browsers that advertise themselves.
    pub async fn launch(config: &LoginConfig, progress: Progress) -> Result<Self> {
        let mut builder = CrBrowserConfig::builder();

        if config.headless {
            builder = builder.new_headless_mode().no_sandbox();
        } else {
            builder = builder.with_head().no_sandbox();
        }

        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }

        // chromiumoxide adds the `--` prefix automatically, so keys must NOT
        // include `--`
        for arg in stealth::anti_detection_key_args() {
            builder = builder.arg(arg);
        }
        for arg in stealth::anti_detection_kv_args() {
            builder = builder.arg(arg);
        }

        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(("proxy-server", proxy.server.as_str()));
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder.viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        });

        let cr_config = builder
            .build()
            .map_err(|e| Error::LaunchError(e.to_string()))?;

        let (browser, mut handler) = CrBrowser::launch(cr_config)
            .await
            .map_err(|e| Error::LaunchError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        // Keep proxy credentials around for the per-page CDP auth hook (Arc
        // to avoid per-event cloning)
        let proxy_auth = config
            .proxy
            .as_ref()
            .and_then(|p| match (&p.username, &p.password) {
                (Some(u), Some(p)) => Some((Arc::from(u.as_str()), Arc::from(p.as_str()))),
                _ => None,
            });

        Ok(Self {
            browser,
            progress,
            proxy_auth,
            default_timeout: config.selector_timeout,
            handler_task,
        })
    }

    /// Open a new tab navigated to the given URL. The anti-detection script
    /// is injected and, if configured, the proxy auth responder installed
    /// before navigation.
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let cr_page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::NavigationError(e.to_string()))?;

        let patch_fut = stealth::apply_anti_detection(&cr_page);
        let proxy_fut = async {
            if let Some((ref username, ref password)) = self.proxy_auth {
                Self::setup_proxy_auth(&cr_page, username, password).await
            } else {
                Ok(())
            }
        };

        let (patch_result, proxy_result) = tokio::join!(patch_fut, proxy_fut);
        patch_result?;
        proxy_result?;

        cr_page
            .goto(url)
            .await
            .map_err(|e| Error::NavigationError(e.to_string()))?;

        Ok(Page::new(cr_page, self.default_timeout))
    }

    /// Answer proxy 407 challenges on this page with the stored credentials.
    async fn setup_proxy_auth(
        cr_page: &chromiumoxide::page::Page,
        username: &Arc<str>,
        password: &Arc<str>,
    ) -> Result<()> {
        // Subscribe BEFORE enabling the fetch domain; enabling first loses
        // any challenge raced in between
        let mut auth_events = cr_page
            .event_listener::<EventAuthRequired>()
            .await
            .map_err(|e| Error::LaunchError(format!("Failed to listen for auth events: {e}")))?;

        let mut pause_events = cr_page.event_listener::<EventRequestPaused>().await.map_err(
            |e| Error::LaunchError(format!("Failed to listen for request paused events: {e}")),
        )?;

        let enable_params = EnableParams::builder().handle_auth_requests(true).build();
        cr_page
            .execute(enable_params)
            .await
            .map_err(|e| Error::LaunchError(format!("Failed to enable fetch for proxy auth: {e}")))?;

        let username = Arc::clone(username);
        let password = Arc::clone(password);
        let auth_page = cr_page.clone();

        tokio::spawn(async move {
            while let Some(event) = auth_events.next().await {
                let auth_response = match fetch::AuthChallengeResponse::builder()
                    .response(AuthChallengeResponseResponse::ProvideCredentials)
                    .username(username.as_ref())
                    .password(password.as_ref())
                    .build()
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Failed to build proxy auth response: {e}");
                        continue;
                    }
                };
                let params = ContinueWithAuthParams::new(event.request_id.clone(), auth_response);
                let _ = auth_page.execute(params).await;
            }
        });

        // Non-auth paused requests must be continued by hand once fetch is on
        let resume_page = cr_page.clone();
        tokio::spawn(async move {
            while let Some(event) = pause_events.next().await {
                let params = fetch::ContinueRequestParams::new(event.request_id.clone());
                let _ = resume_page.execute(params).await;
            }
        });

        Ok(())
    }

    /// Return all currently open tabs.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        let timeout = self.default_timeout;
        let cr_pages = self.browser.pages().await.map_err(Error::CdpError)?;
        Ok(cr_pages
            .into_iter()
            .map(|p| Page::new(p, timeout))
            .collect())
    }

    /// Scan open tabs in order and return the first whose URL contains the
    /// given fragment. Each candidate URL is emitted to the progress channel
    /// for diagnosis. Read-only.
    pub async fn find_page_containing(&self, fragment: &str) -> Result<Option<Page>> {
        for page in self.pages().await? {
            let url = match page.url().await {
                Ok(url) => url,
                // tab torn down mid-scan
                Err(_) => continue,
            };
            self.progress.emit(&url);
            if url.contains(fragment) {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// Shut the browser process down and stop the CDP event pump.
    pub async fn close(&mut self) -> Result<()> {
        self.browser.close().await.map_err(Error::CdpError)?;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}
