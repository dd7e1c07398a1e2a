use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Everything about the login sequence that is coupled to the remote sites'
/// current markup: selectors, URL fragments, and settle delays. TikTok and
/// Facebook change these without notice, so they are data with embedded
/// defaults rather than code constants. Partial overrides can be loaded with
/// [`FlowConfig::from_json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// TikTok login page.
    pub login_page_url: String,
    /// "Login with Facebook" control on the TikTok login page.
    pub facebook_button_selector: String,
    /// Alternate control selector; TikTok A/B-tests the login page markup.
    pub facebook_button_fallback_selector: String,
    /// Deadline for the primary button selector before trying the fallback.
    pub facebook_button_wait_ms: u64,
    /// URL fragment identifying the Facebook login popup among open tabs.
    pub popup_url_fragment: String,
    /// Credential fields and submit control inside the popup.
    pub email_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Error banner Facebook shows on rejected credentials.
    pub error_box_selector: String,
    /// "Continue as <name>" confirmation control.
    pub continue_button_selector: String,
    /// Cookie consent probe: the dialog is assumed present when exactly
    /// `cookie_button_count` elements match `cookie_button_selector`, and the
    /// one at `cookie_accept_index` is assumed to accept. This is an
    /// unverified positional heuristic; re-check it against the live dialog
    /// before trusting it.
    pub cookie_button_selector: String,
    pub cookie_button_count: usize,
    pub cookie_accept_index: usize,
    /// Password re-entry field Facebook sometimes shows late in the flow.
    pub reentry_password_selector: String,
    pub reentry_submit_selector: String,
    /// Post-login TikTok URLs, one per language/login-type variant, scanned
    /// in this order.
    pub logged_in_url_fragments: Vec<String>,
    /// Settle delay after submitting credentials.
    pub submit_settle_ms: u64,
    /// Settle delay around the interstitial dialogs.
    pub dialog_settle_ms: u64,
    /// Settle delay after accepting cookies.
    pub consent_settle_ms: u64,
    /// Delay between a tab closing and the scan for the signed-in page.
    pub tab_close_debounce_ms: u64,
    /// Poll interval while watching for tabs to open or close.
    pub popup_poll_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            login_page_url: "https://www.tiktok.com/login".into(),
            facebook_button_selector: ".channel-item-wrapper-2gBWB+.channel-item-wrapper-2gBWB\
                +.channel-item-wrapper-2gBWB .channel-name-2qzLW"
                .into(),
            facebook_button_fallback_selector: "#loginContainer>div>div>div+div+a+a+div".into(),
            facebook_button_wait_ms: 10_000,
            popup_url_fragment: "facebook.com/login.php".into(),
            email_selector: "#email".into(),
            password_selector: "#pass".into(),
            submit_selector: "input[name=\"login\"]".into(),
            error_box_selector: ".login_error_box".into(),
            continue_button_selector: "[data-visualcompletion=\"ignore\"]".into(),
            cookie_button_selector: "[role=\"button\"]".into(),
            cookie_button_count: 3,
            cookie_accept_index: 2,
            reentry_password_selector: "[name=\"pass\"]".into(),
            reentry_submit_selector: "input[type=\"submit\"]".into(),
            logged_in_url_fragments: vec![
                "https://www.tiktok.com/foryou?loginType=facebook&lang=en".into(),
                "https://www.tiktok.com/foryou?lang=en".into(),
                "https://www.tiktok.com/foryou?loginType=facebook&lang=fr".into(),
                "https://www.tiktok.com/foryou?lang=fr".into(),
            ],
            submit_settle_ms: 3_000,
            dialog_settle_ms: 3_000,
            consent_settle_ms: 1_000,
            tab_close_debounce_ms: 10_000,
            popup_poll_ms: 250,
        }
    }
}

impl FlowConfig {
    /// Parse a (possibly partial) JSON override; unspecified fields keep
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::FlowConfig(e.to_string()))
    }

    pub(crate) fn facebook_button_wait(&self) -> Duration {
        Duration::from_millis(self.facebook_button_wait_ms)
    }

    pub(crate) fn submit_settle(&self) -> Duration {
        Duration::from_millis(self.submit_settle_ms)
    }

    pub(crate) fn dialog_settle(&self) -> Duration {
        Duration::from_millis(self.dialog_settle_ms)
    }

    pub(crate) fn consent_settle(&self) -> Duration {
        Duration::from_millis(self.consent_settle_ms)
    }

    pub(crate) fn tab_close_debounce(&self) -> Duration {
        Duration::from_millis(self.tab_close_debounce_ms)
    }

    pub(crate) fn popup_poll(&self) -> Duration {
        Duration::from_millis(self.popup_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_known_flow() {
        let flow = FlowConfig::default();
        assert_eq!(flow.popup_url_fragment, "facebook.com/login.php");
        assert_eq!(flow.logged_in_url_fragments.len(), 4);
        assert!(flow.logged_in_url_fragments[0].contains("loginType=facebook"));
        assert_eq!(flow.cookie_button_count, 3);
        assert_eq!(flow.cookie_accept_index, 2);
        assert!(flow.facebook_button_wait() < Duration::from_secs(30));
    }

    #[test]
    fn partial_json_overrides_merge_over_defaults() {
        let flow = FlowConfig::from_json(
            r#"{"popup_url_fragment": "facebook.com/v2/login.php", "cookie_button_count": 4}"#,
        )
        .unwrap();
        assert_eq!(flow.popup_url_fragment, "facebook.com/v2/login.php");
        assert_eq!(flow.cookie_button_count, 4);
        // untouched fields keep their defaults
        assert_eq!(flow.email_selector, "#email");
        assert_eq!(flow.logged_in_url_fragments.len(), 4);
    }

    #[test]
    fn malformed_json_is_a_flow_config_error() {
        let err = FlowConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::FlowConfig(_)));
    }
}
