use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page as CrPage;

use crate::error::{Error, Result};

/// The user-agent string presented to TikTok and Facebook (Chrome 91 + Opera
/// on Windows, matching the consumer browser the flow's selectors were
/// captured against).
pub const SPOOFED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.77 Safari/537.36 OPR/77.0.4054.60";

/// Key-only Chrome launch flags that stop the browser advertising itself.
/// Note: chromiumoxide adds the `--` prefix automatically, so keys must NOT
/// include `--`.
pub fn anti_detection_key_args() -> Vec<&'static str> {
    vec!["disable-infobars", "no-first-run", "no-default-browser-check"]
}

/// Key-value flags: strip the AutomationControlled blink feature and pin the
/// spoofed user agent at launch, which also covers subframes and workers.
pub fn anti_detection_kv_args() -> Vec<(&'static str, &'static str)> {
    vec![
        ("disable-blink-features", "AutomationControlled"),
        ("user-agent", SPOOFED_USER_AGENT),
    ]
}

/// Remove the `navigator.webdriver` automation marker before any site JS
/// runs. Facebook's login form consults it.
pub async fn apply_anti_detection(page: &CrPage) -> Result<()> {
    let params = AddScriptToEvaluateOnNewDocumentParams::new(WEBDRIVER_PATCH_JS);
    page.execute(params)
        .await
        .map_err(|e| Error::JsError(format!("Failed to inject anti-detection script: {e}")))?;

    Ok(())
}

/// Real non-automated Chrome has no own `webdriver` property on the Navigator
/// prototype; deleting it matches that exactly.
static WEBDRIVER_PATCH_JS: &str = r#"
delete Object.getPrototypeOf(navigator).webdriver;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_claims_a_desktop_chrome() {
        assert!(SPOOFED_USER_AGENT.contains("Chrome/"));
        assert!(SPOOFED_USER_AGENT.contains("Windows NT"));
    }

    #[test]
    fn launch_args_strip_automation_markers() {
        let kv = anti_detection_kv_args();
        assert!(kv.contains(&("disable-blink-features", "AutomationControlled")));
        assert!(kv.iter().any(|(key, _)| *key == "user-agent"));
        // chromiumoxide prefixes keys itself; a literal `--` would double up
        for key in anti_detection_key_args() {
            assert!(!key.starts_with("--"));
        }
    }

    #[test]
    fn patch_targets_the_webdriver_property() {
        assert!(WEBDRIVER_PATCH_JS.contains("webdriver"));
    }
}
