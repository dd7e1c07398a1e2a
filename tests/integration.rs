use std::sync::{Arc, Mutex};
use std::time::Duration;

use tiktok_facebook_login::{Error, LoginBrowser, LoginBuilder, LoginConfig, Progress};

#[tokio::test]
async fn empty_credentials_fail_before_launching() {
    let err = LoginBuilder::new()
        .login("", "hunter2")
        .await
        .expect_err("empty identifier must be rejected");
    assert!(matches!(err, Error::InvalidCredentials(_)));

    let err = LoginBuilder::new()
        .login("user@example.com", "")
        .await
        .expect_err("empty password must be rejected");
    assert!(matches!(err, Error::InvalidCredentials(_)));
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn launch_and_navigate() {
    let mut browser = LoginBrowser::launch(&LoginConfig::default(), Progress::default())
        .await
        .expect("Failed to launch browser");

    let page = browser
        .new_page("https://example.com")
        .await
        .expect("Failed to open page");

    let title = page.title().await.expect("Failed to get title");
    assert!(title.contains("Example"), "Title was: {title}");

    let heading = page
        .find_element("h1")
        .await
        .expect("Failed to find h1")
        .inner_text()
        .await
        .expect("Failed to get text");
    assert_eq!(heading, "Example Domain");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn find_page_containing_scans_tabs_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: tiktok_facebook_login::login::ProgressSink = Arc::new(move |line: &str| {
        sink_seen.lock().unwrap().push(line.to_string());
    });
    let progress = Progress::new(Some(sink));

    let mut browser = LoginBrowser::launch(&LoginConfig::default(), progress)
        .await
        .expect("Failed to launch browser");

    browser
        .new_page("https://example.com")
        .await
        .expect("Failed to open page");

    let found = browser
        .find_page_containing("example.com")
        .await
        .expect("Scan failed");
    assert!(found.is_some());

    let missing = browser
        .find_page_containing("facebook.com/login.php")
        .await
        .expect("Scan failed");
    assert!(missing.is_none());

    // every candidate URL goes to the progress channel for diagnosis
    assert!(seen
        .lock()
        .unwrap()
        .iter()
        .any(|line| line.contains("example.com")));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires a local Chrome install"]
async fn selector_wait_falls_back_after_its_deadline() {
    let mut browser = LoginBrowser::launch(&LoginConfig::default(), Progress::default())
        .await
        .expect("Failed to launch browser");

    let page = browser
        .new_page("about:blank")
        .await
        .expect("Failed to open page");
    page.goto("https://example.com")
        .await
        .expect("Failed to navigate");

    // primary selector absent: the wait must give up at its own deadline...
    let missing = page
        .wait_for_selector_within("#login-button-variant-a", Duration::from_millis(500))
        .await;
    assert!(missing.is_err());

    // ...leaving time to try the alternate markup
    let fallback = page.wait_for_selector("h1").await;
    assert!(fallback.is_ok());

    browser.close().await.expect("Failed to close browser");
}
