//! End-to-end checks against a real Chrome. Ignored by default; run with
//! `cargo test --test live_chrome -- --ignored` on a machine with Chrome
//! installed and network access.

use std::time::Duration;

use patient_browser::{Selector, Session};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("patient_browser=debug")),
        )
        .try_init();
}

#[tokio::test]
#[ignore = "requires a local Chrome"]
async fn test_live_navigate_and_read_heading() {
    init_tracing();
    let mut session = Session::builder()
        .headless(true)
        .timeout(Duration::from_secs(15))
        .poll_interval(Duration::from_millis(200))
        .build()
        .await
        .expect("Failed to launch browser");

    let loaded = session
        .navigate("https://example.com")
        .await
        .expect("Failed to navigate");
    assert!(loaded);

    let heading = session
        .find_one(&Selector::css("h1"), Duration::from_secs(15), false)
        .await
        .expect("Lookup failed")
        .expect("Heading should appear");
    let text = session
        .execute_script(&heading, "return el.textContent;", Duration::from_secs(5))
        .await
        .expect("Script failed")
        .expect("Script should produce a value");
    assert!(
        text.as_str().unwrap_or_default().contains("Example"),
        "Heading was: {text}"
    );

    session.close().await.expect("Failed to close session");
}

#[tokio::test]
#[ignore = "requires a local Chrome"]
async fn test_live_element_rendered_after_delay() {
    init_tracing();
    let mut session = Session::builder()
        .headless(true)
        .build()
        .await
        .expect("Failed to launch browser");

    let page = "data:text/html,<body><script>setTimeout(function(){\
                var d=document.createElement('div');d.id='late';\
                d.textContent='done';document.body.appendChild(d);},800);\
                </script></body>";
    assert!(session.navigate(page).await.expect("Failed to navigate"));

    let late = session
        .find_one(&Selector::id("late"), Duration::from_secs(10), false)
        .await
        .expect("Lookup failed");
    assert!(late.is_some(), "Delayed element never rendered");

    session.close().await.expect("Failed to close session");
}

#[tokio::test]
#[ignore = "requires a local Chrome"]
async fn test_live_popup_url_and_focus_restore() {
    init_tracing();
    let mut session = Session::builder()
        .headless(true)
        .build()
        .await
        .expect("Failed to launch browser");

    let page = "data:text/html,<body>\
                <a id='go' target='_blank' href='https://example.com'>go</a>\
                </body>";
    assert!(session.navigate(page).await.expect("Failed to navigate"));
    assert!(session
        .click(&Selector::id("go"), Duration::from_secs(10))
        .await
        .expect("Click failed"));

    let url = session
        .wait_for_new_window_url(Duration::from_secs(20), true, true)
        .await
        .expect("Failed to wait for popup url");
    assert!(url.contains("example.com"), "Popup url was: {url}");

    session.close().await.expect("Failed to close session");
}

#[tokio::test]
#[ignore = "requires a local Chrome"]
async fn test_live_screenshot() {
    init_tracing();
    let mut session = Session::builder()
        .headless(true)
        .build()
        .await
        .expect("Failed to launch browser");

    assert!(session
        .navigate("https://example.com")
        .await
        .expect("Failed to navigate"));
    let screenshot = session.screenshot().await.expect("Failed to screenshot");
    assert_eq!(&screenshot[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    assert!(
        screenshot.len() > 1000,
        "Screenshot too small: {} bytes",
        screenshot.len()
    );

    session.close().await.expect("Failed to close session");
}
