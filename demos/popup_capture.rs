use std::time::Duration;

use patient_browser::{Selector, Session};

const PAGE: &str = "data:text/html,<body>\
    <a id='open' target='_blank' href='https://example.com'>open popup</a>\
    </body>";

#[tokio::main]
async fn main() -> patient_browser::Result<()> {
    let mut session = Session::builder().headless(true).build().await?;

    session.navigate(PAGE).await?;
    println!("Clicking the popup link...");
    if !session
        .click(&Selector::id("open"), Duration::from_secs(10))
        .await?
    {
        println!("Link never became clickable");
        session.close().await?;
        return Ok(());
    }

    let url = session
        .wait_for_new_window_url(Duration::from_secs(20), true, true)
        .await?;
    if url.is_empty() {
        println!("No popup URL resolved");
    } else {
        println!("Popup navigated to: {url}");
    }

    session.close().await
}
