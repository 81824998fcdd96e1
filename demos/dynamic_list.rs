use std::time::Duration;

use patient_browser::{Selector, Session};

#[tokio::main]
async fn main() -> patient_browser::Result<()> {
    let mut session = Session::builder().headless(true).build().await?;

    println!("Loading the infinite-scroll demo page...");
    session.navigate("https://quotes.toscrape.com/scroll").await?;

    let quotes = session
        .find_all_scrolling(&Selector::css(".quote"), Duration::from_secs(20))
        .await?;
    println!(
        "Discovered {} quotes after scrolling to the bottom",
        quotes.len()
    );

    if let Some(first) = quotes.first() {
        if let Some(text) = session
            .execute_script(
                first,
                "return el.querySelector('.text').textContent;",
                Duration::from_secs(5),
            )
            .await?
        {
            println!("First quote: {text}");
        }
    }

    session.close().await
}
