use patient_browser::Session;

#[tokio::main]
async fn main() -> patient_browser::Result<()> {
    let mut session = Session::builder()
        .headless(true)
        .viewport(1280, 800)
        .build()
        .await?;

    session.navigate("https://example.com").await?;
    session.screenshot_to_file("example.png").await?;
    println!("Saved example.png");

    session.close().await
}
