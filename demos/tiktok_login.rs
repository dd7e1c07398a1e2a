use tiktok_facebook_login::LoginBuilder;

#[tokio::main]
async fn main() -> tiktok_facebook_login::Result<()> {
    let identifier =
        std::env::var("FACEBOOK_LOGIN").expect("Set FACEBOOK_LOGIN env var (email or phone)");
    let password = std::env::var("FACEBOOK_PASSWORD").expect("Set FACEBOOK_PASSWORD env var");

    let mut builder = LoginBuilder::new()
        .headless(false)
        .on_progress(|line| println!("[login] {line}"));

    if let Ok(proxy) = std::env::var("PROXY") {
        builder = builder.proxy(&proxy);
    }

    let session = builder.login(identifier, password).await?;

    let url = session.page().url().await?;
    println!("Signed in, feed at {url}");

    session.close().await
}
