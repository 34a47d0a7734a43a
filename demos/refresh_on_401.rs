use std::sync::{Arc, Mutex};

use http_auth_refresh::{AuthRefresh, AuthRefreshOptions, Client, FailedRequest, HttpRequest};
use serde::Deserialize;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api_url = std::env::var("AUTH_DEMO_API_URL")?;
    let refresh_url = std::env::var("AUTH_DEMO_REFRESH_URL")?;
    let token = Arc::new(Mutex::new(
        std::env::var("AUTH_DEMO_TOKEN").unwrap_or_default(),
    ));

    let base = Client::reqwest();

    let refresh_client = base.clone();
    let refresh_token = Arc::clone(&token);
    let refresher = move |failed: FailedRequest| {
        let client = refresh_client.clone();
        let url = refresh_url.clone();
        let token = Arc::clone(&refresh_token);
        async move {
            println!("refreshing token after {:?} on {}", failed.status(), failed.request.url());
            let response = client.send(HttpRequest::post(url)).await?;
            if !response.is_success() {
                anyhow::bail!("refresh endpoint returned {}", response.status());
            }
            let body: TokenResponse = response.json()?;
            *token.lock().map_err(|_| anyhow::anyhow!("token lock poisoned"))? = body.access_token;
            Ok::<(), anyhow::Error>(())
        }
    };

    let retry_token = Arc::clone(&token);
    let client = AuthRefresh::new(refresher)
        .options(
            AuthRefreshOptions::default()
                .with_status_codes([401, 403])
                .with_pause_instance_while_refreshing(true)
                .with_on_retry(move |mut request: HttpRequest| {
                    let current = retry_token
                        .lock()
                        .map(|token| token.clone())
                        .unwrap_or_default();
                    async move {
                        request.set_bearer_auth(&current);
                        request
                    }
                }),
        )
        .install(&base)?;

    let current = token
        .lock()
        .map(|token| token.clone())
        .unwrap_or_default();
    let response = client
        .send(HttpRequest::get(&api_url).bearer_auth(&current))
        .await?;
    println!("{} -> {}", api_url, response.status());
    println!("{}", response.text());

    let public = client
        .send(HttpRequest::get(&api_url).skip_auth_refresh())
        .await?;
    println!("without refresh: {}", public.status());

    Ok(())
}
