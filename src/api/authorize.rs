use super::oauth::DEFAULT_SCOPES;
use crate::credentials::CredentialManager;
use anyhow::{anyhow, Result};
use std::io::{self, BufRead, Write};
use tracing::info;

/// Manual OAuth helper (no embedded HTTP server):
/// 1. Build the authorize URL (PKCE S256 + state) and print it.
/// 2. The user approves in a browser and is redirected to the redirect URI,
///    which may fail to load if nothing listens there.
/// 3. The user pastes the full redirect URL back.
/// 4. The code is exchanged for tokens and stored as the single credential.
pub async fn run_interactive_auth(manager: &CredentialManager) -> Result<()> {
    let request = manager.oauth().authorization_request(DEFAULT_SCOPES)?;

    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        request.url
    );
    println!("After authorizing, copy the full URL you were redirected to and paste it here:");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    let input = input.trim();
    if input.is_empty() {
        return Err(anyhow!("no redirect URL provided"));
    }

    let code = crate::api::oauth::OAuthClient::parse_redirect(input, &request.state)?;
    let tokens = manager
        .oauth()
        .exchange_code(&code, &request.code_verifier)
        .await?;
    let cred = manager.store_authorization(&tokens).await?;

    info!(credential_id = %cred.id, "authorization stored");
    println!("Authorized. Token valid until {}.", cred.expires_at);
    Ok(())
}
