//! Login flow: verification code and optional two-factor password

use std::io::{self, BufRead, Write};

use grammers_client::{Client, SignInError};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Source of interactive answers during login.
pub trait Prompt {
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Reads answers from standard input.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        print!("{}", question);
        io::stdout().flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(Error::Auth(
                "standard input closed before an answer was given".to_string(),
            ));
        }
        Ok(line.trim().to_string())
    }
}

/// Make sure the session is logged in, running the code exchange if not.
///
/// Returns the display name of the logged-in account.
pub async fn ensure_authorized(
    client: &Client,
    config: &Config,
    prompt: &mut dyn Prompt,
) -> Result<String> {
    if client.is_authorized().await? {
        let me = client.get_me().await?;
        info!(account = %me.full_name(), "Using saved session");
        return Ok(me.full_name());
    }

    info!(phone = %config.masked_phone(), "Session not authorized, requesting login code");

    let token = client
        .request_login_code(&config.phone, &config.api_hash)
        .await
        .map_err(|e| {
            Error::Auth(format!(
                "failed to request login code: {} (check TG_API_ID, TG_API_HASH and TG_PHONE_NUMBER)",
                e
            ))
        })?;

    let code = prompt.ask("Enter the code Telegram sent you: ")?;
    if code.is_empty() {
        return Err(Error::Auth("no login code entered".to_string()));
    }

    let user = match client.sign_in(&token, &code).await {
        Ok(user) => user,
        Err(SignInError::PasswordRequired(password_token)) => {
            info!("Account has two-step verification enabled");
            let password = match &config.password {
                Some(p) => p.clone(),
                None => prompt.ask(&format!(
                    "Enter your cloud password (hint: {}): ",
                    password_token.hint().unwrap_or("none")
                ))?,
            };
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(sign_in_error)?
        }
        Err(e) => return Err(sign_in_error(e)),
    };

    info!(account = %user.full_name(), "Logged in, session saved");
    Ok(user.full_name())
}

fn sign_in_error(err: SignInError) -> Error {
    match err {
        SignInError::InvalidCode => {
            Error::Auth("the login code is invalid or expired, run again to get a new one".to_string())
        }
        SignInError::InvalidPassword => Error::Auth(
            "the two-step verification password is wrong (check TG_PASSWORD)".to_string(),
        ),
        SignInError::SignUpRequired { .. } => Error::Auth(
            "this phone number has no Telegram account, sign up with an official app first"
                .to_string(),
        ),
        SignInError::Other(e) => match Error::from(e) {
            Error::TelegramError(msg) => Error::Auth(msg),
            other => other,
        },
        other => {
            warn!(error = %other, "Unexpected sign-in failure");
            Error::Auth(other.to_string())
        }
    }
}
