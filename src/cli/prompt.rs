use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use url::Url;
use xc_auth::{AuthError, DeviceCode, LoginPrompt};

/// Prints sign-in instructions to the terminal
#[derive(Debug, Clone, Copy)]
pub struct ConsolePrompt {
    pub open_browser: bool,
}

impl ConsolePrompt {
    fn launch(&self, target: &str) {
        if !self.open_browser {
            return;
        }
        if let Err(e) = open::that(target) {
            warn!(error = %e, "Could not open a browser");
        }
    }
}

#[async_trait::async_trait]
impl LoginPrompt for ConsolePrompt {
    async fn show_device_code(&self, code: &DeviceCode) -> xc_auth::Result<()> {
        match &code.message {
            Some(message) => println!("{message}"),
            None => {
                println!("Visit: {}", code.verification_uri);
                println!("Enter code: {}", code.user_code);
            }
        }
        println!("Waiting for authorization...");
        self.launch(&code.verification_uri);
        Ok(())
    }

    async fn open_authorize_url(&self, url: &Url) -> xc_auth::Result<()> {
        println!("Sign in at: {url}");
        self.launch(url.as_str());
        Ok(())
    }

    async fn read_redirect(&self) -> xc_auth::Result<String> {
        println!("After signing in, paste the URL the browser ended on:");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(AuthError::Io)?;

        let pasted = line.trim();
        if pasted.is_empty() {
            return Err(AuthError::InvalidRedirect);
        }
        Ok(pasted.to_string())
    }
}
