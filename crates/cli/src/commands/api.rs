//! Raw authenticated API calls.

use std::io::Write;

use gatehouse::{ApiRequest, SessionManager};

use super::CommandError;

/// GET `path` through the session pipeline and write the body to stdout.
pub async fn get(session: &SessionManager, path: &str) -> Result<(), CommandError> {
    session.initialize().await;
    if !session.is_authenticated() {
        return Err(CommandError::NotLoggedIn);
    }

    let response = session.client().send(ApiRequest::get(path)).await?;
    tracing::debug!(status = %response.status, bytes = response.body.len(), "Response received");

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    writeln!(stdout)?;
    Ok(())
}
