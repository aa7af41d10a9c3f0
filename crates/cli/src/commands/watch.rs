//! Follow the session until interrupted.

use gatehouse::SessionManager;

use super::CommandError;

/// Log every session change until Ctrl-C.
pub async fn run(session: &SessionManager) -> Result<(), CommandError> {
    let mut changes = session.subscribe();
    session.initialize().await;

    tracing::info!(tab = %session.tab(), "Watching session, Ctrl-C to stop");
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                match &snapshot.user {
                    Some(user) => tracing::info!(
                        logging_in = snapshot.is_logging_in,
                        "Signed in as {}",
                        user.display_name()
                    ),
                    None => tracing::info!(logging_in = snapshot.is_logging_in, "Signed out"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }
    Ok(())
}
