use authkeeper::configuration::get_configuration;
use authkeeper::telemetry::init_telemetry;
use authkeeper::{AppError, AuthClient, AuthEvent};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_telemetry();

    tracing::info!("Starting authkeeper");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!(base_url = %config.api.base_url, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(e.into());
        }
    };

    let client = AuthClient::build(&configuration)?;

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AuthEvent::LoginRequired { reason } = event {
                tracing::warn!(reason = %reason, "Login required");
            }
        }
    });

    if !client.hydrate().await? {
        let username = std::env::var("AUTHKEEPER_USERNAME").unwrap_or_default();
        let password = std::env::var("AUTHKEEPER_PASSWORD").unwrap_or_default();
        tracing::info!("No stored session, logging in");
        client.login(&username, &password).await?;
    }

    let user = client.load_session().await?;
    tracing::info!(user_id = user.id, email = %user.email, "Session active");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to listen for shutdown: {}", e)))?;

    client.shutdown();
    tracing::info!("Shutting down");
    Ok(())
}
