use crate::sql::base::error::ConnectorError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::{Client, Config, NoTls, config::SslMode};
use tracing::{error, warn};

/// Session options applied to every source connection.
///
/// Timestamps are compared and rendered in UTC, so the session time zone is
/// pinned regardless of server defaults.
pub(crate) fn session_options(statement_timeout: Option<Duration>) -> String {
    let mut options = String::from("-c TimeZone=UTC");
    if let Some(timeout) = statement_timeout {
        options.push_str(&format!(" -c statement_timeout={}", timeout.as_millis()));
    }
    options
}

/// Parses the source URL and appends the session options to any `options`
/// the URL already carries.
pub(crate) fn session_config(
    url: &str,
    statement_timeout: Option<Duration>,
) -> Result<Config, ConnectorError> {
    let mut config = url
        .parse::<Config>()
        .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
    let session = session_options(statement_timeout);
    let merged = match config.get_options().map(str::trim) {
        Some(existing) if !existing.is_empty() => format!("{existing} {session}"),
        _ => session,
    };
    config.options(&merged);
    Ok(config)
}

pub(crate) async fn connect_client(
    url: &str,
    statement_timeout: Option<Duration>,
) -> Result<Client, ConnectorError> {
    let config = session_config(url, statement_timeout)?;
    let ssl_mode = config.get_ssl_mode();

    match ssl_mode {
        SslMode::Disable => connect_without_tls(config).await,
        SslMode::Require => connect_with_tls(config).await,
        SslMode::Prefer => match connect_with_tls(config.clone()).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                connect_without_tls(config).await
            }
        },
        _ => connect_with_tls(config).await,
    }
}

async fn connect_with_tls(config: Config) -> Result<Client, ConnectorError> {
    let tls = MakeTlsConnector::new(TlsConnector::builder().build()?);
    let (client, connection) = config.connect(tls).await?;
    drive(connection);
    Ok(client)
}

async fn connect_without_tls(config: Config) -> Result<Client, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    drive(connection);
    Ok(client)
}

/// Polls the connection half on its own task until the client is dropped.
fn drive(connection: impl Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static) {
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            error!(%error, "Source connection closed with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_utc_and_optional_timeout() {
        assert_eq!(session_options(None), "-c TimeZone=UTC");
        assert_eq!(
            session_options(Some(Duration::from_secs(30))),
            "-c TimeZone=UTC -c statement_timeout=30000"
        );
    }

    #[test]
    fn url_options_are_kept_alongside_session_options() {
        let config = session_config(
            "postgres://app@db1/app?options=-c%20search_path%3Dreporting",
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        assert_eq!(
            config.get_options(),
            Some("-c search_path=reporting -c TimeZone=UTC -c statement_timeout=5000")
        );

        let plain = session_config("postgres://app@db1/app", None).unwrap();
        assert_eq!(plain.get_options(), Some("-c TimeZone=UTC"));
    }
}
