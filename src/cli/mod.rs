//! Clap-derive CLI. A thin HTTP client talking to a running `alarmd serve` process over its own
//! façade, the same role this codebase's CLI has always played against its daemon.

pub mod alarm;
pub mod daemon;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "alarmd", version, about = "Timezone-aware alarm scheduling daemon and client")]
pub struct Cli {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Daemon port
    #[arg(long, default_value_t = 8177, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },

    /// Query daemon health
    Status,

    /// Schedule a new alarm
    Add {
        /// Opaque caller-supplied identifier, must be unique
        #[arg(long = "id")]
        code_id: String,

        /// Recipient email address
        #[arg(long)]
        email: String,

        /// Local fire time, HH:MM or HH:MM:SS
        #[arg(long)]
        time: String,

        /// IANA timezone (defaults to the daemon's configured default)
        #[arg(long)]
        timezone: Option<String>,

        /// Make this a recurring alarm
        #[arg(long)]
        recurring: bool,

        /// Comma-separated weekdays (mon,tue,...), required when --recurring is set
        #[arg(long = "days")]
        days: Option<String>,
    },

    /// Cancel an alarm
    Remove {
        /// Alarm identifier
        code_id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// List alarms
    List {
        /// Filter by recipient email
        #[arg(long)]
        email: Option<String>,

        /// Filter by status (scheduled|triggered|canceled|failed)
        #[arg(long)]
        status: Option<String>,

        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one alarm
    Show {
        /// Alarm identifier
        code_id: String,
    },
}

pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

/// Parses a comma-separated weekday list (`mon,wed,fri`) into a `Weekday` set.
pub fn parse_days(spec: &str) -> Result<std::collections::HashSet<crate::models::Weekday>, String> {
    use crate::models::Weekday;
    let mut set = std::collections::HashSet::new();
    for token in spec.split(',') {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        let day = match token.as_str() {
            "mon" => Weekday::Mon,
            "tue" => Weekday::Tue,
            "wed" => Weekday::Wed,
            "thu" => Weekday::Thu,
            "fri" => Weekday::Fri,
            "sat" => Weekday::Sat,
            "sun" => Weekday::Sun,
            other => return Err(format!("unrecognized weekday: '{other}'")),
        };
        set.insert(day);
    }
    Ok(set)
}

/// Formats a connection error message for when the daemon is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!("Could not connect to alarmd at {host}:{port}. Is it running? (try: alarmd serve)")
}

pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve { config, port, data_dir }) => {
            daemon::cmd_serve(config.as_deref(), *port, data_dir.as_deref(), &cli.host).await
        }
        Some(Commands::Status) => daemon::cmd_status(&cli.host, cli.port).await,
        Some(Commands::Add {
            code_id,
            email,
            time,
            timezone,
            recurring,
            days,
        }) => {
            alarm::cmd_add(
                &cli.host,
                cli.port,
                code_id,
                email,
                time,
                timezone.as_deref(),
                *recurring,
                days.as_deref(),
            )
            .await
        }
        Some(Commands::Remove { code_id, yes }) => alarm::cmd_remove(&cli.host, cli.port, code_id, *yes).await,
        Some(Commands::List { email, status, json }) => {
            alarm::cmd_list(&cli.host, cli.port, email.as_deref(), status.as_deref(), *json).await
        }
        Some(Commands::Show { code_id }) => alarm::cmd_show(&cli.host, cli.port, code_id).await,
        None => {
            println!("No command specified. Use --help for usage.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verifies_clap_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["alarmd", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { config: None, port: None, data_dir: None })));
        assert_eq!(cli.port, 8177);
        assert_eq!(cli.host, "127.0.0.1");
    }

    #[test]
    fn test_parse_serve_with_overrides() {
        let cli = Cli::try_parse_from(["alarmd", "--port", "9000", "serve", "--port", "9100", "--config", "x.json"]).unwrap();
        assert_eq!(cli.port, 9000);
        match cli.command {
            Some(Commands::Serve { config, port, .. }) => {
                assert_eq!(config.as_deref(), Some("x.json"));
                assert_eq!(port, Some(9100));
            }
            _ => panic!("expected Serve"),
        }
    }

    #[test]
    fn test_parse_add_requires_id_email_time() {
        let result = Cli::try_parse_from(["alarmd", "add", "--email", "a@b.com", "--time", "09:00"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_add_recurring() {
        let cli = Cli::try_parse_from([
            "alarmd", "add", "--id", "A1", "--email", "a@b.com", "--time", "09:00", "--recurring", "--days", "mon,wed",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Add { code_id, recurring, days, .. }) => {
                assert_eq!(code_id, "A1");
                assert!(recurring);
                assert_eq!(days.as_deref(), Some("mon,wed"));
            }
            _ => panic!("expected Add"),
        }
    }

    #[test]
    fn test_parse_remove() {
        let cli = Cli::try_parse_from(["alarmd", "remove", "A1", "--yes"]).unwrap();
        match cli.command {
            Some(Commands::Remove { code_id, yes }) => {
                assert_eq!(code_id, "A1");
                assert!(yes);
            }
            _ => panic!("expected Remove"),
        }
    }

    #[test]
    fn test_parse_list_with_filters() {
        let cli = Cli::try_parse_from(["alarmd", "list", "--email", "a@b.com", "--status", "scheduled", "--json"]).unwrap();
        match cli.command {
            Some(Commands::List { email, status, json }) => {
                assert_eq!(email.as_deref(), Some("a@b.com"));
                assert_eq!(status.as_deref(), Some("scheduled"));
                assert!(json);
            }
            _ => panic!("expected List"),
        }
    }

    #[test]
    fn test_parse_show() {
        let cli = Cli::try_parse_from(["alarmd", "show", "A1"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Show { code_id }) if code_id == "A1"));
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["alarmd", "status"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status)));
    }

    #[test]
    fn test_base_url_format() {
        assert_eq!(base_url("127.0.0.1", 8177), "http://127.0.0.1:8177");
    }

    #[test]
    fn test_parse_days_accepts_mixed_case_and_whitespace() {
        let set = parse_days(" Mon, wed ,FRI").unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_parse_days_rejects_unknown() {
        assert!(parse_days("funday").is_err());
    }

    #[test]
    fn test_connection_error_message_mentions_serve() {
        let msg = connection_error_message("127.0.0.1", 8177);
        assert!(msg.contains("alarmd serve"));
    }
}
