use owo_colors::OwoColorize;

use super::{CliError, CliResult};
use crate::ConfigCommand;
use crate::config::{DashConfig, config_file_path, init_config_toml, load_config, mask_secret};

pub async fn handle_config_cmd(cmd: ConfigCommand) -> CliResult<()> {
    match cmd {
        ConfigCommand::Init { force } => {
            let path = init_config_toml(force)
                .await
                .map_err(|e| CliError::Config(e.to_string()))?;
            println!("Wrote TOML config template to {:?}", path);
        }
        ConfigCommand::Show => {
            let cfg = load_config()
                .await
                .map_err(|e| CliError::Config(e.to_string()))?;
            print_effective_config(&cfg);
        }
    }
    Ok(())
}

fn print_effective_config(cfg: &DashConfig) {
    let path = config_file_path();
    let origin = if path.exists() {
        format!("{:?}", path)
    } else {
        format!("defaults ({:?} not found)", path)
    };
    println!("{}", format!("Effective config from {origin}").bold());
    println!("  listen        {}", cfg.listen_addr());
    println!("  openclaw_dir  {}", cfg.openclaw_dir().display());
    println!("  trace_file    {}", cfg.trace_file().display());
    println!("  cache_ttl     {}s", cfg.usage.cache_ttl_secs);
    println!(
        "  log_level     {}",
        cfg.log_level.as_deref().unwrap_or("info (default)")
    );
    println!("{}", "Gateway".bold());
    println!("  ws_url        {}", cfg.gateway.ws_url);
    println!("  http_url      {}", cfg.gateway.http_url);
    println!(
        "  origin        {}",
        if cfg.gateway.origin.is_empty() {
            "(none)"
        } else {
            cfg.gateway.origin.as_str()
        }
    );
    let (token, source) = cfg.resolve_gateway_token();
    match token {
        Some(token) => println!("  token         {} (from {})", mask_secret(&token), source),
        None => println!("  token         {}", "not set".yellow()),
    }
    println!(
        "  client        {} {} ({})",
        cfg.gateway.client_id, cfg.gateway.client_version, cfg.gateway.client_mode
    );
    println!(
        "  timeouts      connect {}ms, handshake {}ms, receive {}ms x {}",
        cfg.gateway.connect_timeout_ms,
        cfg.gateway.handshake_timeout_ms,
        cfg.gateway.receive_timeout_ms,
        cfg.gateway.max_receive_attempts
    );
}
