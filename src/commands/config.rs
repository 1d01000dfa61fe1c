// ABOUTME: Config command implementation.
// ABOUTME: Prints the decoded configuration with secrets masked.

use rexec::config::Config;
use rexec::error::Result;
use rexec::output::{Output, OutputMode};
use serde_json::json;

pub fn show_config(config: &Config, output: &Output) -> Result<i32> {
    let ssh = config.ssh.as_ref();
    match output.mode() {
        OutputMode::Json => {
            let value = json!({
                "server": { "baseUrl": config.server.base_url },
                "token": config.redacted_token(),
                "projects": { "name": config.projects.name },
                "ssh": ssh.map(|s| json!({
                    "host": s.host,
                    "port": s.port,
                    "user": s.user,
                    "key_file": s.key_file.as_ref().map(|p| p.display().to_string()),
                })),
            });
            println!("{value}");
        }
        OutputMode::Normal | OutputMode::Quiet => {
            println!("server:   {}", config.server.base_url);
            println!("token:    {}", config.redacted_token());
            println!("project:  {}", config.projects.name);
            if let Some(s) = ssh {
                let user = s.user.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
                println!("ssh:      {}{}:{}", user, s.host, s.port);
                if let Some(key) = &s.key_file {
                    println!("key:      {}", key.display());
                }
            }
        }
    }
    Ok(0)
}
