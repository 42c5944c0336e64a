// src/commands/show.rs
//! Service identity display

use anyhow::Result;
use divban::settings::Settings;
use divban::system::linger_enabled;
use divban::{ServiceUser, SystemRunner, UserManager};

/// Print the provisioned identity of `service`
pub fn cmd_show(settings: &Settings, service: &str, json: bool) -> Result<()> {
    let runner = SystemRunner::new();
    let user = UserManager::new(&runner, settings).resolve_service_user(service)?;
    let linger = linger_enabled(&settings.system_paths(), &user.username);

    if json {
        println!("{}", render_json(&user, linger)?);
    } else {
        print!("{}", render_text(&user, linger));
    }
    Ok(())
}

fn render_json(user: &ServiceUser, linger: bool) -> Result<String> {
    let mut value = serde_json::to_value(user)?;
    value["linger"] = serde_json::Value::Bool(linger);
    Ok(serde_json::to_string_pretty(&value)?)
}

fn render_text(user: &ServiceUser, linger: bool) -> String {
    let range = user.subuid_range();
    format!(
        "User:     {}\nUID/GID:  {}/{}\nHome:     {}\nSubIDs:   {}-{} ({})\nLinger:   {}\n",
        user.username,
        user.uid,
        user.gid,
        user.home_dir.display(),
        range.start,
        range.end().saturating_sub(1),
        range.size,
        if linger { "enabled" } else { "disabled" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn caddy() -> ServiceUser {
        ServiceUser {
            username: "divban-caddy".to_string(),
            uid: 10000,
            gid: 10000,
            subuid_start: 100000,
            subuid_size: 65536,
            home_dir: PathBuf::from("/srv/divban-caddy"),
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&caddy(), true);
        assert!(text.contains("divban-caddy"));
        assert!(text.contains("100000-165535 (65536)"));
        assert!(text.contains("enabled"));
    }

    #[test]
    fn test_render_text_empty_range() {
        let mut user = caddy();
        user.subuid_start = 0;
        user.subuid_size = 0;
        assert!(render_text(&user, false).contains("SubIDs:   0-0 (0)"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&caddy(), false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["uid"], 10000);
        assert_eq!(value["subuid_start"], 100000);
        assert_eq!(value["linger"], false);
    }
}
