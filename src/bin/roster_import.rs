//! Import a user roster into the users snapshot
//!
//! Usage:
//!   cargo run --bin roster_import -- [--env dev] roster.yaml
//!   cargo run --bin roster_import -- [--env dev] --dump
//!
//! Roster files are YAML or JSON lists of `{login, exec_identity, security}`
//! where `security` is the wire code (-14, 0, 1 or 2) and may be omitted.
//! A running server picks up the new roster on `ReloadUsers`.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use qars::config::AppConfig;
use qars::entity::{SecurityLevel, User};
use qars::persistence::SnapshotStore;

#[derive(Debug, Serialize, Deserialize)]
struct RosterEntry {
    login: String,
    exec_identity: String,
    #[serde(default)]
    security: Option<i32>,
}

impl RosterEntry {
    fn into_user(self) -> Result<User> {
        let mut user = User::new(self.login, self.exec_identity);
        if let Some(code) = self.security {
            let level = SecurityLevel::from_code(code)
                .with_context(|| format!("{}: unknown security code {}", user.login, code))?;
            user = user.with_security(level);
        }
        Ok(user)
    }
}

impl From<&User> for RosterEntry {
    fn from(user: &User) -> Self {
        Self {
            login: user.login.clone(),
            exec_identity: user.exec_identity.clone(),
            security: user.security.map(|s| s.code()),
        }
    }
}

fn parse_roster(path: &Path, content: &str) -> Result<Vec<User>> {
    let entries: Vec<RosterEntry> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).context("parsing JSON roster")?,
        _ => serde_yaml::from_str(content).context("parsing YAML roster")?,
    };
    let mut users = entries
        .into_iter()
        .map(RosterEntry::into_user)
        .collect::<Result<Vec<_>>>()?;
    users.sort();
    let before = users.len();
    users.dedup();
    if users.len() != before {
        bail!("roster lists the same login more than once");
    }
    Ok(users)
}

fn main() -> Result<()> {
    let mut env = "dev".to_string();
    let mut dump = false;
    let mut roster = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env" | "-e" => env = args.next().context("--env needs a value")?,
            "--dump" => dump = true,
            other if roster.is_none() => roster = Some(other.to_string()),
            other => bail!("unexpected argument {}", other),
        }
    }

    let config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    let store = SnapshotStore::new(&config.storage.data_dir);
    let users_file = &config.storage.users_file;

    if dump {
        let users: Vec<User> = store.load(users_file).context("reading users snapshot")?;
        let entries: Vec<RosterEntry> = users.iter().map(RosterEntry::from).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let Some(roster) = roster else {
        bail!("usage: roster_import [--env <name>] <roster.yaml|roster.json> | --dump");
    };
    let path = Path::new(&roster);
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", roster))?;
    let users = parse_roster(path, &content)?;

    store
        .save(users_file, &users, true)
        .with_context(|| format!("writing {}", store.path(users_file).display()))?;
    eprintln!("Imported {} users into {}", users.len(), store.path(users_file).display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_roster() {
        let yaml = "- {login: zed, exec_identity: zexec, security: 2}\n- {login: amy, exec_identity: aexec}\n";
        let users = parse_roster(Path::new("roster.yaml"), yaml).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].login, "amy");
        assert_eq!(users[0].security, None);
        assert_eq!(users[1].security, Some(SecurityLevel::Administrator));
    }

    #[test]
    fn test_parse_json_roster_rejects_bad_code() {
        let json = r#"[{"login": "amy", "exec_identity": "a", "security": 7}]"#;
        assert!(parse_roster(Path::new("roster.json"), json).is_err());
    }

    #[test]
    fn test_duplicate_login_rejected() {
        let yaml = "- {login: amy, exec_identity: a}\n- {login: amy, exec_identity: b}\n";
        assert!(parse_roster(Path::new("r.yml"), yaml).is_err());
    }
}
